//! Runtime configuration read from the environment

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ANALYSIS_INTERVAL_SECS, DEFAULT_DATABASE_URL, DEFAULT_GRAPH_BASE, DEFAULT_PORT,
    DEFAULT_PUBLISH_INTERVAL_SECS, DEFAULT_PUBLISH_TIMEOUT_SECS,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub graph_base: String,
    /// Enables `appsecret_proof` on every Graph API call when set
    pub app_secret: Option<String>,
    /// Shared secret expected in the `x-admin-token` header
    pub admin_token: Option<String>,
    pub publish_interval: Duration,
    pub analysis_interval: Duration,
    pub publish_timeout: Duration,
    pub page_json: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidNumber { key: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            port,
            graph_base: non_empty("FB_GRAPH_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE.to_string()),
            app_secret: non_empty("FB_APP_SECRET"),
            admin_token: non_empty("ADMIN_TOKEN"),
            publish_interval: secs(
                "PUBLISH_INTERVAL_SECS",
                non_empty("PUBLISH_INTERVAL_SECS"),
                DEFAULT_PUBLISH_INTERVAL_SECS,
            )?,
            analysis_interval: secs(
                "ANALYSIS_INTERVAL_SECS",
                non_empty("ANALYSIS_INTERVAL_SECS"),
                DEFAULT_ANALYSIS_INTERVAL_SECS,
            )?,
            publish_timeout: secs(
                "PUBLISH_TIMEOUT_SECS",
                non_empty("PUBLISH_TIMEOUT_SECS"),
                DEFAULT_PUBLISH_TIMEOUT_SECS,
            )?,
            page_json: non_empty("FB_PAGE_JSON").map(PathBuf::from),
        })
    }
}

/// Zero falls back to the default; anything unparsable is an error.
fn secs(key: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_secs(default));
    };

    let parsed: u64 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { key, value: value.clone() })?;

    Ok(Duration::from_secs(if parsed == 0 { default } else { parsed }))
}
