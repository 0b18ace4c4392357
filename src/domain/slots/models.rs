//! Slot model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// A comment attached to a slot (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A schedulable page post, serialized as-is for API responses and events
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
    /// Alternate post text, used when `content` is empty
    pub message: Option<String>,
    /// Client-side A/B timing settings, stored untouched
    pub ab_timing: Option<Json<serde_json::Value>>,
    /// RFC 3339 instant; kept as text so legacy or hand-edited rows that fail to parse are skipped, not fatal
    pub scheduled_at: Option<String>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub fb_result: Option<Json<serde_json::Value>>,
    pub publish_error: Option<String>,
    pub publish_attempts: i64,
    pub comments: Json<Vec<Comment>>,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    /// The scheduled instant, if present and parseable.
    pub fn scheduled_instant(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at.as_deref().and_then(parse_instant)
    }

    /// Text sent to the page: `content`, else `message`, else empty.
    pub fn post_text(&self) -> &str {
        [self.content.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
            .unwrap_or("")
    }

    /// Unpublished with a valid schedule that is not in the future.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.published {
            return false;
        }
        match self.scheduled_instant() {
            Some(at) => at <= now,
            None => false,
        }
    }
}

/// Parse a client supplied timestamp into an absolute instant.
///
/// Accepts RFC 3339 (with any offset) and naive `YYYY-MM-DDTHH:MM[:SS]` values,
/// which are taken as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Normalize a timestamp to the canonical stored form, or `None` when it cannot be parsed.
pub fn normalize_instant(raw: &str) -> Option<String> {
    parse_instant(raw).map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}
