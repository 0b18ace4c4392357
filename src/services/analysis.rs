//! Periodic page analytics snapshots

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::{analysis, page};
use crate::services::facebook::{FacebookClient, FacebookError};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("No page configured")]
    NotConfigured,
    #[error(transparent)]
    Facebook(#[from] FacebookError),
    #[error("Failed to store analysis: {0}")]
    Store(#[from] sqlx::Error),
}

/// Fetch the page and its recent posts and store the result as a new snapshot.
pub async fn refresh_page_analysis(
    db: &SqlitePool,
    facebook: &FacebookClient,
) -> Result<Value, AnalysisError> {
    let credential = page::active_credential(db)
        .await?
        .ok_or(AnalysisError::NotConfigured)?;

    let fetched = facebook
        .fetch_page_analysis(&credential.page_id, &credential.access_token)
        .await?;

    let now = Utc::now();
    let snapshot = fetched.into_snapshot(now.timestamp_millis());
    analysis::insert_snapshot(db, now.timestamp(), &snapshot).await?;

    Ok(snapshot)
}

/// Refresh once immediately, then every `period` until `shutdown` flips.
pub async fn start_analysis_poller(
    db: SqlitePool,
    facebook: FacebookClient,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => match refresh_page_analysis(&db, &facebook).await {
                Ok(_) => tracing::info!("Page analysis snapshot stored"),
                Err(AnalysisError::NotConfigured) => {
                    tracing::debug!("Skipping page analysis, no page configured")
                }
                Err(e) => tracing::warn!(error = %e, "Page analysis failed"),
            },
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Analysis poller stopped");
}
