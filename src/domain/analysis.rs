//! Page analytics snapshots

use serde::Serialize;
use sqlx::types::Json;
use sqlx::{Executor, Sqlite};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnalysisSnapshot {
    /// Unix seconds
    pub ts: i64,
    pub data: Json<serde_json::Value>,
}

pub async fn insert_snapshot<'e, E>(
    executor: E,
    ts: i64,
    data: &serde_json::Value,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO fb_analysis (ts, data) VALUES (?, ?)")
        .bind(ts)
        .bind(Json(data))
        .execute(executor)
        .await?;
    Ok(())
}

/// Most recent snapshots first
pub async fn list_snapshots<'e, E>(executor: E, limit: i64) -> Result<Vec<AnalysisSnapshot>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT ts, data FROM fb_analysis ORDER BY id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(executor)
        .await
}

pub async fn latest_snapshot<'e, E>(executor: E) -> Result<Option<AnalysisSnapshot>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(list_snapshots(executor, 1).await?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::db::test_pool;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshots_newest_first() {
        let pool = test_pool().await;
        assert!(latest_snapshot(&pool).await.unwrap().is_none());

        for ts in [10, 20, 30] {
            insert_snapshot(&pool, ts, &json!({ "ts": ts })).await.unwrap();
        }

        let latest = latest_snapshot(&pool).await.unwrap().unwrap();
        assert_eq!(latest.ts, 30);

        let history = list_snapshots(&pool, 2).await.unwrap();
        let stamps: Vec<i64> = history.iter().map(|s| s.ts).collect();
        assert_eq!(stamps, [30, 20]);
    }
}
