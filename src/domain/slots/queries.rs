//! Slot domain - DB queries for slots
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&SqlitePool` (for standalone queries) and `&mut SqliteConnection` (for transactions).
//! Every write that depends on publication state is conditional on `published = 0`,
//! so a slot that has been published can never be edited, deleted or re-published.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, Sqlite};

use super::models::{Comment, Slot};

const SLOT_COLUMNS: &str = "id, content, image_url, message, ab_timing, scheduled_at, published, \
     published_at, fb_result, publish_error, publish_attempts, comments, created_at";

/// Data for a freshly created slot
#[derive(Debug, Clone)]
pub struct NewSlot {
    pub id: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub message: Option<String>,
    pub ab_timing: Option<serde_json::Value>,
    pub scheduled_at: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial edit of an unpublished slot. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SlotEdit {
    pub content: Option<String>,
    pub image_url: Option<String>,
    /// `Some(None)` clears the schedule
    pub scheduled_at: Option<Option<String>>,
}

/// List every slot, oldest first
pub async fn list_slots<'e, E>(executor: E) -> Result<Vec<Slot>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {SLOT_COLUMNS} FROM slots ORDER BY created_at ASC, id ASC");
    sqlx::query_as(&query).fetch_all(executor).await
}

pub async fn get_slot<'e, E>(executor: E, slot_id: &str) -> Result<Option<Slot>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?");
    sqlx::query_as(&query)
        .bind(slot_id)
        .fetch_optional(executor)
        .await
}

pub async fn insert_slot<'e, E>(executor: E, slot: &NewSlot) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO slots
            (id, content, image_url, message, ab_timing, scheduled_at, published, comments, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, '[]', ?)
        "#,
    )
    .bind(&slot.id)
    .bind(&slot.content)
    .bind(&slot.image_url)
    .bind(&slot.message)
    .bind(slot.ab_timing.as_ref().map(Json))
    .bind(&slot.scheduled_at)
    .bind(slot.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Apply an edit to an unpublished slot.
/// Returns false if the slot does not exist or is already published.
pub async fn update_unpublished_slot<'e, E>(
    executor: E,
    slot_id: &str,
    edit: &SlotEdit,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (set_schedule, scheduled_at) = match &edit.scheduled_at {
        Some(value) => (true, value.clone()),
        None => (false, None),
    };

    let result = sqlx::query(
        r#"
        UPDATE slots SET
            content = COALESCE(?, content),
            image_url = COALESCE(?, image_url),
            scheduled_at = CASE WHEN ? THEN ? ELSE scheduled_at END
        WHERE id = ? AND published = 0
        "#,
    )
    .bind(&edit.content)
    .bind(&edit.image_url)
    .bind(set_schedule)
    .bind(scheduled_at)
    .bind(slot_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete an unpublished slot.
/// Returns false if the slot does not exist or is already published.
pub async fn delete_unpublished_slot<'e, E>(executor: E, slot_id: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM slots WHERE id = ? AND published = 0")
        .bind(slot_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Append a comment in a single statement so concurrent comments are never lost.
/// Returns false if the slot does not exist.
pub async fn append_comment<'e, E>(
    executor: E,
    slot_id: &str,
    comment: &Comment,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE slots SET comments = json_insert(comments, '$[#]', json(?))
        WHERE id = ?
        "#,
    )
    .bind(Json(comment))
    .bind(slot_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a slot as published (atomic - only succeeds if not already published)
/// Returns true if the update was applied, false if already published
pub async fn mark_slot_published<'e, E>(
    executor: E,
    slot_id: &str,
    published_at: DateTime<Utc>,
    fb_result: &serde_json::Value,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE slots SET
            published = 1,
            published_at = ?,
            fb_result = ?,
            publish_error = NULL,
            publish_attempts = publish_attempts + 1
        WHERE id = ? AND published = 0
        "#,
    )
    .bind(published_at)
    .bind(Json(fb_result))
    .bind(slot_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a failed publish attempt, leaving the slot eligible for retry
pub async fn record_publish_error<'e, E>(
    executor: E,
    slot_id: &str,
    error: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE slots SET
            publish_error = ?,
            publish_attempts = publish_attempts + 1
        WHERE id = ? AND published = 0
        "#,
    )
    .bind(error)
    .bind(slot_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}
