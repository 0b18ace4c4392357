//! Slot endpoints (/slots/*)

pub mod dto;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::domain::slots::{Comment, Slot, normalize_instant, queries as slots};
use crate::scheduler::PublishNowError;
use crate::services::error::{ApiError, LogErr};
use crate::services::notifier::SlotEvent;
use dto::{AddCommentRequest, CreateSlotRequest, UpdateSlotRequest};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/slots", get(list_slots).post(create_slot))
        .route("/slots/{id}", put(update_slot).delete(delete_slot))
        .route("/slots/{id}/comments", post(add_comment))
        .route("/slots/{id}/publish", post(publish_slot))
}

/// Millisecond timestamp plus a random suffix so ids created in the same
/// millisecond stay distinct
fn new_id() -> String {
    format!("{}{:04x}", Utc::now().timestamp_millis(), rand::random::<u16>())
}

/// GET /slots - List every slot
async fn list_slots(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Slot>>, StatusCode> {
    let all = slots::list_slots(&state.db)
        .await
        .log_500("List slots error")?;

    Ok(Json(all))
}

/// POST /slots - Create an unpublished slot
async fn create_slot(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSlotRequest>,
) -> Result<Json<Slot>, StatusCode> {
    let new_slot = slots::NewSlot {
        id: new_id(),
        content: req.content,
        image_url: req.image_url,
        message: req.message,
        ab_timing: req.ab_timing,
        scheduled_at: req.scheduled_at.as_deref().and_then(normalize_instant),
        created_at: Utc::now(),
    };

    slots::insert_slot(&state.db, &new_slot)
        .await
        .log_500("Insert slot error")?;

    let slot = slots::get_slot(&state.db, &new_slot.id)
        .await
        .log_500("Reload slot error")?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    state.notifier.emit(SlotEvent::Created(slot.clone()));
    Ok(Json(slot))
}

/// PUT /slots/:id - Edit an unpublished slot
async fn update_slot(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<String>,
    Json(req): Json<UpdateSlotRequest>,
) -> Result<Json<Slot>, ApiError> {
    let existing = slots::get_slot(&state.db, &slot_id)
        .await
        .log_500("Get slot error")?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Slot not found"))?;
    if existing.published {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Cannot edit a published slot",
        ));
    }

    let edit = slots::SlotEdit {
        content: req.content,
        image_url: req.image_url,
        // an unparsable schedule clears it; an empty one is ignored
        scheduled_at: req
            .scheduled_at
            .filter(|s| !s.is_empty())
            .map(|s| normalize_instant(&s)),
    };

    let updated = slots::update_unpublished_slot(&state.db, &slot_id, &edit)
        .await
        .log_500("Update slot error")?;
    if !updated {
        // published or deleted since the read above
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Cannot edit a published slot",
        ));
    }

    let slot = slots::get_slot(&state.db, &slot_id)
        .await
        .log_500("Reload slot error")?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Slot not found"))?;

    state.notifier.emit(SlotEvent::Updated(slot.clone()));
    Ok(Json(slot))
}

/// DELETE /slots/:id - Remove an unpublished slot
async fn delete_slot(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let existing = slots::get_slot(&state.db, &slot_id)
        .await
        .log_500("Get slot error")?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Slot not found"))?;
    if existing.published {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Cannot delete a published slot",
        ));
    }

    let deleted = slots::delete_unpublished_slot(&state.db, &slot_id)
        .await
        .log_500("Delete slot error")?;
    if !deleted {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Cannot delete a published slot",
        ));
    }

    state.notifier.emit(SlotEvent::Deleted {
        slot_id: slot_id.clone(),
    });
    Ok(Json(json!({ "ok": true })))
}

/// POST /slots/:id/comments - Append a comment
async fn add_comment(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<String>,
    Json(req): Json<AddCommentRequest>,
) -> Result<Json<Comment>, ApiError> {
    let comment = Comment {
        id: new_id(),
        user_id: req.user_id.unwrap_or_default(),
        text: req.text.unwrap_or_default(),
        created_at: Utc::now(),
    };

    let appended = slots::append_comment(&state.db, &slot_id, &comment)
        .await
        .log_500("Append comment error")?;
    if !appended {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Slot not found"));
    }

    state.notifier.emit(SlotEvent::Comment {
        slot_id,
        comment: comment.clone(),
    });
    Ok(Json(comment))
}

/// POST /slots/:id/publish - Publish a slot now, ignoring its schedule
async fn publish_slot(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .scheduler
        .publish_slot_now(&slot_id)
        .await
        .map_err(|e| match e {
            PublishNowError::NotFound => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
            PublishNowError::AlreadyPublished | PublishNowError::NotConfigured => {
                ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            PublishNowError::InProgress => ApiError::new(StatusCode::CONFLICT, e.to_string()),
            PublishNowError::Failed(err) => {
                let details = err.details.clone().unwrap_or_else(|| json!(err.message));
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Publish failed")
                    .with_details(Some(details))
            }
            PublishNowError::Store(err) => {
                tracing::error!(slot_id = %slot_id, error = %err, "Manual publish store error");
                ApiError::from(StatusCode::INTERNAL_SERVER_ERROR)
            }
        })?;

    Ok(Json(json!({ "success": true, "result": result })))
}
