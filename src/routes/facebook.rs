//! Page settings, ad-hoc posting and analytics endpoints (/facebook/*)

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::constants::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use crate::domain::{analysis, page};
use crate::services::analysis::{AnalysisError, refresh_page_analysis};
use crate::services::error::{ApiError, LogErr};
use crate::services::facebook::{FacebookError, Publisher};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/facebook/status", get(status))
        .route("/facebook/set-page", post(set_page))
        .route("/facebook/get-page", get(get_page))
        .route("/facebook/remove-page", post(remove_page))
        .route("/facebook/post", post(post_now))
        .route("/facebook/analysis/latest", get(latest_analysis))
        .route("/facebook/analysis/history", get(analysis_history))
        .route("/facebook/analysis/refresh", post(refresh_analysis))
}

/// GET /facebook/status - Whether a page is configured and its token still works
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let Some(credential) = page::active_credential(&state.db)
        .await
        .log_500("Load page error")?
    else {
        return Ok(Json(json!({ "connected": false, "message": "No page configured" })));
    };

    let body = match state
        .facebook
        .page_status(&credential.page_id, &credential.access_token)
        .await
    {
        Ok(page) => json!({ "connected": true, "page": page }),
        Err(e @ FacebookError::Api { .. }) => json!({ "connected": false, "details": e.details() }),
        Err(e) => json!({
            "connected": false,
            "message": "Validation failed",
            "error": e.to_string(),
        }),
    };

    Ok(Json(body))
}

/// Page endpoints report their reason under `message`
fn failure(status: StatusCode, message: impl Into<String>) -> ApiError {
    ApiError::new(status, message).under_message()
}

fn internal(status: StatusCode) -> ApiError {
    ApiError::from(status).under_message()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPageRequest {
    page_id: Option<String>,
    page_name: Option<String>,
    access_token: Option<String>,
}

/// POST /facebook/set-page - Replace the stored page credential
async fn set_page(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetPageRequest>,
) -> Result<Json<Value>, ApiError> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(page_id), Some(page_name), Some(access_token)) = (
        non_empty(req.page_id),
        non_empty(req.page_name),
        non_empty(req.access_token),
    ) else {
        return Err(failure(StatusCode::BAD_REQUEST, "All fields required."));
    };

    page::set_page(
        &state.db,
        &page::PageCredential {
            page_id,
            page_name,
            access_token,
        },
    )
    .await
    .log_500("Save page error")
    .map_err(internal)?;

    tracing::info!("Page credentials updated");
    Ok(Json(json!({ "success": true, "message": "Page credentials saved." })))
}

/// GET /facebook/get-page - The stored page credential
async fn get_page(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let details = page::get_page(&state.db)
        .await
        .log_500("Load page error")
        .map_err(internal)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "No page details set."))?;

    Ok(Json(json!({ "success": true, "details": details })))
}

/// POST /facebook/remove-page - Forget the page credential
async fn remove_page(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    page::remove_page(&state.db)
        .await
        .log_500("Remove page error")?;

    tracing::info!("Page credentials removed");
    Ok(Json(json!({ "success": true, "message": "Page details removed." })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRequest {
    message: Option<String>,
    image_url: Option<String>,
}

/// POST /facebook/post - Publish straight to the page, outside any slot
async fn post_now(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PostRequest>,
) -> Result<Json<Value>, ApiError> {
    let credential = page::active_credential(&state.db)
        .await
        .log_500("Load page error")
        .map_err(internal)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Facebook page not configured."))?;

    let result = state
        .facebook
        .publish(
            &credential.page_id,
            &credential.access_token,
            req.message.as_deref(),
            req.image_url.as_deref(),
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Ad-hoc post failed");
            failure(StatusCode::BAD_GATEWAY, "Facebook API error")
                .with_details(Some(e.details.unwrap_or_else(|| json!(e.message))))
        })?;

    Ok(Json(json!({
        "success": true,
        "message": "Posted to Facebook",
        "details": result,
    })))
}

/// GET /facebook/analysis/latest - Most recent analytics snapshot
async fn latest_analysis(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let snapshot = analysis::latest_snapshot(&state.db)
        .await
        .log_500("Load analysis error")
        .map_err(internal)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "No analysis available"))?;

    Ok(Json(json!({ "success": true, "ts": snapshot.ts, "data": snapshot.data })))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<String>,
}

fn history_limit(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n != 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

/// GET /facebook/analysis/history - Last N snapshots, newest first
async fn analysis_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, StatusCode> {
    let entries = analysis::list_snapshots(&state.db, history_limit(query.limit.as_deref()))
        .await
        .log_500("Load analysis history error")?;

    Ok(Json(json!({ "success": true, "entries": entries })))
}

/// POST /facebook/analysis/refresh - Take a snapshot now
async fn refresh_analysis(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let result = refresh_page_analysis(&state.db, &state.facebook)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Analysis refresh failed");
            let details = match &e {
                AnalysisError::Facebook(fb) => fb.details().cloned(),
                _ => None,
            };
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).with_details(details)
        })?;

    Ok(Json(json!({ "success": true, "result": result })))
}
