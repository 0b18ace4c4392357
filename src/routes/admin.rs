//! Admin-token guard and operator endpoints (/admin/*)

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
    routing::post,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::services::error::ApiError;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/admin/publish-due", post(publish_due))
}

// ============================================================================
// Admin Extractor - checks the x-admin-token header against ADMIN_TOKEN
// ============================================================================

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Extractor that only succeeds for requests carrying the configured admin token
pub struct AdminToken;

impl FromRequestParts<Arc<AppState>> for AdminToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_deref() else {
            tracing::error!("Admin endpoint called but ADMIN_TOKEN is not set");
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ADMIN_TOKEN is not set.",
            ));
        };

        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());

        if provided != Some(expected) {
            tracing::warn!(path = %parts.uri.path(), "Rejected admin request");
            return Err(ApiError::new(StatusCode::FORBIDDEN, "Forbidden"));
        }

        Ok(AdminToken)
    }
}

/// POST /admin/publish-due - Run one scheduler tick now
async fn publish_due(
    State(state): State<Arc<AppState>>,
    _admin: AdminToken,
) -> Result<Json<Value>, ApiError> {
    let report = state.scheduler.run_tick().await.map_err(|e| {
        tracing::error!(error = %e, "Admin publish-due failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Publish job failed")
            .under_message()
            .with_details(Some(json!(e.to_string())))
    })?;

    Ok(Json(json!({
        "success": true,
        "message": "Publish job started",
        "report": report,
    })))
}
