//! API DTOs for slots

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSlotRequest {
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub message: Option<String>,
    pub ab_timing: Option<serde_json::Value>,
    pub scheduled_at: Option<String>,
}

/// Fields absent from the body are left untouched
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSlotRequest {
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub scheduled_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCommentRequest {
    pub user_id: Option<String>,
    pub text: Option<String>,
}
