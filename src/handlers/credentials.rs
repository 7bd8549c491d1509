//! # Credential Intake Handlers
//!
//! Receives the notes session cookie captured by the companion browser
//! extension.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::server::AppState;

/// Session cookie pushed by the extension
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReceiveCookieRequest {
    /// Value of the `token_v2` cookie
    #[serde(default)]
    pub token_v2: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReceiveCookieResponse {
    pub success: bool,
}

/// Store a notes session cookie and reconfigure the sources
#[utoipa::path(
    post,
    path = "/receive-cookie",
    request_body = ReceiveCookieRequest,
    responses(
        (status = 200, description = "Cookie stored", body = ReceiveCookieResponse, example = json!({"success": true})),
        (status = 400, description = "No token provided", body = ApiError),
        (status = 500, description = "Failed to process token", body = ApiError)
    ),
    tag = "credentials"
)]
pub async fn receive_cookie(
    State(state): State<AppState>,
    payload: Result<Json<ReceiveCookieRequest>, JsonRejection>,
) -> Result<Json<ReceiveCookieResponse>, ApiError> {
    let Json(request) = payload?;
    let token = request.token_v2.unwrap_or_default();

    state.lifecycle.receive_external_credential(&token).await?;
    info!("Received notes session cookie");

    Ok(Json(ReceiveCookieResponse { success: true }))
}
