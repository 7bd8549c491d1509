//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers of the feed service.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod credentials;
pub mod feed;

/// Liveness probe returning basic service information
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "health"
)]
pub async fn healthz() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}
