//! # Data Models
//!
//! Data shapes shared by the sources, the integration manager and the HTTP layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod notification;

pub use notification::{NotificationRecord, PLACEHOLDER_LINK, SourceKind};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// Liveness marker
    pub status: String,
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            service: "notifeed".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
