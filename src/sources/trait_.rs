//! Source trait definition
//!
//! Defines the capability set every notification source implements.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use thiserror::Error;
use tracing::error;

use crate::config::IntegrationsConfig;
use crate::credentials::{Credential, RenewalError};
use crate::models::{NotificationRecord, SourceKind};

/// Per-request timeout of the HTTP client each source owns.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Source error types. They never leave `fetch_notifications`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),
}

/// Boxed future returned by a [`RenewalCallback`].
pub type RenewalFuture = Pin<Box<dyn Future<Output = Result<(), RenewalError>> + Send>>;

/// Invoked by a source once it holds fresh credentials, so they can be
/// persisted and the source rebuilt without the source knowing how.
pub type RenewalCallback = Arc<dyn Fn(SourceKind, Credential) -> RenewalFuture + Send + Sync>;

#[async_trait]
pub trait Source: Send + Sync {
    /// Integration this instance was built for.
    fn kind(&self) -> SourceKind;

    /// Fetch the current notifications from the origin service.
    ///
    /// Never fails: errors are logged and produce an empty list.
    async fn fetch_notifications(&self) -> Vec<NotificationRecord>;

    /// Check whether the source holds usable credentials.
    async fn authorize(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Entry point of the interactive renewal handshake, if any.
    fn renewal_path(&self) -> Option<&str> {
        None
    }

    /// Inbound routes of the renewal handshake, if any.
    fn routes(&self, _on_renewal: RenewalCallback) -> Option<Router> {
        None
    }
}

/// Wrap an async closure as a [`RenewalCallback`].
pub fn renewal_callback<F, Fut>(callback: F) -> RenewalCallback
where
    F: Fn(SourceKind, Credential) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RenewalError>> + Send + 'static,
{
    Arc::new(move |kind, credential| Box::pin(callback(kind, credential)) as RenewalFuture)
}

/// Builds source instances from static config plus the stored credential.
pub trait SourceFactory: Send + Sync {
    fn build(
        &self,
        kind: SourceKind,
        config: &IntegrationsConfig,
        credential: Option<&Credential>,
    ) -> Result<Arc<dyn Source>, SourceError>;
}

/// Collapse a fallible fetch into the no-throw contract.
pub(crate) fn or_empty(
    kind: SourceKind,
    result: Result<Vec<NotificationRecord>, SourceError>,
) -> Vec<NotificationRecord> {
    match result {
        Ok(records) => records,
        Err(err) => {
            error!(source = %kind, error = %err, "Error fetching notifications");
            metrics::counter!("notifeed_source_errors_total", "source" => kind.config_key())
                .increment(1);
            Vec::new()
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("notifeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Turn a non-success response into [`SourceError::Http`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Http {
        status: status.as_u16(),
        body,
    })
}
