//! Integration manager
//!
//! Owns the active source set, fans fetches out across it, merges and sorts
//! the results, and swaps the mail source when its credential is renewed.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{StatusCode, header::LOCATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::IntegrationsConfig;
use crate::credentials::{Credential, Credentials};
use crate::models::notification::sort_newest_first;
use crate::models::{NotificationRecord, SourceKind};
use crate::routing::RoutingSurface;
use crate::sources::{RenewalCallback, Source, SourceError, SourceFactory};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("failed to build {kind} source: {source}")]
    Build {
        kind: SourceKind,
        #[source]
        source: SourceError,
    },
}

/// A live source tagged with the integration it was built for.
#[derive(Clone)]
pub struct ActiveSource {
    pub kind: SourceKind,
    pub source: Arc<dyn Source>,
}

pub struct IntegrationManager {
    factory: Arc<dyn SourceFactory>,
    fetch_timeout: Duration,
    sources: RwLock<Arc<Vec<ActiveSource>>>,
    latest: RwLock<Arc<Vec<NotificationRecord>>>,
}

impl IntegrationManager {
    pub fn new(factory: Arc<dyn SourceFactory>, fetch_timeout: Duration) -> Self {
        Self {
            factory,
            fetch_timeout,
            sources: RwLock::new(Arc::new(Vec::new())),
            latest: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn build(
        &self,
        kind: SourceKind,
        config: &IntegrationsConfig,
        credential: Option<&Credential>,
    ) -> Result<ActiveSource, ManagerError> {
        let source = self
            .factory
            .build(kind, config, credential)
            .map_err(|source| ManagerError::Build { kind, source })?;
        Ok(ActiveSource { kind, source })
    }

    fn snapshot(&self) -> Arc<Vec<ActiveSource>> {
        self.sources
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    fn swap(&self, next: Vec<ActiveSource>) {
        *self
            .sources
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Arc::new(next);
    }

    /// Rebuild the active set from `config` and `credentials`.
    ///
    /// Every enabled source is built before anything is swapped; a build
    /// failure leaves the previous set in place. When `routes` is given, the
    /// mail source's renewal routes replace whatever was mounted there.
    pub fn configure(
        &self,
        config: &IntegrationsConfig,
        credentials: &Credentials,
        routes: Option<&RoutingSurface>,
        on_renewal: Option<RenewalCallback>,
    ) -> Result<(), ManagerError> {
        let next = config
            .enabled_kinds()
            .into_iter()
            .map(|kind| self.build(kind, config, credentials.get(kind)))
            .collect::<Result<Vec<_>, _>>()?;

        let mail = next
            .iter()
            .find(|active| active.kind == SourceKind::Mail)
            .map(|active| active.source.clone());

        if let Some(surface) = routes {
            match (mail, on_renewal) {
                (Some(mail), Some(callback)) => match mail.routes(callback) {
                    Some(router) => surface.replace(router),
                    None => surface.clear(),
                },
                _ => surface.clear(),
            }
        }

        let kinds: Vec<SourceKind> = next.iter().map(|active| active.kind).collect();
        self.swap(next);
        info!(sources = ?kinds, "Integrations configured");
        Ok(())
    }

    /// Fetch every active source concurrently and merge newest first.
    ///
    /// Never fails: a source that panics or exceeds the fetch timeout
    /// contributes nothing to the round.
    pub async fn fetch_all(&self) -> Vec<NotificationRecord> {
        let sources = self.snapshot();
        let started = Instant::now();

        let handles: Vec<_> = sources
            .iter()
            .map(|active| {
                let source = active.source.clone();
                let timeout = self.fetch_timeout;
                let handle = tokio::spawn(async move {
                    tokio::time::timeout(timeout, source.fetch_notifications()).await
                });
                (active.kind, handle)
            })
            .collect();

        let mut merged = Vec::new();
        for (kind, handle) in handles {
            match handle.await {
                Ok(Ok(records)) => {
                    debug!(source = %kind, count = records.len(), "Source fetched");
                    merged.extend(records);
                }
                Ok(Err(_)) => {
                    warn!(source = %kind, timeout = ?self.fetch_timeout, "Source fetch timed out");
                    counter!("notifeed_source_timeouts_total", "source" => kind.config_key())
                        .increment(1);
                }
                Err(err) => {
                    error!(source = %kind, error = %err, "Source fetch task failed");
                    counter!("notifeed_source_errors_total", "source" => kind.config_key())
                        .increment(1);
                }
            }
        }

        sort_newest_first(&mut merged);

        counter!("notifeed_fetch_rounds_total").increment(1);
        histogram!("notifeed_fetch_round_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            sources = sources.len(),
            notifications = merged.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetch round completed"
        );

        *self
            .latest
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Arc::new(merged.clone());
        merged
    }

    /// Merged feed of the last completed round.
    pub fn latest(&self) -> Vec<NotificationRecord> {
        self.latest
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .as_ref()
            .clone()
    }

    /// Replace the mail source with one built from `credential`, then run a
    /// fetch round. Persisting the credential is the caller's job and must
    /// happen first.
    pub async fn renew_mail_credential(
        &self,
        config: &IntegrationsConfig,
        credential: Credential,
    ) -> Result<(), ManagerError> {
        let renewed = self.build(SourceKind::Mail, config, Some(&credential))?;

        {
            let mut sources = self
                .sources
                .write()
                .unwrap_or_else(|poison| poison.into_inner());
            let mut next: Vec<ActiveSource> = sources
                .iter()
                .filter(|active| active.kind != SourceKind::Mail)
                .cloned()
                .collect();
            next.push(renewed);
            *sources = Arc::new(next);
        }

        counter!("notifeed_renewals_total", "source" => SourceKind::Mail.config_key())
            .increment(1);
        info!("Mail source rebuilt with renewed credential");

        self.fetch_all().await;
        Ok(())
    }

    /// Kinds of the active sources, in list order.
    pub fn active_kinds(&self) -> Vec<SourceKind> {
        self.snapshot().iter().map(|active| active.kind).collect()
    }

    /// The active mail source, if any.
    pub fn mail_source(&self) -> Option<Arc<dyn Source>> {
        self.snapshot()
            .iter()
            .find(|active| active.kind == SourceKind::Mail)
            .map(|active| active.source.clone())
    }

    /// Gate for routes that need an authorized mail source.
    pub fn auth_middleware_for(self: &Arc<Self>, enabled: bool) -> MailAuthGate {
        MailAuthGate {
            manager: self.clone(),
            enabled,
        }
    }
}

/// State of [`mail_auth_middleware`].
#[derive(Clone)]
pub struct MailAuthGate {
    manager: Arc<IntegrationManager>,
    enabled: bool,
}

/// Redirect into the mail renewal handshake when the current mail source
/// cannot authorize; otherwise pass through.
pub async fn mail_auth_middleware(
    State(gate): State<MailAuthGate>,
    request: Request,
    next: Next,
) -> Response {
    if gate.enabled
        && let Some(mail) = gate.manager.mail_source()
        && let Err(err) = mail.authorize().await
        && let Some(path) = mail.renewal_path()
    {
        info!(error = %err, redirect = path, "Mail source not authorized, starting renewal");
        return (StatusCode::FOUND, [(LOCATION, path.to_string())]).into_response();
    }
    next.run(request).await
}
