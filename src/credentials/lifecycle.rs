//! Credential renewal and external credential intake.
//!
//! Every change follows the same order: persist the full mapping, commit it
//! in memory, then rebuild the affected sources. A failed write leaves both
//! the in-memory state and the active sources untouched.

use std::path::PathBuf;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Credential, CredentialStore, Credentials, StoreError};
use crate::config::{ConfigError, IntegrationsConfig};
use crate::manager::{IntegrationManager, ManagerError};
use crate::models::SourceKind;
use crate::routing::RoutingSurface;
use crate::sources::{RenewalCallback, renewal_callback};

#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("no credential provided")]
    MissingCredential,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("credential lifecycle is no longer running")]
    Unavailable,
}

struct LifecycleState {
    config: IntegrationsConfig,
    credentials: Credentials,
}

pub struct CredentialLifecycle {
    manager: Arc<IntegrationManager>,
    store: Arc<dyn CredentialStore>,
    config_path: PathBuf,
    routes: RoutingSurface,
    state: Mutex<LifecycleState>,
}

impl CredentialLifecycle {
    pub fn new(
        manager: Arc<IntegrationManager>,
        store: Arc<dyn CredentialStore>,
        config_path: impl Into<PathBuf>,
        routes: RoutingSurface,
        config: IntegrationsConfig,
        credentials: Credentials,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            store,
            config_path: config_path.into(),
            routes,
            state: Mutex::new(LifecycleState {
                config,
                credentials,
            }),
        })
    }

    /// Build the initial source set and mount the renewal routes.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<(), RenewalError> {
        let state = self.state.lock().await;
        self.reconfigure(&state)
    }

    fn reconfigure(self: &Arc<Self>, state: &LifecycleState) -> Result<(), RenewalError> {
        self.manager.configure(
            &state.config,
            &state.credentials,
            Some(&self.routes),
            Some(self.renewal_callback()),
        )?;
        Ok(())
    }

    /// Callback handed to sources. Holds only a weak reference, so mounted
    /// routes never keep the lifecycle alive.
    pub fn renewal_callback(self: &Arc<Self>) -> RenewalCallback {
        let lifecycle = Arc::downgrade(self);
        renewal_callback(move |kind, credential| {
            let lifecycle = lifecycle.clone();
            async move {
                match lifecycle.upgrade() {
                    Some(lifecycle) => lifecycle.renew(kind, credential).await,
                    None => Err(RenewalError::Unavailable),
                }
            }
        })
    }

    /// Persist `credential` for `kind`, then rebuild the affected source.
    pub async fn renew(
        self: &Arc<Self>,
        kind: SourceKind,
        credential: Credential,
    ) -> Result<(), RenewalError> {
        let mut state = self.state.lock().await;

        let mut credentials = state.credentials.clone();
        credentials.insert(kind, credential.clone());
        self.store.save(&credentials).await?;
        state.credentials = credentials;

        info!(source = %kind, "Renewed credential persisted");
        counter!("notifeed_credentials_persisted_total", "source" => kind.config_key())
            .increment(1);

        match kind {
            SourceKind::Mail => {
                self.manager
                    .renew_mail_credential(&state.config, credential)
                    .await?
            }
            _ => self.reconfigure(&state)?,
        }
        Ok(())
    }

    /// Accept a notes session cookie pushed by the companion agent.
    ///
    /// Delivering the same token again is harmless; the last write wins.
    pub async fn receive_external_credential(
        self: &Arc<Self>,
        token: &str,
    ) -> Result<(), RenewalError> {
        let token = token.trim();
        if token.is_empty() {
            warn!("Rejected empty external credential");
            return Err(RenewalError::MissingCredential);
        }

        let mut state = self.state.lock().await;

        let mut config = state.config.clone();
        config.set_notion_token(token);
        let mut credentials = state.credentials.clone();
        credentials.insert(SourceKind::Notes, Credential::Token(token.to_string()));

        // The store outranks the config token, so it is written first and
        // rolled back if the config file cannot follow.
        self.store.save(&credentials).await?;
        if let Err(err) = config.save(&self.config_path).await {
            if let Err(rollback) = self.store.save(&state.credentials).await {
                warn!(error = %rollback, "Failed to restore credential store");
            }
            return Err(err.into());
        }
        state.config = config;
        state.credentials = credentials;

        info!(source = %SourceKind::Notes, "External credential stored");
        counter!("notifeed_credentials_persisted_total", "source" => SourceKind::Notes.config_key())
            .increment(1);

        self.reconfigure(&state)
    }

    /// Snapshot of the in-memory integrations config.
    pub async fn config(&self) -> IntegrationsConfig {
        self.state.lock().await.config.clone()
    }

    /// Snapshot of the in-memory credential mapping.
    pub async fn credentials(&self) -> Credentials {
        self.state.lock().await.credentials.clone()
    }

    pub fn manager(&self) -> &Arc<IntegrationManager> {
        &self.manager
    }
}
