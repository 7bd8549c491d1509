//! Notification sources
//!
//! This module provides:
//! - The `Source` trait every integration implements
//! - `DefaultSourceFactory`, which builds the concrete sources from the
//!   integrations file and stored credentials
//! - The individual source implementations

use std::sync::Arc;

pub mod github;
pub mod gmail;
pub mod mock;
pub mod notion;
pub mod slack;
pub mod trait_;

pub use github::GitHubSource;
pub use gmail::{GmailOAuthClient, GmailSource, PendingOAuthStates};
pub use mock::MockSource;
pub use notion::NotionSource;
pub use slack::SlackSource;
pub use trait_::{
    RenewalCallback, RenewalFuture, Source, SourceError, SourceFactory, renewal_callback,
};

use crate::config::IntegrationsConfig;
use crate::credentials::Credential;
use crate::models::SourceKind;

/// Builds the production source for each integration.
#[derive(Debug, Clone)]
pub struct DefaultSourceFactory {
    mail_redirect_uri: String,
    /// Shared by every mail source this factory builds.
    oauth_states: PendingOAuthStates,
}

impl DefaultSourceFactory {
    /// `mail_redirect_uri` is used when the `gmail` section names none.
    pub fn new(mail_redirect_uri: impl Into<String>) -> Self {
        Self {
            mail_redirect_uri: mail_redirect_uri.into(),
            oauth_states: PendingOAuthStates::new(),
        }
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn build(
        &self,
        kind: SourceKind,
        config: &IntegrationsConfig,
        credential: Option<&Credential>,
    ) -> Result<Arc<dyn Source>, SourceError> {
        let sections = &config.integrations;
        let missing =
            || SourceError::Configuration(format!("integration '{}' is not configured", kind));

        let source: Arc<dyn Source> = match kind {
            SourceKind::Mail => Arc::new(
                GmailSource::new(
                    sections.gmail.as_ref().ok_or_else(missing)?,
                    credential,
                    &self.mail_redirect_uri,
                )?
                .with_pending_states(self.oauth_states.clone()),
            ),
            SourceKind::CodeHost => Arc::new(GitHubSource::new(
                sections.github.as_ref().ok_or_else(missing)?,
                credential,
            )?),
            SourceKind::Chat => Arc::new(SlackSource::new(
                sections.slack.as_ref().ok_or_else(missing)?,
                credential,
            )?),
            SourceKind::Notes => Arc::new(NotionSource::new(
                sections.notion.as_ref().ok_or_else(missing)?,
                credential,
            )?),
            SourceKind::Synthetic => Arc::new(MockSource::new()),
        };
        Ok(source)
    }
}
