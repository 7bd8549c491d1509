//! Test doubles for the integration manager.
//!
//! `TestFactory` builds `TestSource`s whose behaviour is chosen per kind, so
//! tests can mix healthy, failing, panicking and hanging sources without any
//! network access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{Router, extract::Query, http::StatusCode, routing::get};
use notifeed::config::IntegrationsConfig;
use notifeed::config::integrations::Integrations;
use notifeed::config::{
    GithubSettings, GmailSettings, MockSettings, NotionSettings, SlackSettings,
};
use notifeed::credentials::Credential;
use notifeed::models::notification::from_epoch_millis;
use notifeed::models::{NotificationRecord, SourceKind};
use notifeed::sources::{RenewalCallback, Source, SourceError, SourceFactory};

/// Renewal entry point of the mail double, same path as the real source.
pub const MAIL_AUTH_PATH: &str = "/auth/gmail";
pub const MAIL_CALLBACK_PATH: &str = "/auth/gmail/callback";

/// Bearer value the factory refuses to build a source from.
pub const BROKEN_TOKEN: &str = "broken";

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Behaviour {
    /// One record whose title is the credential the source was built with
    Echo,
    /// One record per epoch-second date
    Dated(Vec<i64>),
    /// Swallows its own failure and returns nothing
    Failing,
    /// Violates the no-panic contract
    Panicking,
    /// Never finishes within any reasonable timeout
    Slow,
    /// Sleeps, then behaves like `Echo`
    Delayed(Duration),
}

pub struct TestSource {
    kind: SourceKind,
    bearer: Option<String>,
    behaviour: Behaviour,
}

/// Date used by echo records, distinct per kind.
pub fn echo_date_secs(kind: SourceKind) -> i64 {
    let position = SourceKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default() as i64;
    1_700_000_000 + position * 60
}

impl TestSource {
    fn echo(&self) -> Vec<NotificationRecord> {
        vec![NotificationRecord::new(
            self.kind,
            self.bearer.clone().unwrap_or_else(|| "anonymous".to_string()),
            "test",
            from_epoch_millis(echo_date_secs(self.kind) * 1000),
            true,
            "#",
        )]
    }
}

#[async_trait]
impl Source for TestSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_notifications(&self) -> Vec<NotificationRecord> {
        match &self.behaviour {
            Behaviour::Echo => self.echo(),
            Behaviour::Delayed(delay) => {
                tokio::time::sleep(*delay).await;
                self.echo()
            }
            Behaviour::Dated(dates) => dates
                .iter()
                .map(|secs| {
                    NotificationRecord::new(
                        self.kind,
                        format!("{}-{}", self.kind, secs),
                        "test",
                        from_epoch_millis(secs * 1000),
                        false,
                        "#",
                    )
                })
                .collect(),
            Behaviour::Failing => Vec::new(),
            Behaviour::Panicking => panic!("source contract violated"),
            Behaviour::Slow => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Vec::new()
            }
        }
    }

    async fn authorize(&self) -> Result<(), SourceError> {
        match (self.kind, &self.bearer) {
            (SourceKind::Mail, None) => Err(SourceError::AuthenticationRequired),
            _ => Ok(()),
        }
    }

    fn renewal_path(&self) -> Option<&str> {
        (self.kind == SourceKind::Mail).then_some(MAIL_AUTH_PATH)
    }

    /// The mail double's callback treats `?code=` as the renewed token.
    fn routes(&self, on_renewal: RenewalCallback) -> Option<Router> {
        if self.kind != SourceKind::Mail {
            return None;
        }
        let callback = move |Query(params): Query<HashMap<String, String>>| {
            let on_renewal = on_renewal.clone();
            async move {
                let code = params.get("code").cloned().unwrap_or_default();
                match on_renewal(SourceKind::Mail, Credential::Token(code)).await {
                    Ok(()) => StatusCode::SEE_OTHER,
                    Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
                }
            }
        };
        Some(Router::new().route(MAIL_CALLBACK_PATH, get(callback)))
    }
}

/// Factory of [`TestSource`]s. Every build is recorded.
#[derive(Default)]
pub struct TestFactory {
    behaviours: HashMap<SourceKind, Behaviour>,
    builds: Mutex<Vec<(SourceKind, Option<String>)>>,
}

#[allow(dead_code)]
impl TestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the default `Echo` behaviour for `kind`.
    pub fn with(mut self, kind: SourceKind, behaviour: Behaviour) -> Self {
        self.behaviours.insert(kind, behaviour);
        self
    }

    /// Every `(kind, bearer)` the factory has built, in order.
    pub fn builds(&self) -> Vec<(SourceKind, Option<String>)> {
        self.builds.lock().unwrap().clone()
    }
}

impl SourceFactory for TestFactory {
    fn build(
        &self,
        kind: SourceKind,
        _config: &IntegrationsConfig,
        credential: Option<&Credential>,
    ) -> Result<Arc<dyn Source>, SourceError> {
        let bearer = credential.and_then(Credential::bearer).map(str::to_string);
        if bearer.as_deref() == Some(BROKEN_TOKEN) {
            return Err(SourceError::Configuration("unusable credential".into()));
        }
        self.builds.lock().unwrap().push((kind, bearer.clone()));

        Ok(Arc::new(TestSource {
            kind,
            bearer,
            behaviour: self
                .behaviours
                .get(&kind)
                .cloned()
                .unwrap_or(Behaviour::Echo),
        }))
    }
}

/// Integrations file with exactly `kinds` enabled.
pub fn integrations(kinds: &[SourceKind]) -> IntegrationsConfig {
    let enabled = |kind: SourceKind| kinds.contains(&kind);
    IntegrationsConfig {
        integrations: Integrations {
            gmail: enabled(SourceKind::Mail).then(|| GmailSettings {
                enabled: true,
                ..GmailSettings::default()
            }),
            github: enabled(SourceKind::CodeHost).then(|| GithubSettings {
                enabled: true,
                ..GithubSettings::default()
            }),
            slack: enabled(SourceKind::Chat).then(|| SlackSettings {
                enabled: true,
                ..SlackSettings::default()
            }),
            notion: enabled(SourceKind::Notes).then(|| NotionSettings {
                enabled: true,
                ..NotionSettings::default()
            }),
            mock: enabled(SourceKind::Synthetic).then(|| MockSettings {
                enabled: true,
                ..MockSettings::default()
            }),
            ..Integrations::default()
        },
        ..IntegrationsConfig::default()
    }
}

/// Adjacent records are ordered newest first.
#[allow(dead_code)]
pub fn is_newest_first(records: &[NotificationRecord]) -> bool {
    records.windows(2).all(|pair| pair[0].date >= pair[1].date)
}
