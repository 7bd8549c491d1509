//! GitHub source
//!
//! Reads the authenticated user's unread notification threads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::trait_::{Source, SourceError, check_status, http_client, or_empty};
use crate::config::GithubSettings;
use crate::credentials::Credential;
use crate::models::{NotificationRecord, SourceKind};

const GITHUB_API_BASE: &str = "https://api.github.com";
const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Debug, Deserialize)]
struct GithubNotification {
    id: String,
    unread: bool,
    updated_at: DateTime<Utc>,
    subject: GithubSubject,
    repository: GithubRepository,
}

#[derive(Debug, Deserialize)]
struct GithubSubject {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GithubRepository {
    full_name: String,
}

pub struct GitHubSource {
    token: Option<String>,
    api_base: String,
    per_page: u32,
    http_client: Client,
}

impl GitHubSource {
    /// Build from the `github` section; a stored credential wins over the
    /// section's static token.
    pub fn new(
        settings: &GithubSettings,
        credential: Option<&Credential>,
    ) -> Result<Self, SourceError> {
        let token = credential
            .and_then(Credential::bearer)
            .map(str::to_string)
            .or_else(|| settings.token.clone().filter(|t| !t.is_empty()));

        Ok(Self {
            token,
            api_base: settings
                .api_base
                .clone()
                .unwrap_or_else(|| GITHUB_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            per_page: settings.per_page.unwrap_or(DEFAULT_PER_PAGE),
            http_client: http_client()?,
        })
    }

    async fn fetch(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        let token = self
            .token
            .as_deref()
            .ok_or(SourceError::AuthenticationRequired)?;

        let response = self
            .http_client
            .get(format!("{}/notifications", self.api_base))
            .query(&[("per_page", self.per_page.to_string()), ("all", "false".to_string())])
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let payload: Vec<Value> = check_status(response).await?.json().await?;

        debug!(count = payload.len(), "GitHub notifications received");

        let records = payload
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<GithubNotification>(raw.clone()) {
                Ok(notification) => Some(normalize(notification, raw)),
                Err(err) => {
                    warn!(error = %err, "Skipping malformed GitHub notification");
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

fn normalize(notification: GithubNotification, raw: Value) -> NotificationRecord {
    let link = web_url(&notification);
    NotificationRecord::new(
        SourceKind::CodeHost,
        notification.subject.title,
        notification.repository.full_name,
        notification.updated_at,
        notification.unread,
        link,
    )
    .with_id(notification.id)
    .with_kind(notification.subject.kind)
    .with_raw(raw)
}

/// Browser URL of a notification thread. Issues and pull requests link to
/// the item itself, everything else to the repository.
fn web_url(notification: &GithubNotification) -> String {
    match (notification.subject.kind.as_str(), &notification.subject.url) {
        ("Issue" | "PullRequest", Some(url)) => url
            .replace("api.github.com/repos", "github.com")
            .replace("/pulls/", "/pull/"),
        _ => format!("https://github.com/{}", notification.repository.full_name),
    }
}

#[async_trait]
impl Source for GitHubSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CodeHost
    }

    async fn fetch_notifications(&self) -> Vec<NotificationRecord> {
        or_empty(self.kind(), self.fetch().await)
    }
}
