//! Slack source
//!
//! Walks the member's conversations and reports their latest messages.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::trait_::{Source, SourceError, check_status, http_client, or_empty};
use crate::config::SlackSettings;
use crate::credentials::Credential;
use crate::models::notification::{epoch_zero, from_epoch_millis};
use crate::models::{NotificationRecord, PLACEHOLDER_LINK, SourceKind};

const SLACK_API_BASE: &str = "https://slack.com/api";
const DEFAULT_HISTORY_LIMIT: u32 = 10;
const UNKNOWN_USER: &str = "Unknown User";

/// Every Web API response carries `ok` and, on failure, `error`.
#[derive(Debug, Deserialize)]
struct SlackEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelList {
    #[serde(default)]
    channels: Vec<SlackChannel>,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_channel: bool,
}

#[derive(Debug, Default, Deserialize)]
struct History {
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    is_read: bool,
}

#[derive(Debug, Default, Deserialize)]
struct UserInfo {
    #[serde(default)]
    user: Option<SlackUser>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

pub struct SlackSource {
    token: Option<String>,
    api_base: String,
    history_limit: u32,
    http_client: Client,
}

impl SlackSource {
    pub fn new(
        settings: &SlackSettings,
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
                .unwrap_or_else(|| SLACK_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            history_limit: settings.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            http_client: http_client()?,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self
            .http_client
            .get(format!("{}/{}", self.api_base, method))
            .query(query)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;
        let envelope: SlackEnvelope<T> = check_status(response).await?.json().await?;

        if !envelope.ok {
            return Err(SourceError::Api(format!(
                "{} failed: {}",
                method,
                envelope.error.as_deref().unwrap_or("unknown_error")
            )));
        }
        Ok(envelope.body)
    }

    /// Display name of `user_id`, looked up once per fetch round.
    async fn display_name(
        &self,
        token: &str,
        user_id: Option<&str>,
        cache: &mut HashMap<String, String>,
    ) -> String {
        let Some(user_id) = user_id else {
            return UNKNOWN_USER.to_string();
        };
        if let Some(name) = cache.get(user_id) {
            return name.clone();
        }

        let name = match self
            .call::<UserInfo>(token, "users.info", &[("user", user_id.to_string())])
            .await
        {
            Ok(info) => info
                .user
                .and_then(|user| user.real_name.filter(|n| !n.is_empty()).or(user.name))
                .unwrap_or_else(|| user_id.to_string()),
            Err(err) => {
                warn!(user = user_id, error = %err, "Slack user lookup failed");
                user_id.to_string()
            }
        };
        cache.insert(user_id.to_string(), name.clone());
        name
    }

    async fn fetch(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        let token = self
            .token
            .as_deref()
            .ok_or(SourceError::AuthenticationRequired)?;

        let conversations: ChannelList = self
            .call(
                token,
                "conversations.list",
                &[
                    ("types", "public_channel,private_channel,im".to_string()),
                    ("exclude_archived", "true".to_string()),
                ],
            )
            .await?;

        debug!(
            channels = conversations.channels.len(),
            "Slack conversations listed"
        );

        let mut users = HashMap::new();
        let mut records = Vec::new();
        for channel in conversations.channels {
            let history: History = self
                .call(
                    token,
                    "conversations.history",
                    &[
                        ("channel", channel.id.clone()),
                        ("limit", self.history_limit.to_string()),
                    ],
                )
                .await?;

            let title = match &channel.name {
                Some(name) if !name.is_empty() => format!("#{}", name),
                _ => "Direct Message".to_string(),
            };
            let kind = if channel.is_channel {
                "Channel"
            } else {
                "Direct Message"
            };

            for message in history.messages {
                let from = self
                    .display_name(token, message.user.as_deref(), &mut users)
                    .await;
                let date = message
                    .ts
                    .as_deref()
                    .and_then(parse_ts)
                    .unwrap_or_else(epoch_zero);
                let link = message
                    .permalink
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| PLACEHOLDER_LINK.to_string());

                let mut record = NotificationRecord::new(
                    SourceKind::Chat,
                    title.clone(),
                    from,
                    date,
                    !message.is_read,
                    link,
                )
                .with_kind(kind);
                if let Some(text) = message.text {
                    record = record.with_content(text);
                }
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Slack timestamps are fractional epoch seconds (`"1700000000.123456"`).
fn parse_ts(ts: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let seconds: f64 = ts.parse().ok()?;
    Some(from_epoch_millis((seconds * 1000.0) as i64))
}

#[async_trait]
impl Source for SlackSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Chat
    }

    async fn fetch_notifications(&self) -> Vec<NotificationRecord> {
        or_empty(self.kind(), self.fetch().await)
    }
}
