//! Notion source
//!
//! Reads the workspace notification log through the private web API,
//! authenticated with the `token_v2` session cookie. The response is a
//! normalized record map, so every notification is resolved by following
//! ids across its tables.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::trait_::{Source, SourceError, check_status, http_client, or_empty};
use crate::config::NotionSettings;
use crate::credentials::Credential;
use crate::models::notification::from_epoch_millis;
use crate::models::{NotificationRecord, PLACEHOLDER_LINK, SourceKind};

const NOTION_API_BASE: &str = "https://www.notion.so";
const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationLogRequest<'a> {
    space_id: &'a str,
    size: u32,
    #[serde(rename = "type")]
    kind: &'static str,
    variant: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationLogResponse {
    #[serde(default)]
    notification_ids: Vec<String>,
    #[serde(default)]
    record_map: Value,
}

pub struct NotionSource {
    token: Option<String>,
    space_id: Option<String>,
    api_base: String,
    page_size: u32,
    http_client: Client,
}

impl NotionSource {
    pub fn new(
        settings: &NotionSettings,
        credential: Option<&Credential>,
    ) -> Result<Self, SourceError> {
        let token = credential
            .and_then(Credential::bearer)
            .map(str::to_string)
            .or_else(|| settings.token.clone().filter(|t| !t.is_empty()));

        Ok(Self {
            token,
            space_id: settings.space_id.clone().filter(|s| !s.is_empty()),
            api_base: settings
                .api_base
                .clone()
                .unwrap_or_else(|| NOTION_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            page_size: settings.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            http_client: http_client()?,
        })
    }

    async fn fetch(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        let token = self.token.as_deref().ok_or_else(|| {
            SourceError::Configuration("Notion token_v2 cookie is not set".to_string())
        })?;
        let space_id = self
            .space_id
            .as_deref()
            .ok_or_else(|| SourceError::Configuration("Notion space_id is not set".to_string()))?;

        let response = self
            .http_client
            .post(format!("{}/api/v3/getNotificationLogV2", self.api_base))
            .header("Cookie", format!("token_v2={}", token))
            .json(&NotificationLogRequest {
                space_id,
                size: self.page_size,
                kind: "unread_and_read",
                variant: "no_grouping",
            })
            .send()
            .await?;
        let log: NotificationLogResponse = check_status(response).await?.json().await?;

        debug!(
            count = log.notification_ids.len(),
            "Notion notification log received"
        );

        Ok(log
            .notification_ids
            .iter()
            .map(|id| resolve(&log.record_map, id))
            .collect())
    }
}

/// `recordMap.<table>.<id>.value`
fn lookup<'a>(record_map: &'a Value, table: &str, id: &str) -> Option<&'a Value> {
    record_map.get(table)?.get(id)?.get("value")
}

/// Epoch milliseconds stored either as a number or as a numeric string.
fn epoch_millis(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Plain text of a rich-text value (`[["Hello "], ["world", [["b"]]]]`).
fn rich_text(text: &Value) -> Option<String> {
    let segments = text.as_array()?;
    Some(
        segments
            .iter()
            .filter_map(|segment| segment.get(0).and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn resolve(record_map: &Value, notification_id: &str) -> NotificationRecord {
    let notification = lookup(record_map, "notification", notification_id);
    let activity = notification
        .and_then(|n| n.get("activity_id"))
        .and_then(Value::as_str)
        .and_then(|id| lookup(record_map, "activity", id));
    let block = activity
        .and_then(|a| {
            a.get("navigable_block_id")
                .and_then(Value::as_str)
                .or_else(|| a.get("parent_id").and_then(Value::as_str))
        })
        .and_then(|id| lookup(record_map, "block", id));

    let first_edit = activity
        .and_then(|a| a.get("edits"))
        .and_then(|e| e.get(0));
    let actor = first_edit
        .and_then(|e| e.pointer("/authors/0/id"))
        .and_then(Value::as_str)
        .and_then(|id| lookup(record_map, "notion_user", id));
    let comment = first_edit
        .and_then(|e| e.get("comment_id"))
        .and_then(Value::as_str)
        .and_then(|id| lookup(record_map, "comment", id));

    let comment_texts = activity
        .and_then(|a| a.get("edits"))
        .and_then(Value::as_array)
        .map(|edits| {
            edits
                .iter()
                .filter(|edit| edit.get("type").and_then(Value::as_str) == Some("comment-created"))
                .filter_map(|edit| edit.pointer("/comment_data/text").and_then(rich_text))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default();

    let title = block
        .and_then(|b| b.pointer("/properties/title/0/0"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled");
    let from = actor
        .and_then(|a| a.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown User");
    let date = epoch_millis(activity.and_then(|a| a.get("end_time")))
        .or_else(|| epoch_millis(notification.and_then(|n| n.get("end_time"))))
        .unwrap_or(0);
    let link = block
        .and_then(|b| b.get("id"))
        .and_then(Value::as_str)
        .map(|id| format!("https://www.notion.so/{}", id.replace('-', "")))
        .unwrap_or_else(|| PLACEHOLDER_LINK.to_string());
    let kind = notification
        .and_then(|n| n.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("Update");
    let read = notification
        .and_then(|n| n.get("read"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = if comment_texts.is_empty() {
        activity
            .and_then(|a| a.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    } else {
        comment_texts
    };

    let mut record = NotificationRecord::new(
        SourceKind::Notes,
        title,
        from,
        from_epoch_millis(date),
        !read,
        link,
    )
    .with_id(notification_id)
    .with_kind(kind)
    .with_raw(json!({
        "activity": activity,
        "block": block,
        "notification": notification,
        "actor": actor,
        "comment": comment,
    }));
    if !content.is_empty() {
        record = record.with_content(content);
    }
    record
}

#[async_trait]
impl Source for NotionSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Notes
    }

    async fn fetch_notifications(&self) -> Vec<NotificationRecord> {
        or_empty(self.kind(), self.fetch().await)
    }
}
