//! # Feed Handlers
//!
//! The merged feed as an HTML page and as JSON.

use axum::{
    extract::{Query, State},
    response::{Html, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::NotificationRecord;
use crate::models::notification::PLACEHOLDER_LINK;
use crate::server::AppState;

const PAGE_TEMPLATE: &str = include_str!("../../templates/index.html");
const NOTIFICATIONS_MARKER: &str = "<!-- Notifications will be inserted here -->";

/// Query parameters for the JSON feed
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct FeedQuery {
    /// Return the last merged feed instead of fetching (default: false)
    #[serde(default)]
    pub cached: bool,
}

/// Merged feed, newest first
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedResponse {
    /// Number of notifications in the feed
    pub count: usize,
    /// Notifications sorted by date descending
    pub notifications: Vec<NotificationRecord>,
}

/// Render the merged feed as an HTML page
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Rendered feed", content_type = "text/html", body = String),
        (status = 302, description = "Mail credential must be renewed first")
    ),
    tag = "feed"
)]
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let records = state.manager.fetch_all().await;
    Html(render_page(&records))
}

/// List the merged feed as JSON
#[utoipa::path(
    get,
    path = "/api/notifications",
    params(FeedQuery),
    responses(
        (status = 200, description = "Merged feed", body = FeedResponse),
        (status = 302, description = "Mail credential must be renewed first")
    ),
    tag = "feed"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Json<FeedResponse> {
    let notifications = if query.cached {
        state.manager.latest()
    } else {
        state.manager.fetch_all().await
    };

    Json(FeedResponse {
        count: notifications.len(),
        notifications,
    })
}

/// Insert the rendered records into the page template.
pub fn render_page(records: &[NotificationRecord]) -> String {
    let list = if records.is_empty() {
        "<p class=\"empty\">No notifications.</p>".to_string()
    } else {
        records.iter().map(render_notification).collect()
    };
    PAGE_TEMPLATE.replace(NOTIFICATIONS_MARKER, &list)
}

fn render_notification(record: &NotificationRecord) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<div class=\"notification{}\">\n",
        if record.unread { " unread" } else { "" }
    ));
    html.push_str(&format!(
        "    <div class=\"source-badge {}\">{}</div>\n",
        record.source.config_key(),
        record.source.display_name()
    ));
    html.push_str(&format!(
        "    <h3><a href=\"{}\" target=\"_blank\" rel=\"noopener\">{}</a></h3>\n",
        escape_html(safe_link(&record.link)),
        escape_html(&record.title)
    ));
    html.push_str(&format!("    <p>From: {}</p>\n", escape_html(&record.from)));
    html.push_str(&format!("    <p>Date: {}</p>\n", record.date.to_rfc3339()));
    if let Some(content) = record.content.as_deref().filter(|c| !c.is_empty()) {
        html.push_str(&format!(
            "    <p class=\"notification-content\">{}</p>\n",
            escape_html(content)
        ));
    }
    if let Some(kind) = record.kind.as_deref().filter(|k| !k.is_empty()) {
        html.push_str(&format!(
            "    <span class=\"type-badge\">{}</span>\n",
            escape_html(kind)
        ));
    }
    if record.unread {
        html.push_str("    <span class=\"unread-badge\">Unread</span>\n");
    }
    let debug = serde_json::to_string_pretty(record).unwrap_or_default();
    html.push_str(&format!(
        "    <details class=\"debug-info\">\n        <summary>Debug Info</summary>\n        <pre>{}</pre>\n    </details>\n",
        escape_html(&debug)
    ));
    html.push_str("</div>\n");
    html
}

/// Only http(s) links are rendered as-is.
fn safe_link(link: &str) -> &str {
    let lower = link.trim_start().to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        link
    } else {
        PLACEHOLDER_LINK
    }
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
