//! Normalized notification record
//!
//! Every source translates its origin payload into [`NotificationRecord`]
//! before handing it to the integration manager.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Link used when a source cannot resolve a deep link to the origin.
pub const PLACEHOLDER_LINK: &str = "#";

/// Integration that produced a record. Also used to tag active sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum SourceKind {
    Mail,
    CodeHost,
    Chat,
    Notes,
    Synthetic,
}

impl SourceKind {
    /// Fixed construction order of the active source list.
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Mail,
        SourceKind::CodeHost,
        SourceKind::Chat,
        SourceKind::Notes,
        SourceKind::Synthetic,
    ];

    /// Key of this integration in the integrations file and credential store.
    pub const fn config_key(self) -> &'static str {
        match self {
            SourceKind::Mail => "gmail",
            SourceKind::CodeHost => "github",
            SourceKind::Chat => "slack",
            SourceKind::Notes => "notion",
            SourceKind::Synthetic => "mock",
        }
    }

    /// Human-facing label shown on the rendered feed.
    pub const fn display_name(self) -> &'static str {
        match self {
            SourceKind::Mail => "Gmail",
            SourceKind::CodeHost => "GitHub",
            SourceKind::Chat => "Slack",
            SourceKind::Notes => "Notion",
            SourceKind::Synthetic => "Mock",
        }
    }

    /// Resolve a config/credential key back to its kind.
    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.config_key() == key)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// The common schema every source emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationRecord {
    /// Source-native identifier, not unique across sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub source: SourceKind,
    pub from: String,
    /// Sole sort key of the merged feed
    pub date: DateTime<Utc>,
    pub unread: bool,
    /// Deep link to the origin, `#` when unresolvable
    pub link: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Origin payload kept for debugging, never interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub raw: Option<serde_json::Value>,
}

impl NotificationRecord {
    /// Create a record with the required fields; optional fields start empty.
    pub fn new(
        source: SourceKind,
        title: impl Into<String>,
        from: impl Into<String>,
        date: DateTime<Utc>,
        unread: bool,
        link: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            source,
            from: from.into(),
            date,
            unread,
            link: link.into(),
            kind: None,
            content: None,
            raw: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Epoch zero, the default date for records whose origin carries no usable timestamp.
pub fn epoch_zero() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Convert epoch milliseconds to a timestamp, falling back to epoch zero.
pub fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(epoch_zero)
}

/// Sort records newest first. Equal dates keep no particular order.
pub fn sort_newest_first(records: &mut [NotificationRecord]) {
    records.sort_unstable_by(|a, b| b.date.cmp(&a.date));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_date_as_rfc3339_and_skips_empty_fields() {
        let record = NotificationRecord::new(
            SourceKind::CodeHost,
            "Fix login",
            "octo/repo",
            from_epoch_millis(1_700_000_000_000),
            true,
            "https://github.com/octo/repo",
        )
        .with_kind("Issue");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["date"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(value["source"], json!("CodeHost"));
        assert_eq!(value["type"], json!("Issue"));
        assert!(value.get("id").is_none());
        assert!(value.get("content").is_none());
        assert!(value.get("raw").is_none());
    }

    #[test]
    fn out_of_range_epoch_defaults_to_zero() {
        assert_eq!(from_epoch_millis(i64::MAX), epoch_zero());
    }

    #[test]
    fn config_keys_resolve_back_to_kinds() {
        for kind in SourceKind::ALL {
            assert_eq!(SourceKind::from_config_key(kind.config_key()), Some(kind));
        }
        assert_eq!(SourceKind::from_config_key("jira"), None);
    }

    #[test]
    fn sorts_newest_first() {
        let mut records: Vec<_> = [3, 1, 2]
            .into_iter()
            .map(|secs| {
                NotificationRecord::new(
                    SourceKind::Synthetic,
                    "t",
                    "f",
                    from_epoch_millis(secs * 1000),
                    false,
                    PLACEHOLDER_LINK,
                )
            })
            .collect();

        sort_newest_first(&mut records);
        let order: Vec<i64> = records.iter().map(|r| r.date.timestamp()).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
