//! Integrations file (`config.json`)
//!
//! Each section carries `enabled` plus integration-specific static fields.
//! Fields this crate does not know about are kept so that rewriting the file
//! never drops user data.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::ConfigError;
use crate::models::SourceKind;

/// Top-level shape of the integrations file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub integrations: Integrations,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmail: Option<GmailSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notion: Option<NotionSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<MockSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Mail OAuth client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GmailSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<GmailClientFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Downloaded OAuth client file (`{"installed": {...}}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GmailClientFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<InstalledClient>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstalledClient {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl std::fmt::Debug for InstalledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl GmailSettings {
    /// The `installed` OAuth client, if the section carries one.
    pub fn installed_client(&self) -> Option<&InstalledClient> {
        self.credentials.as_ref().and_then(|c| c.installed.as_ref())
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GithubSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Messages read per conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotionSettings {
    #[serde(default)]
    pub enabled: bool,
    /// `token_v2` session cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! redacted_token_debug {
    ($ty:ident { $($field:ident),* }) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("enabled", &self.enabled)
                    .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
                    $(.field(stringify!($field), &self.$field))*
                    .finish()
            }
        }
    };
}

redacted_token_debug!(GithubSettings { api_base, per_page });
redacted_token_debug!(SlackSettings { api_base, history_limit });
redacted_token_debug!(NotionSettings { space_id, api_base, page_size });

impl IntegrationsConfig {
    /// Read and parse the integrations file. Absence and malformed JSON are
    /// both errors; the process cannot start without it.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ConfigError::IntegrationsRead {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::IntegrationsMalformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Rewrite the integrations file as pretty JSON (temp file + rename).
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let encoded =
            serde_json::to_vec_pretty(self).map_err(|source| ConfigError::IntegrationsMalformed {
                path: path.to_path_buf(),
                source,
            })?;

        let mut temp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        temp_name.push(".tmp");
        let temp_path: PathBuf = path.with_file_name(temp_name);

        tokio::fs::write(&temp_path, encoded)
            .await
            .map_err(|source| ConfigError::IntegrationsWrite {
                path: temp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|source| ConfigError::IntegrationsWrite {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(path = %path.display(), "Integrations file written");
        Ok(())
    }

    /// Whether the section for `kind` exists and says `enabled: true`.
    pub fn is_enabled(&self, kind: SourceKind) -> bool {
        let sections = &self.integrations;
        match kind {
            SourceKind::Mail => sections.gmail.as_ref().is_some_and(|s| s.enabled),
            SourceKind::CodeHost => sections.github.as_ref().is_some_and(|s| s.enabled),
            SourceKind::Chat => sections.slack.as_ref().is_some_and(|s| s.enabled),
            SourceKind::Notes => sections.notion.as_ref().is_some_and(|s| s.enabled),
            SourceKind::Synthetic => sections.mock.as_ref().is_some_and(|s| s.enabled),
        }
    }

    /// Enabled integrations in construction order.
    pub fn enabled_kinds(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Store a freshly captured notes session cookie in the `notion` section.
    /// A missing section is created disabled so the token is not lost.
    pub fn set_notion_token(&mut self, token: impl Into<String>) {
        self.integrations
            .notion
            .get_or_insert_with(NotionSettings::default)
            .token = Some(token.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Value {
        json!({
            "integrations": {
                "gmail": {
                    "enabled": true,
                    "credentials": { "installed": {
                        "client_id": "cid",
                        "client_secret": "secret",
                        "project_id": "demo"
                    } }
                },
                "github": { "enabled": true, "token": "ghp_x" },
                "slack": { "enabled": false, "token": "xoxp" },
                "notion": { "enabled": true, "space_id": "space", "theme": "dark" },
                "mock": { "enabled": true }
            },
            "title": "My feed"
        })
    }

    #[test]
    fn enabled_kinds_follow_construction_order() {
        let config: IntegrationsConfig = serde_json::from_value(sample()).unwrap();
        assert_eq!(
            config.enabled_kinds(),
            vec![
                SourceKind::Mail,
                SourceKind::CodeHost,
                SourceKind::Notes,
                SourceKind::Synthetic
            ]
        );
        assert!(!config.is_enabled(SourceKind::Chat));
    }

    #[test]
    fn missing_enabled_flag_means_disabled() {
        let config: IntegrationsConfig =
            serde_json::from_value(json!({ "integrations": { "mock": {} } })).unwrap();
        assert!(config.enabled_kinds().is_empty());
    }

    #[tokio::test]
    async fn rewrite_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample().to_string()).unwrap();

        let mut config = IntegrationsConfig::load(&path).await.unwrap();
        config.set_notion_token("abc123");
        config.save(&path).await.unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["title"], json!("My feed"));
        assert_eq!(written["integrations"]["notion"]["token"], json!("abc123"));
        assert_eq!(written["integrations"]["notion"]["theme"], json!("dark"));
        assert_eq!(
            written["integrations"]["gmail"]["credentials"]["installed"]["project_id"],
            json!("demo")
        );
    }

    #[tokio::test]
    async fn missing_or_malformed_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        assert!(matches!(
            IntegrationsConfig::load(&path).await,
            Err(ConfigError::IntegrationsRead { .. })
        ));

        std::fs::write(&path, "{\"integrations\": ").unwrap();
        assert!(matches!(
            IntegrationsConfig::load(&path).await,
            Err(ConfigError::IntegrationsMalformed { .. })
        ));
    }

    #[test]
    fn set_notion_token_creates_disabled_section() {
        let mut config = IntegrationsConfig::default();
        config.set_notion_token("abc123");
        let notion = config.integrations.notion.as_ref().unwrap();
        assert_eq!(notion.token.as_deref(), Some("abc123"));
        assert!(!notion.enabled);
    }
}
