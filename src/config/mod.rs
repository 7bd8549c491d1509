//! Configuration loading for notifeed.
//!
//! Process settings come from layered `.env` files and environment variables
//! prefixed with `NOTIFEED_`, producing a typed [`AppConfig`]. The per-source
//! settings live in a separate JSON file, see [`integrations`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod integrations;

pub use integrations::{
    GithubSettings, GmailSettings, IntegrationsConfig, MockSettings, NotionSettings,
    SlackSettings,
};

const ENV_PREFIX: &str = "NOTIFEED_";

/// Application configuration derived from `NOTIFEED_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Path of the integrations JSON file
    #[serde(default = "default_integrations_path")]
    pub integrations_path: PathBuf,
    /// Path of the credential store JSON file
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    /// Upper bound on a single source fetch
    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    /// Externally reachable base URL, used for OAuth redirect defaults
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            integrations_path: default_integrations_path(),
            credentials_path: default_credentials_path(),
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// Redirect URI of the mail OAuth callback derived from the public base URL.
    pub fn default_mail_redirect_uri(&self) -> String {
        format!(
            "{}/auth/gmail/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }

    /// Returns a pretty JSON representation for startup logging.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        // Nothing secret lives here; tokens are in the integrations file.
        serde_json::to_string_pretty(self)
    }

    /// Validates the configuration, returning an error on out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=300).contains(&self.fetch_timeout_seconds) {
            return Err(ConfigError::InvalidFetchTimeout {
                value: self.fetch_timeout_seconds,
            });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if let Err(source) = url::Url::parse(&self.public_base_url) {
            return Err(ConfigError::InvalidPublicBaseUrl {
                value: self.public_base_url.clone(),
                source,
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_integrations_path() -> PathBuf {
    PathBuf::from("config.json")
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("tokens.json")
}

fn default_fetch_timeout_seconds() -> u64 {
    30
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("fetch timeout must be between 1 and 300 seconds, got {value}")]
    InvalidFetchTimeout { value: u64 },
    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid public base url '{value}': {source}")]
    InvalidPublicBaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("failed to read integrations file {path}: {source}")]
    IntegrationsRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("integrations file {path} is malformed: {source}")]
    IntegrationsMalformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write integrations file {path}: {source}")]
    IntegrationsWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Loads configuration using layered `.env` files and `NOTIFEED_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let integrations_path = layered
            .remove("INTEGRATIONS_PATH")
            .filter(|v| !v.is_empty())
            .map(|v| self.resolve(v))
            .unwrap_or_else(|| self.resolve_default(default_integrations_path()));
        let credentials_path = layered
            .remove("CREDENTIALS_PATH")
            .filter(|v| !v.is_empty())
            .map(|v| self.resolve(v))
            .unwrap_or_else(|| self.resolve_default(default_credentials_path()));
        let fetch_timeout_seconds = match layered
            .remove("FETCH_TIMEOUT_SECONDS")
            .filter(|v| !v.is_empty())
        {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: "NOTIFEED_FETCH_TIMEOUT_SECONDS",
                    value,
                })?,
            None => default_fetch_timeout_seconds(),
        };
        let public_base_url = layered
            .remove("PUBLIC_BASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_public_base_url);

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            integrations_path,
            credentials_path,
            fetch_timeout_seconds,
            public_base_url,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn resolve(&self, value: String) -> PathBuf {
        self.resolve_default(PathBuf::from(value))
    }

    fn resolve_default(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("NOTIFEED_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
