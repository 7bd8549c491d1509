//! Durable credential storage
//!
//! The store holds the full credential mapping and is rewritten as a whole on
//! every renewal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use super::Credentials;

/// Errors raised while reading or writing the credential store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read credential store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write credential store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("credential store {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode credentials: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the last persisted mapping. An absent store is an empty mapping.
    async fn load(&self) -> Result<Credentials, StoreError>;

    /// Replace the persisted mapping with `credentials`.
    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;
}

/// JSON file store (`tokens.json`).
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tokens.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credentials, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No credential store found, starting empty");
                let empty = Credentials::new();
                self.save(&empty).await?;
                return Ok(empty);
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(credentials)?;
        let temp_path = self.temp_path();

        tokio::fs::write(&temp_path, encoded)
            .await
            .map_err(|source| StoreError::Write {
                path: temp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            path = %self.path.display(),
            entries = credentials.len(),
            "Credential store written"
        );
        Ok(())
    }
}
