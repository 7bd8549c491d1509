//! Per-source credentials
//!
//! Credentials are replaced wholesale on renewal and never mutated in place.
//! The [`store`] module persists them, [`lifecycle`] coordinates renewal.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::SourceKind;

pub mod lifecycle;
pub mod store;

pub use lifecycle::{CredentialLifecycle, RenewalError};
pub use store::{CredentialStore, FileCredentialStore, StoreError};

/// OAuth token bundle as returned by a provider token endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokenBundle {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiry as epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    /// Provider fields this crate does not interpret (e.g. `id_token`)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OAuthTokenBundle {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            scope: None,
            token_type: None,
            expiry_date: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl fmt::Debug for OAuthTokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenBundle")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expiry_date", &self.expiry_date)
            .finish()
    }
}

/// Secret material for one source: a bare token or an OAuth bundle.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    Token(String),
    OAuth(OAuthTokenBundle),
}

impl Credential {
    /// Bearer value usable in an `Authorization` header or cookie.
    pub fn bearer(&self) -> Option<&str> {
        let token = match self {
            Credential::Token(token) => token.as_str(),
            Credential::OAuth(bundle) => bundle.access_token.as_str(),
        };
        (!token.is_empty()).then_some(token)
    }

    /// The credential as an OAuth bundle; a bare token becomes an access token.
    pub fn to_oauth_bundle(&self) -> OAuthTokenBundle {
        match self {
            Credential::Token(token) => OAuthTokenBundle::new(token.clone()),
            Credential::OAuth(bundle) => bundle.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token([REDACTED])"),
            Credential::OAuth(bundle) => f.debug_tuple("OAuth").field(bundle).finish(),
        }
    }
}

/// Integration name to last persisted credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, Credential>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: SourceKind) -> Option<&Credential> {
        self.0.get(kind.config_key())
    }

    /// Replace the credential stored for `kind`.
    pub fn insert(&mut self, kind: SourceKind, credential: Credential) {
        self.0.insert(kind.config_key().to_string(), credential);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
