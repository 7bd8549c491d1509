//! Gmail source
//!
//! Lists unread inbox messages and owns the OAuth renewal handshake:
//! `GET /auth/gmail` redirects to the consent screen and
//! `GET /auth/gmail/callback` exchanges the code and hands the fresh token
//! bundle to the renewal callback.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::trait_::{RenewalCallback, Source, SourceError, check_status, http_client, or_empty};
use crate::config::GmailSettings;
use crate::credentials::{Credential, OAuthTokenBundle};
use crate::error::{ApiError, bad_request, internal_error};
use crate::models::notification::{epoch_zero, from_epoch_millis};
use crate::models::{NotificationRecord, SourceKind};

/// Gmail read-only scope
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Route that starts the consent flow
pub const AUTH_PATH: &str = "/auth/gmail";
/// Route the provider redirects back to
pub const CALLBACK_PATH: &str = "/auth/gmail/callback";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const DEFAULT_MAX_RESULTS: u32 = 20;
const UNREAD_INBOX_QUERY: &str = "is:unread in:inbox";
/// Access tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_MS: i64 = 60_000;
/// Outstanding consent redirects remembered for state validation.
const MAX_PENDING_STATES: usize = 32;

/// Google OAuth token response
#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl GoogleTokenResponse {
    fn into_bundle(self, previous_refresh_token: Option<String>) -> OAuthTokenBundle {
        let mut bundle = OAuthTokenBundle::new(self.access_token);
        bundle.refresh_token = self.refresh_token.or(previous_refresh_token);
        bundle.scope = self.scope;
        bundle.token_type = self.token_type;
        bundle.expiry_date = self
            .expires_in
            .map(|secs| Utc::now().timestamp_millis() + secs * 1000);
        if let Some(id_token) = self.id_token {
            bundle.extra.insert("id_token".to_string(), json!(id_token));
        }
        bundle
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    size_estimate: Option<u64>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct MessageHeader {
    name: String,
    value: String,
}

/// OAuth client settings shared by the source and its routes.
#[derive(Clone)]
pub struct GmailOAuthClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    http_client: Client,
}

impl GmailOAuthClient {
    /// Build from the `gmail` section. The `credentials.installed` client is
    /// mandatory.
    pub fn from_settings(
        settings: &GmailSettings,
        default_redirect_uri: &str,
    ) -> Result<Self, SourceError> {
        let installed = settings
            .installed_client()
            .filter(|c| !c.client_id.is_empty())
            .ok_or_else(|| {
                SourceError::Configuration(
                    "gmail.credentials.installed.client_id is missing".to_string(),
                )
            })?;

        Ok(Self {
            client_id: installed.client_id.clone(),
            client_secret: installed.client_secret.clone(),
            redirect_uri: settings
                .redirect_uri
                .clone()
                .unwrap_or_else(|| default_redirect_uri.to_string()),
            auth_url: settings
                .auth_url
                .clone()
                .unwrap_or_else(|| GOOGLE_AUTH_URL.to_string()),
            token_url: settings
                .token_url
                .clone()
                .or_else(|| installed.token_uri.clone())
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            http_client: http_client()?,
        })
    }

    /// Consent screen URL requesting offline access.
    pub fn build_authorize_url(&self, state: &str) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| SourceError::Configuration(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", GMAIL_READONLY_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);

        Ok(url)
    }

    /// Exchange an authorization code for a token bundle.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokenBundle, SourceError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        Ok(self.token_request(&params).await?.into_bundle(None))
    }

    /// Trade a refresh token for a new access token.
    async fn refresh(&self, bundle: &OAuthTokenBundle) -> Result<OAuthTokenBundle, SourceError> {
        let refresh_token = bundle
            .refresh_token
            .as_deref()
            .ok_or(SourceError::AuthenticationRequired)?;
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        Ok(self
            .token_request(&params)
            .await?
            .into_bundle(bundle.refresh_token.clone()))
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<GoogleTokenResponse, SourceError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::TokenExchange(format!(
                "token endpoint returned {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        response.json::<GoogleTokenResponse>().await.map_err(|e| {
            SourceError::MalformedResponse(format!("Failed to parse token response: {}", e))
        })
    }
}

/// Outstanding consent `state` values.
///
/// Shared by every `GmailSource` a factory builds, so a consent flow started
/// before a reconfiguration can still complete after it.
#[derive(Clone, Default)]
pub struct PendingOAuthStates {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for PendingOAuthStates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOAuthStates").finish_non_exhaustive()
    }
}

impl PendingOAuthStates {
    pub fn new() -> Self {
        Self::default()
    }

    fn remember(&self, state: String) {
        let mut pending = self
            .inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if pending.len() >= MAX_PENDING_STATES {
            pending.clear();
        }
        pending.insert(state);
    }

    /// Consume `candidate` if it matches an outstanding state.
    fn take(&self, candidate: &str) -> bool {
        let mut pending = self
            .inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let matched = pending
            .iter()
            .find(|known| bool::from(known.as_bytes().ct_eq(candidate.as_bytes())))
            .cloned();
        match matched {
            Some(known) => pending.remove(&known),
            None => false,
        }
    }
}

pub struct GmailSource {
    oauth: GmailOAuthClient,
    pending_states: PendingOAuthStates,
    token: RwLock<Option<OAuthTokenBundle>>,
    api_base: String,
    max_results: u32,
    http_client: Client,
}

impl GmailSource {
    pub fn new(
        settings: &GmailSettings,
        credential: Option<&Credential>,
        default_redirect_uri: &str,
    ) -> Result<Self, SourceError> {
        let token = credential
            .map(Credential::to_oauth_bundle)
            .filter(|bundle| !bundle.access_token.is_empty());

        Ok(Self {
            oauth: GmailOAuthClient::from_settings(settings, default_redirect_uri)?,
            pending_states: PendingOAuthStates::new(),
            token: RwLock::new(token),
            api_base: settings
                .api_base
                .clone()
                .unwrap_or_else(|| GMAIL_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_results: settings.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            http_client: http_client()?,
        })
    }

    /// Validate callbacks against `pending_states` instead of a private set.
    pub fn with_pending_states(mut self, pending_states: PendingOAuthStates) -> Self {
        self.pending_states = pending_states;
        self
    }

    /// Current access token, refreshed in memory when it is about to expire.
    async fn access_token(&self) -> Result<String, SourceError> {
        let current = self
            .token
            .read()
            .await
            .clone()
            .ok_or(SourceError::AuthenticationRequired)?;

        let now = Utc::now().timestamp_millis();
        let expiring = current
            .expiry_date
            .is_some_and(|expiry| expiry <= now + EXPIRY_SKEW_MS);
        if !expiring || current.refresh_token.is_none() {
            return Ok(current.access_token);
        }

        debug!("Gmail access token expiring, refreshing");
        let refreshed = self.oauth.refresh(&current).await?;
        let access_token = refreshed.access_token.clone();
        *self.token.write().await = Some(refreshed);
        Ok(access_token)
    }

    async fn get_message(&self, token: &str, id: &str) -> Result<GmailMessage, SourceError> {
        let response = self
            .http_client
            .get(format!("{}/users/me/messages/{}", self.api_base, id))
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Date"),
            ])
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn fetch(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        let token = self.access_token().await?;

        let response = self
            .http_client
            .get(format!("{}/users/me/messages", self.api_base))
            .query(&[
                ("maxResults", self.max_results.to_string()),
                ("q", UNREAD_INBOX_QUERY.to_string()),
            ])
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;
        let list: MessageList = check_status(response).await?.json().await?;

        debug!(count = list.messages.len(), "Gmail unread messages listed");

        let mut records = Vec::with_capacity(list.messages.len());
        for message in list.messages {
            match self.get_message(&token, &message.id).await {
                Ok(full) => records.push(normalize(full)),
                Err(err) => warn!(message_id = %message.id, error = %err, "Skipping Gmail message"),
            }
        }
        Ok(records)
    }
}

fn header<'a>(headers: &'a [MessageHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// RFC 2822 `Date` header, tolerating a trailing zone comment like `(UTC)`.
fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = match value.find(" (") {
        Some(idx) if value.trim_end().ends_with(')') => &value[..idx],
        _ => value,
    };
    DateTime::parse_from_rfc2822(trimmed.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn normalize(message: GmailMessage) -> NotificationRecord {
    let headers = message
        .payload
        .map(|p| p.headers)
        .unwrap_or_default();

    let title = header(&headers, "Subject")
        .filter(|s| !s.is_empty())
        .unwrap_or("(no subject)")
        .to_string();
    let from = header(&headers, "From").unwrap_or_default().to_string();
    let date = header(&headers, "Date")
        .and_then(parse_date_header)
        .or_else(|| {
            message
                .internal_date
                .as_deref()
                .and_then(|d| d.parse::<i64>().ok())
                .map(from_epoch_millis)
        })
        .unwrap_or_else(epoch_zero);
    let unread = message.label_ids.iter().any(|l| l == "UNREAD");
    let link = format!("https://mail.google.com/mail/u/0/#inbox/{}", message.id);

    let raw = json!({
        "headers": headers,
        "snippet": message.snippet,
        "labelIds": message.label_ids,
        "threadId": message.thread_id,
        "internalDate": message.internal_date,
        "sizeEstimate": message.size_estimate,
    });

    NotificationRecord::new(SourceKind::Mail, title, from, date, unread, link)
        .with_id(message.id)
        .with_content(message.snippet.unwrap_or_default())
        .with_raw(raw)
}

#[async_trait]
impl Source for GmailSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mail
    }

    async fn fetch_notifications(&self) -> Vec<NotificationRecord> {
        or_empty(self.kind(), self.fetch().await)
    }

    async fn authorize(&self) -> Result<(), SourceError> {
        match self.token.read().await.as_ref() {
            Some(bundle) if !bundle.access_token.is_empty() => Ok(()),
            _ => Err(SourceError::AuthenticationRequired),
        }
    }

    fn renewal_path(&self) -> Option<&str> {
        Some(AUTH_PATH)
    }

    fn routes(&self, on_renewal: RenewalCallback) -> Option<Router> {
        let state = GmailAuthState {
            oauth: self.oauth.clone(),
            on_renewal,
            pending_states: self.pending_states.clone(),
        };
        Some(
            Router::new()
                .route(AUTH_PATH, get(start_auth))
                .route(CALLBACK_PATH, get(auth_callback))
                .with_state(state),
        )
    }
}

#[derive(Clone)]
struct GmailAuthState {
    oauth: GmailOAuthClient,
    on_renewal: RenewalCallback,
    pending_states: PendingOAuthStates,
}

/// 32 random bytes, URL-safe base64.
fn generate_secure_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}

async fn start_auth(State(state): State<GmailAuthState>) -> Response {
    let oauth_state = generate_secure_state();
    match state.oauth.build_authorize_url(&oauth_state) {
        Ok(url) => {
            state.pending_states.remember(oauth_state);
            (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "Error getting auth URL");
            internal_error("AUTH_INIT_FAILED", "Error initiating authentication").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn auth_callback(
    State(state): State<GmailAuthState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        if let Some(error) = params.error {
            warn!(error = %error, "Gmail consent was not granted");
        }
        return Err(bad_request("No authorization code provided"));
    };

    if !params.state.as_deref().is_some_and(|s| state.pending_states.take(s)) {
        return Err(bad_request("Invalid or expired OAuth state"));
    }

    let bundle = state.oauth.exchange_code(&code).await.map_err(|err| {
        tracing::error!(error = %err, "Error in Gmail callback");
        internal_error("AUTHENTICATION_FAILED", format!("Authentication failed: {}", err))
    })?;

    (state.on_renewal)(SourceKind::Mail, Credential::OAuth(bundle))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "Error in Gmail callback");
            internal_error("AUTHENTICATION_FAILED", format!("Authentication failed: {}", err))
        })?;

    info!("Gmail credentials renewed");
    Ok(Redirect::to("/"))
}
