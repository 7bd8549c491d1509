//! End-to-end HTTP tests: full router, file-backed credential store,
//! test double sources.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::LOCATION},
    response::Response,
};
use notifeed::config::integrations::{GmailClientFile, InstalledClient};
use notifeed::config::{AppConfig, GmailSettings, IntegrationsConfig, NotionSettings};
use notifeed::credentials::{
    Credential, CredentialLifecycle, CredentialStore, Credentials, FileCredentialStore,
};
use notifeed::manager::IntegrationManager;
use notifeed::models::SourceKind;
use notifeed::routing::RoutingSurface;
use notifeed::server::{AppState, create_app};
use notifeed::sources::{DefaultSourceFactory, SourceFactory};
use serde_json::{Value, json};
use tempfile::TempDir;
use test_utils::{MAIL_AUTH_PATH, MAIL_CALLBACK_PATH, TestFactory, integrations};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    dir: TempDir,
    state: AppState,
}

impl Harness {
    async fn new(kinds: &[SourceKind]) -> Self {
        let dir = TempDir::new().unwrap();
        Self::with_paths(dir, kinds, "tokens.json").await
    }

    async fn with_paths(dir: TempDir, kinds: &[SourceKind], tokens: &str) -> Self {
        Self::build(dir, integrations(kinds), Arc::new(TestFactory::new()), tokens).await
    }

    async fn build(
        dir: TempDir,
        config: IntegrationsConfig,
        factory: Arc<dyn SourceFactory>,
        tokens: &str,
    ) -> Self {
        let config_path = dir.path().join("config.json");
        config.save(&config_path).await.unwrap();
        let mail_auth_enabled = config.is_enabled(SourceKind::Mail);

        let manager = Arc::new(IntegrationManager::new(factory, Duration::from_secs(5)));
        let routes = RoutingSurface::new();
        let lifecycle = CredentialLifecycle::new(
            manager.clone(),
            Arc::new(FileCredentialStore::new(dir.path().join(tokens))),
            config_path,
            routes.clone(),
            config,
            Credentials::new(),
        );
        lifecycle.bootstrap().await.unwrap();

        let state = AppState {
            config: Arc::new(AppConfig::default()),
            manager,
            lifecycle,
            routes,
            mail_auth_enabled,
        };
        Self { dir, state }
    }

    fn app(&self) -> Router {
        create_app(self.state.clone())
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post_json(&self, uri: &str, body: &str) -> Response {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn stored(&self) -> Credentials {
        FileCredentialStore::new(self.dir.path().join("tokens.json"))
            .load()
            .await
            .unwrap()
    }
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn titles_of(feed: &Value, source: &str) -> Vec<String> {
    feed["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["source"] == source)
        .map(|n| n["title"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn healthz_reports_ok_with_trace_id() {
    let harness = Harness::new(&[SourceKind::Synthetic]).await;
    let response = harness.get("/healthz").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-trace-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "notifeed");
}

#[tokio::test]
async fn json_feed_fetches_and_caches() {
    let harness = Harness::new(&[SourceKind::CodeHost, SourceKind::Notes]).await;

    let cached = json_body(harness.get("/api/notifications?cached=true").await).await;
    assert_eq!(cached["count"], 0);

    let fresh = json_body(harness.get("/api/notifications").await).await;
    assert_eq!(fresh["count"], 2);
    let dates: Vec<&str> = fresh["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["date"].as_str().unwrap())
        .collect();
    let mut sorted = dates.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(dates, sorted);

    let cached = json_body(harness.get("/api/notifications?cached=true").await).await;
    assert_eq!(cached, fresh);
}

#[tokio::test]
async fn html_feed_renders_records() {
    let harness = Harness::new(&[SourceKind::CodeHost]).await;
    let response = harness.get("/").await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = text_body(response).await;
    assert!(html.contains("<div class=\"source-badge github\">GitHub</div>"));
    assert!(html.contains("anonymous"));
    assert!(!html.contains("<!-- Notifications will be inserted here -->"));
}

#[tokio::test]
async fn receive_cookie_stores_token_and_reconfigures() {
    let harness = Harness::new(&[SourceKind::Notes]).await;

    let response = harness
        .post_json("/receive-cookie", r#"{"token_v2":"abc123"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true }));

    assert_eq!(
        harness.stored().await.get(SourceKind::Notes),
        Some(&Credential::Token("abc123".into()))
    );
    let on_disk = IntegrationsConfig::load(&harness.dir.path().join("config.json"))
        .await
        .unwrap();
    assert_eq!(
        on_disk.integrations.notion.unwrap().token.as_deref(),
        Some("abc123")
    );

    let feed = json_body(harness.get("/api/notifications").await).await;
    assert_eq!(titles_of(&feed, "Notes"), vec!["abc123"]);

    // Redelivery is harmless.
    let response = harness
        .post_json("/receive-cookie", r#"{"token_v2":"abc123"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.stored().await.len(), 1);
}

#[tokio::test]
async fn receive_cookie_rejects_bad_payloads_without_writing() {
    let harness = Harness::new(&[SourceKind::Notes]).await;

    for body in [r#"{}"#, r#"{"token_v2":""}"#, r#"{"token_v2":"#, r#"{"other":"x"}"#] {
        let response = harness.post_json("/receive-cookie", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
    }

    assert!(harness.stored().await.is_empty());
    let feed = json_body(harness.get("/api/notifications").await).await;
    assert_eq!(titles_of(&feed, "Notes"), vec!["anonymous"]);
}

#[tokio::test]
async fn receive_cookie_write_failure_is_a_server_error() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::with_paths(dir, &[SourceKind::Notes], "missing/dir/tokens.json").await;

    let response = harness
        .post_json("/receive-cookie", r#"{"token_v2":"abc123"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Failed to process token");

    assert!(harness.state.lifecycle.credentials().await.is_empty());
    let on_disk = IntegrationsConfig::load(&harness.dir.path().join("config.json"))
        .await
        .unwrap();
    assert_eq!(on_disk.integrations.notion.unwrap().token, None);
    let feed = json_body(harness.get("/api/notifications").await).await;
    assert_eq!(titles_of(&feed, "Notes"), vec!["anonymous"]);
}

#[tokio::test]
async fn mail_gate_and_renewal_flow() {
    let harness = Harness::new(&[SourceKind::Mail, SourceKind::Synthetic]).await;

    let response = harness.get("/").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], MAIL_AUTH_PATH);

    let response = harness.get("/api/notifications").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    // The callback is served through the routing surface fallback.
    let response = harness
        .get(&format!("{}?code=fresh-token", MAIL_CALLBACK_PATH))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    assert_eq!(
        harness.stored().await.get(SourceKind::Mail),
        Some(&Credential::Token("fresh-token".into()))
    );

    let response = harness.get("/api/notifications?cached=true").await;
    assert_eq!(response.status(), StatusCode::OK);
    let feed = json_body(response).await;
    assert_eq!(titles_of(&feed, "Mail"), vec!["fresh-token"]);

    assert_eq!(harness.get("/").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn mail_consent_survives_a_cookie_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "refresh_token": "fresh-refresh",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;

    let mut config = integrations(&[SourceKind::Notes]);
    config.integrations.gmail = Some(GmailSettings {
        enabled: true,
        credentials: Some(GmailClientFile {
            installed: Some(InstalledClient {
                client_id: "client-id".into(),
                client_secret: "client-secret".into(),
                ..InstalledClient::default()
            }),
            ..GmailClientFile::default()
        }),
        api_base: Some(server.uri()),
        token_url: Some(format!("{}/token", server.uri())),
        ..GmailSettings::default()
    });
    config.integrations.notion = Some(NotionSettings {
        enabled: true,
        api_base: Some(server.uri()),
        ..NotionSettings::default()
    });
    let harness = Harness::build(
        TempDir::new().unwrap(),
        config,
        Arc::new(DefaultSourceFactory::new(
            "http://localhost:3000/auth/gmail/callback",
        )),
        "tokens.json",
    )
    .await;

    let response = harness.get(MAIL_AUTH_PATH).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = Url::parse(response.headers()[LOCATION].to_str().unwrap()).unwrap();
    let oauth_state = location
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    // Reconfigures every source and remounts the mail routes.
    let response = harness
        .post_json("/receive-cookie", r#"{"token_v2":"abc"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .get(&format!(
            "{}?code=auth-code&state={}",
            MAIL_CALLBACK_PATH, oauth_state
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let stored = harness.stored().await;
    assert!(matches!(
        stored.get(SourceKind::Mail),
        Some(Credential::OAuth(bundle)) if bundle.access_token == "fresh-access"
    ));
    assert_eq!(
        stored.get(SourceKind::Notes),
        Some(&Credential::Token("abc".into()))
    );
}

#[tokio::test]
async fn unknown_routes_fall_through_to_not_found() {
    let harness = Harness::new(&[SourceKind::Synthetic]).await;
    assert_eq!(
        harness.get(MAIL_CALLBACK_PATH).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(harness.get("/nope").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_preflight_allows_extension() {
    let harness = Harness::new(&[SourceKind::Notes]).await;
    let response = harness
        .send(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/receive-cookie")
                .header("origin", "chrome-extension://abcdef")
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let methods = response.headers()["access-control-allow-methods"]
        .to_str()
        .unwrap()
        .to_string();
    assert!(methods.contains("POST"));
}

#[tokio::test]
async fn openapi_document_lists_endpoints() {
    let harness = Harness::new(&[SourceKind::Synthetic]).await;
    let doc = json_body(harness.get("/openapi.json").await).await;

    for path in ["/", "/api/notifications", "/receive-cookie", "/healthz"] {
        assert!(doc["paths"].get(path).is_some(), "missing {path}");
    }
}
