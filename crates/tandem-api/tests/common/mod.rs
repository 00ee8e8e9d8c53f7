#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::Value;
use tower::util::ServiceExt;

use tandem_api::collab::{ChatPlatform, ChatUser, Collaborators, Email, IdentityProvider, Mailer, ProviderProfile};
use tandem_api::credentials::TokenService;
use tandem_api::settings::ApiSettings;
use tandem_api::{AppState, AppStateInner, build_router};
use tandem_db::Database;

pub const SECRET: &str = "integration-test-secret";
pub const CLIENT: &str = "http://localhost:5173";

// -- Fakes --

#[derive(Default)]
pub struct RecordingChat {
    pub upserts: Mutex<Vec<ChatUser>>,
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl ChatPlatform for RecordingChat {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("chat platform unavailable"));
        }
        self.upserts.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn user_token(&self, user_id: &str) -> Result<String> {
        Ok(format!("chat-token-{}", user_id))
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Email>>,
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("smtp relay down"));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Accepts the code `good-code` and answers with a fixed profile.
pub struct StubProvider {
    pub profile: ProviderProfile,
}

#[async_trait::async_trait]
impl IdentityProvider for StubProvider {
    fn authorize_url(&self, state: &str) -> Result<String> {
        Ok(format!("https://accounts.example.com/auth?state={}", state))
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile> {
        if code == "good-code" {
            Ok(self.profile.clone())
        } else {
            Err(anyhow!("bad code"))
        }
    }
}

// -- Harness --

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: Arc<Database>,
    pub chat: Arc<RecordingChat>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn settings() -> ApiSettings {
    ApiSettings {
        allowed_origins: vec![CLIENT.into(), "https://app.example.com".into()],
        client_url: CLIENT.into(),
        ..ApiSettings::default()
    }
}

pub fn app() -> TestApp {
    app_with(settings())
}

pub fn app_with(settings: ApiSettings) -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let chat = Arc::new(RecordingChat::default());
    let mailer = Arc::new(RecordingMailer::default());
    let identity = Arc::new(StubProvider {
        profile: ProviderProfile {
            email: "oauth@x.com".into(),
            name: Some("OAuth User".into()),
            picture: Some("https://img.example.com/o.png".into()),
        },
    });

    let collab = Collaborators {
        chat: chat.clone(),
        mailer: mailer.clone(),
        identity,
    };
    let state = AppStateInner::new(db.clone(), TokenService::new(SECRET), collab, settings);

    TestApp {
        router: build_router(state.clone()),
        state,
        db,
        chat,
        mailer,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }

    /// `jwt=<token>` from the Set-Cookie header, ready to send back.
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|c| c.starts_with("jwt="))
            .and_then(|c| c.split(';').next())
            .map(String::from)
    }

    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(String::from))
            .collect()
    }
}

pub struct TestRequest {
    method: Method,
    uri: String,
    body: Option<String>,
    headers: Vec<(header::HeaderName, String)>,
    peer: SocketAddr,
}

pub fn request(method: Method, uri: &str) -> TestRequest {
    TestRequest {
        method,
        uri: uri.into(),
        body: None,
        headers: Vec::new(),
        peer: "10.0.0.1:40000".parse().unwrap(),
    }
}

impl TestRequest {
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// A body sent as `application/json` without being valid JSON.
    pub fn raw_json(mut self, body: &str) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn cookie(mut self, cookie: &str) -> Self {
        self.headers.push((header::COOKIE, cookie.into()));
        self
    }

    pub fn header(mut self, name: header::HeaderName, value: &str) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn peer(mut self, addr: &str) -> Self {
        self.peer = addr.parse().unwrap();
        self
    }

    pub async fn send(self, app: &TestApp) -> TestResponse {
        let mut builder = Request::builder().method(self.method).uri(&self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let body = match self.body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json)
            }
            None => Body::empty(),
        };
        let mut req = builder.body(body).unwrap();
        req.extensions_mut().insert(ConnectInfo(self.peer));

        let resp = app.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        TestResponse {
            status,
            headers,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }
}

// -- Shortcuts --

/// Each shortcut signup comes from a fresh address so fixtures never eat
/// into the strict limit a test is measuring.
fn fixture_peer() -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    format!("10.200.{}.{}:1", (n / 250) % 250, n % 250 + 1)
}

pub async fn signup(app: &TestApp, email: &str) -> (String, String) {
    let resp = request(Method::POST, "/api/auth/signup")
        .json(serde_json::json!({ "email": email, "password": "secret1", "fullName": "Test User" }))
        .peer(&fixture_peer())
        .send(app)
        .await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);
    let id = resp.json()["user"]["id"].as_str().unwrap().to_string();
    (id, resp.session_cookie().unwrap())
}

pub async fn onboard(app: &TestApp, cookie: &str) {
    let resp = request(Method::POST, "/api/auth/onboarding")
        .cookie(cookie)
        .json(serde_json::json!({
            "fullName": "Test User",
            "bio": "Learning every day",
            "nativeLanguage": "english",
            "learningLanguage": "portuguese",
            "location": "Porto"
        }))
        .send(app)
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
}
