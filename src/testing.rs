//! Test doubles shared by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::api::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::auth::SessionHost;

/// Fixed far-future expiry (2096) so minted tokens compare equal across calls.
const FAR_FUTURE: i64 = 4_000_000_000;
const LONG_AGO: i64 = 1_000_000_000;

pub fn mint_token_with(payload_json: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload_json.as_bytes())
    )
}

/// Token expiring at `exp` (epoch seconds).
pub fn mint_token(exp: i64) -> String {
    mint_token_with(&format!(r#"{{"exp":{}}}"#, exp))
}

fn tagged(exp: i64, tag: &str) -> String {
    mint_token_with(&json!({"exp": exp, "jti": tag}).to_string())
}

pub fn valid_token(tag: &str) -> String {
    tagged(FAR_FUTURE, tag)
}

pub fn expired_token(tag: &str) -> String {
    tagged(LONG_AGO, tag)
}

/// Valid for one more minute, inside any refresh window.
pub fn expiring_soon_token(tag: &str) -> String {
    tagged(chrono::Utc::now().timestamp() + 60, tag)
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string().into_bytes(),
    }
}

/// Coded success envelope around `data`.
pub fn ok(data: Value) -> HttpResponse {
    json_response(200, json!({"code": 200, "message": "success", "data": data}))
}

pub fn grant_response(access_token: &str, refresh_token: &str) -> HttpResponse {
    json_response(
        200,
        json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "token_type": "bearer",
        }),
    )
}

/// Poll `cond` until it holds. Panics after five seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Host that records what the terminator asked of it.
#[derive(Default)]
pub struct RecordingHost {
    location: Mutex<Option<String>>,
    notices: AtomicUsize,
    redirects: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(route: &str) -> Self {
        Self {
            location: Mutex::new(Some(route.to_string())),
            ..Self::default()
        }
    }

    pub fn notices(&self) -> usize {
        self.notices.load(Ordering::SeqCst)
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl SessionHost for RecordingHost {
    fn current_location(&self) -> Option<String> {
        self.location.lock().unwrap().clone()
    }

    fn notify_session_expired(&self, _message: &str) {
        self.notices.fetch_add(1, Ordering::SeqCst);
    }

    fn redirect_to_login(&self, route: &str) {
        *self.location.lock().unwrap() = Some(route.to_string());
        self.redirects.lock().unwrap().push(route.to_string());
    }

    fn session_started(&self) {
        *self.location.lock().unwrap() = None;
    }
}

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Holds refresh requests until opened.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn open(&self) {
        self.0.add_permits(1024);
    }
}

/// In-process transport answering from a closure and logging every request.
pub struct FakeTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<HttpRequest>>,
    gate: Option<Gate>,
}

impl FakeTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Make refresh requests block until [`Gate::open`].
    pub fn gated(mut self) -> Self {
        self.gate = Some(Gate(Arc::new(Semaphore::new(0))));
        self
    }

    pub fn gate(&self) -> Gate {
        self.gate.clone().expect("transport is not gated")
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests whose URL contains `fragment`.
    pub fn calls_to(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            if request.url.contains("/refresh") {
                let _permit = gate.0.acquire().await.unwrap();
            }
        }
        (self.handler)(&request)
    }
}
