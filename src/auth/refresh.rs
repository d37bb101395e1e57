//! Single-flight token refresh
//!
//! At most one refresh request is on the wire per coordinator. Callers that
//! arrive while it is in flight queue up and all receive the same outcome,
//! in the order they joined. A failed refresh ends the session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;

use super::inspect;
use super::session::SessionTerminator;
use super::{CredentialPair, TokenStore};
use crate::api::envelope::normalize_error;
use crate::api::transport::{HttpRequest, Method, Transport};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::TokenGrant;

type Outcome = Result<String, ApiError>;

enum State {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Outcome>>,
    },
}

pub struct RefreshCoordinator {
    url: String,
    timeout: Duration,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    terminator: Arc<SessionTerminator>,
    state: Mutex<State>,
    network_calls: AtomicUsize,
}

impl RefreshCoordinator {
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        terminator: Arc<SessionTerminator>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            url: config.url(&config.refresh_path)?,
            timeout: config.timeout_for(&config.refresh_path),
            store,
            transport,
            terminator,
            state: Mutex::new(State::Idle),
            network_calls: AtomicUsize::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), State::Refreshing { .. })
    }

    /// Callers currently waiting on the in-flight refresh.
    pub fn queued(&self) -> usize {
        match &*self.lock() {
            State::Refreshing { waiters } => waiters.len(),
            State::Idle => 0,
        }
    }

    /// Refresh requests actually sent to the server.
    pub fn network_calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }

    /// Obtain a new access token, joining the in-flight refresh if there is one.
    pub async fn request_refresh(&self) -> Outcome {
        let waiter = {
            let mut state = self.lock();
            match &mut *state {
                State::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                State::Idle => {
                    *state = State::Refreshing {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            tracing::debug!("Token refresh in progress, queued");
            return rx.await.unwrap_or_else(|_| {
                Err(ApiError::Network("token refresh was interrupted".to_string()))
            });
        }

        let mut flight = InFlight {
            coordinator: self,
            settled: false,
        };

        // Let callers that hit expiry in the same tick join this flight.
        tokio::task::yield_now().await;

        let outcome = self.exchange().await;
        if let Err(e) = &outcome {
            tracing::error!("Token refresh failed: {}", e);
            self.terminator.terminate(&e.to_string());
        }
        flight.settle(&outcome);
        outcome
    }

    async fn exchange(&self) -> Outcome {
        let refresh_token = self
            .store
            .refresh_token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::RefreshFailed("no refresh token available".to_string()))?;
        if !inspect::is_well_formed(&refresh_token) {
            return Err(ApiError::MalformedToken(
                "refresh token is not a three-part token".to_string(),
            ));
        }
        if inspect::is_expired(&refresh_token, inspect::now_ms()) {
            return Err(ApiError::RefreshFailed("refresh token expired".to_string()));
        }

        tracing::info!("Refreshing access token...");
        self.network_calls.fetch_add(1, Ordering::SeqCst);

        let mut request = HttpRequest::new(Method::POST, self.url.clone(), self.timeout);
        request.body = Some(json!({ "refresh_token": refresh_token }));

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| ApiError::RefreshFailed(e.to_string()))?;

        if !response.is_success() {
            let err = normalize_error(&response, true);
            return Err(ApiError::RefreshFailed(format!(
                "HTTP {}: {}",
                response.status,
                err.envelope().message
            )));
        }

        let grant = response
            .json()
            .as_ref()
            .and_then(TokenGrant::from_body)
            .ok_or_else(|| {
                ApiError::RefreshFailed("refresh response missing access_token".to_string())
            })?;

        // Servers that don't rotate leave the current refresh token valid.
        let pair = CredentialPair {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or(refresh_token),
        };
        self.store.set(&pair).map_err(|e| {
            ApiError::RefreshFailed(format!("could not store refreshed tokens: {}", e))
        })?;

        tracing::info!("Access token refreshed");
        Ok(pair.access_token)
    }

    /// Back to Idle, answering every queued caller in join order.
    fn settle(&self, outcome: &Outcome) {
        let previous = std::mem::replace(&mut *self.lock(), State::Idle);
        let State::Refreshing { waiters } = previous else {
            return;
        };
        if !waiters.is_empty() {
            tracing::debug!("Releasing {} queued request(s)", waiters.len());
        }
        for tx in waiters {
            // Receiver gone means the caller stopped waiting.
            let _ = tx.send(outcome.clone());
        }
    }
}

/// Resets the coordinator even if the refreshing future is dropped or panics.
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, outcome: &Outcome) {
        self.coordinator.settle(outcome);
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Token refresh abandoned before completion");
            self.coordinator.settle(&Err(ApiError::Network(
                "token refresh was interrupted".to_string(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::testing::{
        expired_token, grant_response, json_response, valid_token, FakeTransport, RecordingHost,
    };
    use futures::future::join_all;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        coordinator: Arc<RefreshCoordinator>,
        store: Arc<MemoryTokenStore>,
        transport: Arc<FakeTransport>,
        host: Arc<RecordingHost>,
    }

    fn harness(store: MemoryTokenStore, transport: FakeTransport) -> Harness {
        let config = ClientConfig::main();
        let store = Arc::new(store);
        let transport = Arc::new(transport);
        let host = Arc::new(RecordingHost::new());
        let terminator = Arc::new(SessionTerminator::new(
            store.clone(),
            host.clone(),
            config.login_route.clone(),
        ));
        let coordinator = Arc::new(
            RefreshCoordinator::new(&config, store.clone(), transport.clone(), terminator)
                .unwrap(),
        );
        Harness {
            coordinator,
            store,
            transport,
            host,
        }
    }

    fn rotating_server() -> FakeTransport {
        FakeTransport::new(|req| {
            assert!(req.url.ends_with("/auth/refresh"));
            Ok(grant_response(&valid_token("new-access"), &valid_token("new-refresh")))
        })
    }

    #[tokio::test]
    async fn test_refresh_success_rotates_pair() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("old-access"),
                valid_token("old-refresh"),
            )),
            rotating_server(),
        );

        let token = assert_ok!(h.coordinator.request_refresh().await);
        assert_eq!(token, valid_token("new-access"));
        assert_eq!(
            h.store.get(),
            Some(CredentialPair::new(
                valid_token("new-access"),
                valid_token("new-refresh")
            ))
        );

        let sent = h.transport.calls();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(
            sent[0].body,
            Some(json!({"refresh_token": valid_token("old-refresh")}))
        );
        assert!(!h.coordinator.is_refreshing());
        assert_eq!(h.host.notices(), 0);
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                valid_token("keep-me"),
            )),
            FakeTransport::new(|_| {
                Ok(json_response(200, json!({"access_token": valid_token("fresh")})))
            }),
        );

        assert_ok!(h.coordinator.request_refresh().await);
        assert_eq!(h.store.refresh_token(), Some(valid_token("keep-me")));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                valid_token("r"),
            )),
            rotating_server(),
        );

        let results = join_all((0..8).map(|_| h.coordinator.request_refresh())).await;

        assert_eq!(h.transport.calls().len(), 1);
        assert_eq!(h.coordinator.network_calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), valid_token("new-access"));
        }
        assert_eq!(h.coordinator.queued(), 0);
        assert!(!h.coordinator.is_refreshing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_tasks_wait_for_in_flight_refresh() {
        let transport = rotating_server().gated();
        let gate = transport.gate();
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                valid_token("r"),
            )),
            transport,
        );

        let leader = {
            let c = h.coordinator.clone();
            tokio::spawn(async move { c.request_refresh().await })
        };
        crate::testing::wait_until(|| h.transport.calls().len() == 1).await;

        let followers: Vec<_> = (0..5)
            .map(|_| {
                let c = h.coordinator.clone();
                tokio::spawn(async move { c.request_refresh().await })
            })
            .collect();
        crate::testing::wait_until(|| h.coordinator.queued() == 5).await;
        assert!(h.coordinator.is_refreshing());

        gate.open();

        assert_eq!(leader.await.unwrap().unwrap(), valid_token("new-access"));
        for follower in followers {
            assert_eq!(follower.await.unwrap().unwrap(), valid_token("new-access"));
        }
        assert_eq!(h.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_fails_everyone_and_ends_session() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                valid_token("revoked"),
            )),
            FakeTransport::new(|_| Ok(json_response(401, json!({"detail": "revoked"})))),
        );

        let results = join_all((0..4).map(|_| h.coordinator.request_refresh())).await;

        let first = results[0].clone().unwrap_err();
        assert!(matches!(first, ApiError::RefreshFailed(ref m) if m.contains("revoked")));
        for result in &results {
            assert_eq!(result.as_ref().unwrap_err(), &first);
        }
        assert_eq!(h.transport.calls().len(), 1);
        assert!(h.store.get().is_none());
        assert_eq!(h.host.notices(), 1);
        assert!(!h.coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_skips_network() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                expired_token("r"),
            )),
            rotating_server(),
        );

        let err = assert_err!(h.coordinator.request_refresh().await);
        assert_eq!(err, ApiError::RefreshFailed("refresh token expired".into()));
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.coordinator.network_calls(), 0);
        assert_eq!(h.host.notices(), 1);
    }

    #[tokio::test]
    async fn test_malformed_refresh_token_skips_network() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(expired_token("a"), "opaque")),
            rotating_server(),
        );

        let err = assert_err!(h.coordinator.request_refresh().await);
        assert!(matches!(err, ApiError::MalformedToken(_)));
        assert!(h.transport.calls().is_empty());
        assert!(h.store.get().is_none());
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let h = harness(
            MemoryTokenStore::with_access_token(expired_token("a")),
            rotating_server(),
        );

        let err = assert_err!(h.coordinator.request_refresh().await);
        assert!(err.is_auth_fatal());
        assert!(h.transport.calls().is_empty());
        assert!(h.store.access_token().is_none());
    }

    #[tokio::test]
    async fn test_network_failure_is_refresh_failure() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                valid_token("r"),
            )),
            FakeTransport::new(|req| {
                Err(crate::api::transport::TransportError::Timeout(req.timeout))
            }),
        );

        let err = assert_err!(h.coordinator.request_refresh().await);
        assert!(matches!(err, ApiError::RefreshFailed(_)));
        assert_eq!(h.host.notices(), 1);
    }

    #[tokio::test]
    async fn test_garbled_refresh_response() {
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                valid_token("r"),
            )),
            FakeTransport::new(|_| Ok(json_response(200, json!({"code": 200, "data": {}})))),
        );

        let err = assert_err!(h.coordinator.request_refresh().await);
        assert_eq!(
            err,
            ApiError::RefreshFailed("refresh response missing access_token".into())
        );
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let transport = rotating_server().gated();
        let h = harness(
            MemoryTokenStore::with_pair(CredentialPair::new(
                expired_token("a"),
                valid_token("r"),
            )),
            transport,
        );

        let leader = {
            let c = h.coordinator.clone();
            tokio::spawn(async move { c.request_refresh().await })
        };
        crate::testing::wait_until(|| h.transport.calls().len() == 1).await;

        let follower = {
            let c = h.coordinator.clone();
            tokio::spawn(async move { c.request_refresh().await })
        };
        crate::testing::wait_until(|| h.coordinator.queued() == 1).await;

        leader.abort();
        let err = follower.await.unwrap().unwrap_err();
        assert!(err.is_transient());
        assert!(!h.coordinator.is_refreshing());
        // Interrupted is not a verdict on the session
        assert!(h.store.get().is_some());
    }
}
