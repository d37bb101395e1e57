//! Session termination
//!
//! When a session can't be recovered the credentials are wiped and the host
//! is sent to its login entry point. The host is whatever embeds the client
//! (the CLI here), reached through [`SessionHost`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::TokenStore;

/// Notice shown once per ended session.
pub const SESSION_EXPIRED_NOTICE: &str = "Your session has expired, please log in again.";

/// Navigation and notification hooks of the embedding application.
pub trait SessionHost: Send + Sync {
    /// Where the host currently is, if it tracks that.
    fn current_location(&self) -> Option<String>;
    fn notify_session_expired(&self, message: &str);
    fn redirect_to_login(&self, route: &str);
    /// A new session began; the host has left the login entry point.
    fn session_started(&self);
}

pub struct SessionTerminator {
    store: Arc<dyn TokenStore>,
    host: Arc<dyn SessionHost>,
    login_route: String,
    // Serializes the location check with the redirect.
    redirect_lock: Mutex<()>,
    terminations: AtomicUsize,
}

impl SessionTerminator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        host: Arc<dyn SessionHost>,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            store,
            host,
            login_route: login_route.into(),
            redirect_lock: Mutex::new(()),
            terminations: AtomicUsize::new(0),
        }
    }

    /// Clear credentials and send the host to login unless it is already there.
    /// Returns true if the host was redirected.
    pub fn terminate(&self, reason: &str) -> bool {
        tracing::warn!(reason, "Ending session");
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear stored credentials: {}", e);
        }

        let _guard = self.redirect_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.host.current_location().as_deref() == Some(self.login_route.as_str()) {
            tracing::debug!("Host already at {}, not redirecting", self.login_route);
            return false;
        }

        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.host.notify_session_expired(SESSION_EXPIRED_NOTICE);
        self.host.redirect_to_login(&self.login_route);
        true
    }

    /// Re-arm after a login so the next expiry notifies and redirects again.
    pub fn session_started(&self) {
        let _guard = self.redirect_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.host.session_started();
    }

    /// Number of terminations that reached the host.
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }
}

/// Host used by the command-line binary.
///
/// "Redirecting" records the route and tells the user how to log in again.
pub struct ConsoleHost {
    location: Mutex<Option<String>>,
    login_command: String,
}

impl ConsoleHost {
    pub fn new(login_command: impl Into<String>) -> Self {
        Self {
            location: Mutex::new(None),
            login_command: login_command.into(),
        }
    }
}

impl SessionHost for ConsoleHost {
    fn current_location(&self) -> Option<String> {
        self.location
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn notify_session_expired(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn redirect_to_login(&self, route: &str) {
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = Some(route.to_string());
        eprintln!("Run '{}' to sign in again.", self.login_command);
    }

    fn session_started(&self) {
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
