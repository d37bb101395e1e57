//! Token storage and management

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::UserProfile;

/// Access/refresh token pair issued by login and replaced on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Token store trait for different storage backends.
///
/// `set` is the only way the pair changes and must replace both fields
/// before returning, so readers never observe a half-updated pair.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn set(&self, pair: &CredentialPair) -> Result<(), StoreError>;
    /// Remove the pair and the cached user profile.
    fn clear(&self) -> Result<(), StoreError>;
    fn user_profile(&self) -> Option<UserProfile>;
    fn set_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;

    fn get(&self) -> Option<CredentialPair> {
        Some(CredentialPair {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    profile: Option<UserProfile>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<MemoryState>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                access_token: Some(pair.access_token),
                refresh_token: Some(pair.refresh_token),
                profile: None,
            }),
        }
    }

    /// Store only an access token (older sessions never had a refresh token).
    pub fn with_access_token(token: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                access_token: Some(token.into()),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.state().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.state().refresh_token.clone()
    }

    fn set(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let mut state = self.state();
        state.access_token = Some(pair.access_token.clone());
        state.refresh_token = Some(pair.refresh_token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.state() = MemoryState::default();
        Ok(())
    }

    fn user_profile(&self) -> Option<UserProfile> {
        self.state().profile.clone()
    }

    fn set_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.state().profile = Some(profile.clone());
        Ok(())
    }
}
