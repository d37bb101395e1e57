//! Configuration and credential storage

mod credentials;

pub use credentials::FileTokenStore;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Profile used when the config file names none.
pub const DEFAULT_PROFILE: &str = "main";

/// Public endpoints that must never trigger refresh-on-401.
const PUBLIC_AUTH_PATHS: [&str; 10] = [
    "auth/login",
    "auth/register",
    "auth/refresh",
    "auth/request-password-reset",
    "auth/reset-password",
    "student/auth/login",
    "teacher/auth/login",
    "admin/auth/login",
    "channel/auth/login",
    "school/auth/login",
];

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "portal-cli", "portal-cli")
}

/// Settings for one backend client (one per API surface).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Absolute base URL every relative request path is joined onto
    pub base_url: String,
    /// Default per-request timeout
    pub timeout_secs: u64,
    /// Prefix for credential keys, so profiles can share one store
    pub key_prefix: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: Option<String>,
    pub user_info_path: Option<String>,
    /// Path fragments sent without auth and excluded from refresh-on-401
    pub excluded_paths: Vec<String>,
    /// How close to expiry a background refresh starts
    pub expiring_soon_secs: u64,
    /// Where the host goes when the session ends
    pub login_route: String,
    /// Path fragment -> timeout override for slow endpoints
    pub endpoint_timeouts: BTreeMap<String, u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::main()
    }
}

impl ClientConfig {
    /// Shared API client (agents, workflows, knowledge bases)
    pub fn main() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
            key_prefix: String::new(),
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            logout_path: Some("/auth/logout".to_string()),
            user_info_path: Some("/auth/user-info".to_string()),
            excluded_paths: PUBLIC_AUTH_PATHS.iter().map(|s| s.to_string()).collect(),
            expiring_soon_secs: 300,
            login_route: "/login".to_string(),
            endpoint_timeouts: BTreeMap::from([
                ("/chat/".to_string(), 120),
                ("/kb-documents/".to_string(), 120),
            ]),
        }
    }

    /// Device management client
    pub fn device() -> Self {
        Self {
            timeout_secs: 10,
            endpoint_timeouts: BTreeMap::new(),
            ..Self::main()
        }
    }

    fn pbl(role: &str, login_route: &str) -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            key_prefix: format!("{}_", role),
            login_path: format!("/api/v1/{}/auth/login", role),
            refresh_path: format!("/api/v1/{}/auth/refresh", role),
            logout_path: None,
            user_info_path: Some(format!("/api/v1/{}/auth/me", role)),
            expiring_soon_secs: 180,
            login_route: login_route.to_string(),
            endpoint_timeouts: BTreeMap::new(),
            ..Self::main()
        }
    }

    /// PBL student client
    pub fn student() -> Self {
        Self::pbl("student", "/login")
    }

    /// PBL teacher client
    pub fn teacher() -> Self {
        Self::pbl("teacher", "/teacher/login")
    }

    /// PBL channel partner client
    pub fn channel() -> Self {
        Self::pbl("channel", "/channel/login")
    }

    /// Resolve a request path (or absolute URL) against `base_url`.
    pub fn url(&self, path: &str) -> Result<String, ApiError> {
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        url::Url::parse(&joined)
            .map(|u| u.to_string())
            .map_err(|e| ApiError::InvalidRequest(format!("bad URL {}: {}", joined, e)))
    }

    /// Public endpoints: no bearer, no pre-flight, no refresh-on-401.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.is_refresh_path(path)
            || path_matches(path, &self.login_path)
            || self
                .excluded_paths
                .iter()
                .any(|fragment| path_matches(path, fragment))
    }

    pub fn is_refresh_path(&self, path: &str) -> bool {
        path_matches(path, &self.refresh_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Longest matching `endpoint_timeouts` entry, else the default.
    pub fn timeout_for(&self, path: &str) -> Duration {
        self.endpoint_timeouts
            .iter()
            .filter(|(fragment, _)| path_matches(path, fragment))
            .max_by_key(|(fragment, _)| fragment.len())
            .map(|(_, secs)| Duration::from_secs(*secs))
            .unwrap_or_else(|| self.timeout())
    }

    pub fn expiring_soon_window_ms(&self) -> i64 {
        i64::try_from(self.expiring_soon_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// Substring match ignoring a leading `/` on the fragment.
fn path_matches(path: &str, fragment: &str) -> bool {
    let fragment = fragment.trim_start_matches('/');
    !fragment.is_empty() && path.contains(fragment)
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_profile: String,
    pub profiles: BTreeMap<String, ClientConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: DEFAULT_PROFILE.to_string(),
            profiles: BTreeMap::from([
                ("main".to_string(), ClientConfig::main()),
                ("device".to_string(), ClientConfig::device()),
                ("student".to_string(), ClientConfig::student()),
                ("teacher".to_string(), ClientConfig::teacher()),
                ("channel".to_string(), ClientConfig::channel()),
            ]),
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = project_dirs().context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, falling back to built-in profiles
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Look up a profile by name, or the default profile when `name` is None.
    pub fn profile(&self, name: Option<&str>) -> Result<&ClientConfig> {
        let name = name.unwrap_or(&self.default_profile);
        self.profiles.get(name).with_context(|| {
            format!(
                "Unknown profile '{}' (available: {})",
                name,
                self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }
}
