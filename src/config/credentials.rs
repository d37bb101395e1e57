//! File-backed credential store
//!
//! A flat TOML table of string keys, shared by every profile. Each profile
//! namespaces its keys with `key_prefix` (`channel_access_token`, ...).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::auth::{CredentialPair, TokenStore};
use crate::error::StoreError;
use crate::models::UserProfile;

const ACCESS_TOKEN: &str = "access_token";
const REFRESH_TOKEN: &str = "refresh_token";
const USER_INFO: &str = "user_info";

type Entries = BTreeMap<String, String>;

pub struct FileTokenStore {
    path: PathBuf,
    prefix: String,
    entries: Mutex<Entries>,
}

impl FileTokenStore {
    /// Open `credentials.toml` in the platform data directory.
    pub fn open_default(prefix: &str) -> Result<Self, StoreError> {
        let dirs = super::project_dirs().ok_or(StoreError::NoDataDir)?;
        Self::open(dirs.data_dir().join("credentials.toml"), prefix)
    }

    pub fn open(path: impl Into<PathBuf>, prefix: &str) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_entries(&path)?;
        Ok(Self {
            path,
            prefix: prefix.to_string(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reads go to the file so a pair rotated through another handle is
    /// seen immediately. The cache only answers if the file can't be read.
    fn get_entry(&self, name: &str) -> Option<String> {
        let mut cached = self.lock();
        match read_entries(&self.path) {
            Ok(entries) => *cached = entries,
            Err(e) => tracing::warn!("Using cached credentials: {}", e),
        }
        cached.get(&self.key(name)).cloned()
    }

    /// Re-read the file, apply `f`, write it back in one replace. Re-reading
    /// keeps keys written by other profiles sharing the file.
    fn update(&self, f: impl FnOnce(&mut Entries)) -> Result<(), StoreError> {
        let mut cached = self.lock();
        let mut entries = read_entries(&self.path)?;
        f(&mut entries);
        write_entries(&self.path, &entries)?;
        *cached = entries;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.get_entry(ACCESS_TOKEN)
    }

    fn refresh_token(&self) -> Option<String> {
        self.get_entry(REFRESH_TOKEN)
    }

    fn set(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let access = self.key(ACCESS_TOKEN);
        let refresh = self.key(REFRESH_TOKEN);
        self.update(|entries| {
            entries.insert(access, pair.access_token.clone());
            entries.insert(refresh, pair.refresh_token.clone());
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        let keys = [ACCESS_TOKEN, REFRESH_TOKEN, USER_INFO].map(|name| self.key(name));
        self.update(|entries| {
            for key in &keys {
                entries.remove(key);
            }
        })
    }

    fn user_profile(&self) -> Option<UserProfile> {
        let raw = self.get_entry(USER_INFO)?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cached user profile: {}", e);
                None
            }
        }
    }

    fn set_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let raw = serde_json::to_string(profile)?;
        let key = self.key(USER_INFO);
        self.update(|entries| {
            entries.insert(key, raw);
        })
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read_entries(path: &Path) -> Result<Entries, StoreError> {
    if !path.exists() {
        return Ok(Entries::new());
    }
    let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    Ok(toml::from_str(&content)?)
}

fn write_entries(path: &Path, entries: &Entries) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }
    let content = toml::to_string(entries)?;
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content).map_err(|e| io_error(&tmp, e))?;

    // Restrictive permissions (file contains tokens)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(&tmp, perms).map_err(|e| io_error(&tmp, e))?;
    }

    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}
