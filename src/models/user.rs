//! User-related models

use serde::{Deserialize, Serialize};

/// User profile cached alongside the credential pair.
///
/// Backends disagree on field names, so only the common ones are typed and
/// everything else is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Username, then name, then email.
    pub fn display_name(&self) -> Option<&str> {
        self.username
            .as_deref()
            .or(self.name.as_deref())
            .or(self.email.as_deref())
    }
}
