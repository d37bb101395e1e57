//! Login and refresh grant payloads

use serde_json::Value;

use super::UserProfile;

/// Keys under which login responses have been seen to carry the user.
const USER_KEYS: [&str; 5] = ["user", "userInfo", "admin", "student", "teacher"];

/// Tokens (and possibly a user) returned by the login or refresh endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the server does not rotate the refresh token.
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl TokenGrant {
    /// Decode a grant from either a bare body or one wrapped as
    /// `{code, message, data: {...}}`. Top level wins if both carry tokens.
    pub fn from_body(body: &Value) -> Option<Self> {
        [Some(body), body.get("data")]
            .into_iter()
            .flatten()
            .find_map(Self::from_object)
    }

    fn from_object(obj: &Value) -> Option<Self> {
        let access_token = obj
            .get("access_token")
            .or_else(|| obj.get("token"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?
            .to_string();
        let refresh_token = obj
            .get("refresh_token")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let user = USER_KEYS
            .iter()
            .filter_map(|key| obj.get(*key))
            .find(|v| v.is_object())
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        Some(Self {
            access_token,
            refresh_token,
            user,
        })
    }
}
