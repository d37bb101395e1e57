//! Wire envelope decoding
//!
//! Success bodies come in two shapes, `{code, message, data}` with
//! `code == 200` or `{success, message, data}`. Anything else is rejected
//! rather than passed through.

use serde::Deserialize;
use serde_json::Value;

use super::transport::HttpResponse;
use crate::error::ApiError;

/// Business code meaning success in the coded envelope.
pub const SUCCESS_CODE: i64 = 200;

/// Error bodies are truncated to this many characters when shown verbatim.
const MAX_TEXT_MESSAGE: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireEnvelope {
    Coded {
        code: i64,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        msg: Option<String>,
        #[serde(default)]
        data: Value,
    },
    Flagged {
        success: bool,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        msg: Option<String>,
        #[serde(default)]
        data: Value,
    },
}

/// Unwrap `data` from a 2xx response.
pub fn decode_success(response: &HttpResponse) -> Result<Value, ApiError> {
    if response.status == 204 {
        return Ok(Value::Null);
    }

    let status = i64::from(response.status);
    let unrecognized = |what: &str| ApiError::Business {
        code: status,
        message: format!("unrecognized response shape: {}", what),
    };

    let body: Value = match serde_json::from_slice(&response.body) {
        Ok(v) => v,
        Err(_) if response.body.is_empty() => return Err(unrecognized("empty body")),
        Err(_) => return Err(unrecognized("not JSON")),
    };
    if !body.is_object() {
        return Err(unrecognized("not an object"));
    }

    match serde_json::from_value::<WireEnvelope>(body) {
        Ok(WireEnvelope::Coded { code, data, .. }) if code == SUCCESS_CODE => Ok(data),
        Ok(WireEnvelope::Coded {
            code, message, msg, ..
        }) => Err(ApiError::Business {
            code,
            message: message
                .or(msg)
                .unwrap_or_else(|| "request failed".to_string()),
        }),
        Ok(WireEnvelope::Flagged {
            success: true,
            data,
            ..
        }) => Ok(data),
        Ok(WireEnvelope::Flagged { message, msg, .. }) => Err(ApiError::Business {
            code: status,
            message: message
                .or(msg)
                .unwrap_or_else(|| "request failed".to_string()),
        }),
        Err(_) => Err(unrecognized("missing code/success field")),
    }
}

/// Fallback message for an HTTP error status.
pub fn default_status_message(status: u16, auth_endpoint: bool) -> String {
    match status {
        400 => "invalid request parameters".to_string(),
        401 if auth_endpoint => "incorrect username or password".to_string(),
        401 => "unauthorized, please log in again".to_string(),
        403 => "permission denied".to_string(),
        404 => "resource not found".to_string(),
        500 => "internal server error".to_string(),
        502 => "bad gateway".to_string(),
        503 => "service temporarily unavailable".to_string(),
        other => format!("request failed ({})", other),
    }
}

/// Map a non-2xx response to `ApiError::Server` with a display message.
///
/// The body's `message`, `detail` or `msg` wins, except for 500/502/503
/// where the server text is not meant for users.
pub fn normalize_error(response: &HttpResponse, auth_endpoint: bool) -> ApiError {
    let status = response.status;
    let parsed: Option<Value> = serde_json::from_slice(&response.body).ok();

    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_i64);

    let body_message = match &parsed {
        Some(v) => ["message", "detail", "msg"]
            .iter()
            .filter_map(|key| v.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(String::from),
        None => {
            let text = response.text();
            let text = text.trim();
            (!text.is_empty()).then(|| text.chars().take(MAX_TEXT_MESSAGE).collect())
        }
    };

    let message = match status {
        500 | 502 | 503 => default_status_message(status, auth_endpoint),
        _ => body_message.unwrap_or_else(|| default_status_message(status, auth_endpoint)),
    };

    ApiError::Server {
        status,
        code,
        message,
    }
}
