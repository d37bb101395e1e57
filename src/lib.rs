//! Portal session client
//!
//! HTTP client for the portal REST backends with bearer-token sessions:
//! proactive and reactive token refresh behind a single-flight
//! coordinator, strict response-envelope decoding, and session
//! termination when credentials can't be recovered.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, RequestDescriptor};
pub use error::{ApiError, ErrorEnvelope, StoreError};
