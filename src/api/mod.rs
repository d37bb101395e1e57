//! API client module for the portal backends

pub mod client;
pub mod envelope;
pub mod transport;

pub use client::{ApiClient, RequestDescriptor};
pub use envelope::{decode_success, normalize_error};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::ConsoleHost;
use crate::config::Config;

/// Build a client for the named profile (or the default one) from the
/// on-disk config and credential store.
pub fn connect(profile: Option<&str>) -> Result<ApiClient> {
    let config = Config::load()?;
    let client_config = config.profile(profile)?.clone();
    let host = Arc::new(ConsoleHost::new("portal-cli login"));
    ApiClient::from_profile(client_config, host).context("Failed to set up API client")
}

/// Send one request through the session pipeline and print the `data` as JSON.
pub async fn request(
    profile: Option<&str>,
    method: Method,
    path: &str,
    data: Option<&str>,
    query: &[(String, String)],
) -> Result<()> {
    let client = connect(profile)?;

    let mut descriptor = RequestDescriptor::new(method, path);
    for (key, value) in query {
        descriptor = descriptor.query(key.as_str(), value.as_str());
    }
    if let Some(raw) = data {
        let body = serde_json::from_str(raw).context("--data is not valid JSON")?;
        descriptor = descriptor.json(body);
    }

    let data = client.execute(descriptor).await.map_err(|e| {
        let envelope = e.envelope();
        match envelope.code {
            Some(code) => anyhow::anyhow!("{} (code {})", envelope.message, code),
            None => anyhow::anyhow!(envelope.message),
        }
    })?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

/// Fetch and display the current user.
pub async fn whoami(profile: Option<&str>) -> Result<()> {
    let client = connect(profile)?;
    let user = client
        .fetch_user_info()
        .await
        .context("Failed to fetch user info")?;

    println!();
    println!(
        "Name:     {}",
        user.display_name().unwrap_or("(none)")
    );
    println!("Email:    {}", user.email.as_deref().unwrap_or("(none)"));
    println!("Role:     {}", user.role.as_deref().unwrap_or("(none)"));
    if let Some(id) = &user.id {
        println!("ID:       {}", id);
    }

    Ok(())
}
