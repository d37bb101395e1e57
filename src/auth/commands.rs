//! Login, logout and status commands for the CLI

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::inspect;
use crate::api;

/// Log in with username/password, prompting for the password if not given.
pub async fn login(profile: Option<&str>, username: &str, password: Option<String>) -> Result<()> {
    let client = api::connect(profile)?;
    let password = match password {
        Some(p) => p,
        None => prompt_password()?,
    };

    let user = client
        .login(username, &password)
        .await
        .with_context(|| format!("Login to {} failed", client.config().base_url))?;

    match user.as_ref().and_then(|u| u.display_name()) {
        Some(name) => println!("Logged in as {}.", name),
        None => println!("Login successful."),
    }
    Ok(())
}

fn prompt_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// End the session on the server (when supported) and clear credentials
pub async fn logout(profile: Option<&str>) -> Result<()> {
    let client = api::connect(profile)?;
    client.logout().await.context("Failed to clear credentials")?;
    println!("Logged out.");
    Ok(())
}

/// Force a token refresh now
pub async fn refresh(profile: Option<&str>) -> Result<()> {
    let client = api::connect(profile)?;
    client
        .coordinator()
        .request_refresh()
        .await
        .context("Token refresh failed")?;
    println!("Token refreshed successfully.");
    Ok(())
}

fn format_expiry(token: &str) -> String {
    inspect::decode_expiry(token)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "(unknown)".to_string())
}

/// Status lines for one stored token: its state, then expiry and subject
/// when the payload decodes (expired tokens included).
fn token_lines(label: &str, token: Option<&str>, now: i64, window_ms: i64) -> Vec<String> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return vec![format!("{} none", label)];
    };
    if !inspect::is_well_formed(token) {
        return vec![format!("{} malformed", label)];
    }

    let state = if inspect::is_expired(token, now) {
        "expired"
    } else if inspect::is_expiring_soon(token, now, window_ms) {
        "expiring soon"
    } else {
        "valid"
    };
    let mut lines = vec![
        format!("{} {}", label, state),
        format!("  expires_at: {}", format_expiry(token)),
    ];
    if let Some(sub) = inspect::decode_subject(token) {
        lines.push(format!("  subject:    {}", sub));
    }
    lines
}

/// Display current auth status
pub async fn status(profile: Option<&str>) -> Result<()> {
    let client = api::connect(profile)?;
    let config = client.config();
    let store = client.store();
    let now = inspect::now_ms();
    let window = config.expiring_soon_window_ms();

    println!("Backend:     {}", config.base_url);
    for line in token_lines("Access tok: ", store.access_token().as_deref(), now, window) {
        println!("{}", line);
    }
    for line in token_lines("Refresh tok:", store.refresh_token().as_deref(), now, window) {
        println!("{}", line);
    }

    match client.current_user() {
        Some(user) => println!(
            "User:        {}",
            user.display_name().unwrap_or("(unnamed)")
        ),
        None => println!("User:        (not cached)"),
    }

    Ok(())
}
