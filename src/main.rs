//! Portal CLI - session client for the portal REST backends
//!
//! Log in once, then call any endpoint with automatic token refresh.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portal_cli::api::{self, Method};
use portal_cli::auth;

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(about = "Authenticated command-line client for the portal APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend profile (main, device, student, teacher, channel, ...)
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session tokens
    Login {
        /// Username, phone or email
        username: String,

        /// Password (prompted for if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Refresh the access token now
    Refresh,

    /// Show current user info (verify auth works)
    Whoami,

    /// GET an endpoint
    Get(RequestArgs),

    /// POST to an endpoint
    Post(RequestArgs),

    /// PUT to an endpoint
    Put(RequestArgs),

    /// PATCH an endpoint
    Patch(RequestArgs),

    /// DELETE an endpoint
    Delete(RequestArgs),
}

#[derive(clap::Args)]
struct RequestArgs {
    /// Path relative to the profile's base URL (e.g. /agents)
    path: String,

    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "query", value_parser = parse_query)]
    query: Vec<(String, String)>,
}

fn parse_query(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

async fn request(profile: Option<&str>, method: Method, args: RequestArgs) -> Result<()> {
    api::request(profile, method, &args.path, args.data.as_deref(), &args.query)
        .await
        .with_context(|| format!("Request to {} failed", args.path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Login { username, password } => {
            tracing::info!("Logging in...");
            auth::login(profile, &username, password).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout(profile).await?;
        }
        Commands::Status => {
            auth::status(profile).await?;
        }
        Commands::Refresh => {
            auth::commands::refresh(profile).await?;
        }
        Commands::Whoami => {
            api::whoami(profile).await?;
        }
        Commands::Get(args) => request(profile, Method::GET, args).await?,
        Commands::Post(args) => request(profile, Method::POST, args).await?,
        Commands::Put(args) => request(profile, Method::PUT, args).await?,
        Commands::Patch(args) => request(profile, Method::PATCH, args).await?,
        Commands::Delete(args) => request(profile, Method::DELETE, args).await?,
    }

    Ok(())
}
