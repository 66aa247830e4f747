use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use palaver::api::HttpConversationApi;
use palaver::config::{ENV_API_URL, ENV_AUTH_TOKEN, ENV_USER_ID};
use palaver::services::{Database, SettingsService};
use palaver::shell::Shell;
use palaver::Session;

#[derive(Parser, Debug)]
#[command(name = "palaver")]
#[command(about = "Conversation list shell for the Palaver chat client")]
struct Args {
    /// Signed-in user id
    #[arg(long, env = ENV_USER_ID)]
    user: String,

    /// API base URL; overrides the stored setting
    #[arg(long, env = ENV_API_URL)]
    api_url: Option<String>,

    /// Bearer token for the chat API
    #[arg(long, env = ENV_AUTH_TOKEN)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let db = Database::open().await?;
    let mut settings = SettingsService::load(&db).await;
    if let Some(url) = args.api_url {
        settings.api_base_url = url;
        SettingsService::save(&db, &settings).await?;
    }
    tracing::info!(api = %settings.api_base_url, user = %args.user, "Starting session");

    let api = HttpConversationApi::new(&settings.api_base_url, args.token)
        .context("Invalid API base URL")?;
    let (session, notices) = Session::start(&args.user, Arc::new(api), db, settings).await?;

    Shell::new(session).run(notices).await
}
