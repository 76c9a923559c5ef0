mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use recommendation::RecommendationClient;
use shared::domain::{FontScale, LinkState, PreferencesUpdate};
use storage::Storage;
use sync_core::{HttpRemoteAuthority, NetworkMonitor, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "greeniq", about = "Green IQ client sync engine")]
struct Args {
    /// Overrides the configured sqlite database url.
    #[arg(long)]
    database_url: Option<String>,
    /// Overrides the configured server base url.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the restored session, preferences, and queued actions.
    Status,
    /// Stores a session token and pulls remote settings.
    Login { token: String },
    /// Clears the stored session token.
    Logout,
    /// Updates one or more preference fields.
    Set {
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        high_contrast: Option<bool>,
        /// Font scale multiplier (snapped to 1.0 / 1.2 / 1.4).
        #[arg(long)]
        font_scale: Option<f64>,
        #[arg(long)]
        voice_enabled: Option<bool>,
    },
    /// Records a product scan; queued locally, synced on reconnect.
    Scan { barcode: Option<String> },
    /// Submits queued barcode scans to the server now.
    Flush,
    /// Fetches a disposal recommendation for a product name.
    Recommend { product_name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut settings = config::load_settings();
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let storage = Arc::new(Storage::new(&settings.database_url).await?);
    let remote = Arc::new(HttpRemoteAuthority::new(&settings.server_url));
    let engine = SyncEngine::new(storage, remote).await;

    match args.command {
        Command::Status => {
            let prefs = engine.preferences().await;
            let session = if engine.session_token().await.is_some() {
                "active"
            } else {
                "none"
            };
            println!("session: {session}");
            println!("preferences: {}", serde_json::to_string_pretty(&prefs)?);
            let queued = engine.queued_items().await;
            println!("queued actions: {}", queued.len());
            for item in queued {
                println!("  {}", serde_json::to_string(&item)?);
            }
        }
        Command::Login { token } => {
            engine.set_session_token(token).await;
            // The CLI has no connectivity feed, so pull explicitly.
            engine.pull_remote_settings().await;
            println!(
                "logged in; preferences: {}",
                serde_json::to_string(&engine.preferences().await)?
            );
        }
        Command::Logout => {
            engine.clear_session_token().await;
            println!("logged out; cached preferences and queue retained");
        }
        Command::Set {
            language,
            high_contrast,
            font_scale,
            voice_enabled,
        } => {
            // A one-shot invocation has no platform connectivity feed;
            // assume the link is up so the edit is pushed immediately.
            let monitor = NetworkMonitor::new(LinkState {
                is_connected: true,
                is_internet_reachable: None,
            });
            engine.attach_connectivity(Arc::clone(&monitor)).await;

            let update = PreferencesUpdate {
                language,
                high_contrast,
                font_scale: font_scale.map(FontScale::from_multiplier),
                voice_enabled,
            };
            let prefs = engine.update_preferences(update).await;
            println!("preferences: {}", serde_json::to_string(&prefs)?);
        }
        Command::Scan { barcode } => {
            let item = engine.record_scan(barcode).await;
            println!("queued scan id={}", item.id);
        }
        Command::Flush => {
            let report = engine.flush_offline_queue().await;
            println!(
                "flush: {:?} submitted={} retained={}",
                report.outcome, report.submitted, report.retained
            );
        }
        Command::Recommend { product_name } => {
            let Some(api_key) = settings.recommendation_api_key.clone() else {
                anyhow::bail!("no recommendation api key configured");
            };
            let client = RecommendationClient::new(api_key);
            let product = serde_json::json!({ "product_name": product_name });
            println!("{}", client.recommend(&product).await);
        }
    }

    Ok(())
}
