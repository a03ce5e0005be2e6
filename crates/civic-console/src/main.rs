mod config;
mod render;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use civic_remote::RemoteTransport;
use civic_store::models::ProfileRow;
use civic_store::{Database, LocalPlatform};
use civic_sync::{SendMetadata, SendOutcome, SyncEngine, SyncError, Transport};

use crate::config::{Backend, ConsoleConfig};
use crate::render::Printer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "civic=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ConsoleConfig::from_env()?;

    let transport: Arc<dyn Transport> = match &config.backend {
        Backend::Local(path) => {
            let db = Database::open(path)?;
            // Make sure our own messages resolve to a name
            db.upsert_profile(&ProfileRow {
                id: config.identity.user_id.clone(),
                full_name: config.identity.display_name.clone(),
                display_name: None,
                avatar_url: None,
                role: config.identity.role.as_str().to_string(),
            })?;
            Arc::new(LocalPlatform::new(Arc::new(db), config.identity.user_id.clone()))
        }
        Backend::Remote(remote) => {
            info!("Using platform at {}", remote.api_url);
            Arc::new(RemoteTransport::new(remote.clone()))
        }
    };

    let engine = SyncEngine::new(transport, config.identity.clone(), config.sync.clone());
    let printer = tokio::spawn(print_changes(engine.clone()));

    if let Err(e) = engine.attach_typed(config.channel_type, &config.channel_id).await {
        warn!("Initial load failed: {}", e);
    }
    info!(
        "{} on {}/{}; type a message, /reload or /quit",
        config.identity.display_name, config.channel_type, config.channel_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "/quit" => break,
            "/reload" => {
                if let Err(e) = engine.reload().await {
                    warn!("Reload failed: {}", e);
                }
            }
            text => match engine.send(text, SendMetadata::default()).await {
                Ok(SendOutcome::Delivered) => {}
                Ok(SendOutcome::IgnoredBlank) => {}
                Err(e @ SyncError::Unconfirmed { .. }) => {
                    warn!("{}; /reload to check the thread before resending", e)
                }
                Err(e) if e.is_retryable() => {
                    warn!("{}; the text is back in the draft, /reload to refresh", e)
                }
                Err(e) => warn!("{}", e),
            },
        }
    }

    engine.detach().await;
    printer.abort();
    info!("Bye");
    Ok(())
}

async fn print_changes(engine: SyncEngine) {
    let mut rx = engine.subscribe();
    let mut printer = Printer::default();
    loop {
        let lines = printer.update(&rx.borrow_and_update());
        for line in lines {
            println!("{}", line);
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
