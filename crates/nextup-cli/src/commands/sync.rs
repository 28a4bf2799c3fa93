//! Peer sync commands: pair two devices over the local network.

use clap::Subcommand;
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use nextup_core::settings::data_dir;
use nextup_core::sync::{get_or_create_device_id, get_or_create_sync_secret, SyncEngine};
use nextup_core::{AppSettings, EventBus, SyncLink};

use crate::store::FileStore;

const DEFAULT_PORT: u16 = 7600;

#[derive(Subcommand)]
pub enum SyncAction {
    /// Show sync state: pending outbound events and last contact
    Status,
    /// Listen for a paired device (runs until Ctrl-C)
    Serve {
        /// Port to listen on; defaults to settings `listen_port` or 7600
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a paired device and stay connected (runs until
    /// Ctrl-C, reconnects with backoff)
    Connect {
        /// Peer host; defaults to the configured peer
        #[arg(long)]
        host: Option<String>,
        /// Peer port; defaults to the configured peer
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the pairing secret to copy to the other device
    Secret,
}

pub async fn run(action: SyncAction) -> Result<(), Box<dyn Error>> {
    let settings = AppSettings::load()?;
    let engine = Arc::new(build_engine(&settings)?);

    match action {
        SyncAction::Status => {
            let status = engine.status().await;
            match status.last_sync_at {
                Some(at) => println!("last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("last sync: never"),
            }
            println!("pending outbound events: {}", status.pending_count);
            println!("session active: {}", status.in_progress);
        }
        SyncAction::Serve { port } => {
            let port = port.or(settings.network.listen_port).unwrap_or(DEFAULT_PORT);
            let link = build_link(engine)?;
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            println!("listening on port {port} (Ctrl-C to stop)");
            link.listen(listener).await?;
        }
        SyncAction::Connect { host, port } => {
            let host = host
                .or(settings.network.peer_host)
                .ok_or("no peer host; pass --host or `settings set peer host:port`")?;
            let port = port.or(settings.network.peer_port).unwrap_or(DEFAULT_PORT);
            let link = build_link(engine)?;
            println!("connecting to {host}:{port} (Ctrl-C to stop)");
            link.connect(&host, port).await?;
        }
        SyncAction::Secret => {
            println!("{}", hex::encode(get_or_create_sync_secret()?));
        }
    }
    Ok(())
}

fn build_engine(settings: &AppSettings) -> Result<SyncEngine, Box<dyn Error>> {
    let store = Arc::new(FileStore::open()?);
    Ok(SyncEngine::new(
        store,
        EventBus::new(),
        get_or_create_device_id()?,
        settings.network.user_id.clone(),
        &data_dir()?,
    )?)
}

/// Wire the link's shutdown to Ctrl-C so in-flight events get a flush
/// window before the process exits.
fn build_link(engine: Arc<SyncEngine>) -> Result<SyncLink, Box<dyn Error>> {
    let secret = get_or_create_sync_secret()?;
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    Ok(SyncLink::new(engine, secret, rx))
}
