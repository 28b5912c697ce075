use clap::Parser;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use xenbus_store::{Store, XenStore};
use xenbusd::BusRegistry;
use xenbusd::config::{BusConfig, DEFAULT_ROOT, DEFAULT_STORE_SOCKET};
use xenbusd::diag::DiagConfig;
use xenbusd::watch::{BusDispatcher, Startup};

#[derive(Parser)]
#[command(name = "xenbusd")]
#[command(about = "Backend bus prober for the xenstore namespace", long_about = None)]
struct Args {
    /// Store socket path
    #[arg(short, long, default_value = DEFAULT_STORE_SOCKET)]
    socket: String,

    /// Root of the bus subtree
    #[arg(long, default_value = DEFAULT_ROOT)]
    root: String,

    /// Only probe these device types (repeatable); default is every type
    #[arg(long = "type")]
    device_types: Vec<String>,

    /// Publish probe statistics under this store path (best effort)
    #[arg(long)]
    diag_path: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!(socket = %args.socket, root = %args.root, "starting xenbusd");

    // A failed connection is fatal; everything after this self-corrects
    // through the watch mechanism.
    let store: Arc<dyn Store> = match XenStore::connect(&args.socket).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to connect to store");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(BusRegistry::new());
    let config = BusConfig {
        root: args.root,
        device_types: args.device_types,
        ..Default::default()
    };
    let diag = DiagConfig {
        report_path: args.diag_path,
        ..Default::default()
    };

    let mut dispatcher = BusDispatcher::new(
        Arc::clone(&store),
        registry,
        config,
        diag,
        Startup::Direct,
    );
    if let Err(e) = dispatcher.start().await {
        error!(error = %e, "failed to start dispatcher");
        std::process::exit(1);
    }

    // Set up signal handlers
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to set up SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to set up SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    dispatcher.stop().await;
    info!("shutdown complete");
}
