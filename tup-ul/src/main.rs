//! tup-ul - Track Upload Pipeline
//!
//! Reads an upload manifest (JSON `UploadRequest`), runs it through the
//! two-phase pipeline against the local filesystem backend and prints the
//! result as JSON on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tup_common::config::{load_config, UploadSettings};
use tup_common::events::{EventBus, UploadEvent, UserId};
use tup_ul::local::{LocalRegistry, LocalStorage};
use tup_ul::models::UploadRequest;
use tup_ul::{PipelineConfig, Services, UploadOrchestrator};

/// Default store directory when neither CLI nor config names one
const DEFAULT_STORE_DIR: &str = "tup-store";

/// Command-line arguments for tup-ul
#[derive(Parser, Debug)]
#[command(name = "tup-ul")]
#[command(about = "Upload tracks, stems and collections in two phases")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TUP_CONFIG")]
    config: Option<PathBuf>,

    /// Upload manifest (JSON)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Local storage and registry directory
    #[arg(long, env = "TUP_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Uploading account
    #[arg(long, default_value_t = 1)]
    user_id: u64,

    /// Override max concurrent storage uploads
    #[arg(long)]
    max_uploads: Option<usize>,

    /// Override max concurrent chain publishes
    #[arg(long)]
    max_publishes: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let writer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer))
        .init();

    info!("Starting tup-ul v{}", env!("CARGO_PKG_VERSION"));

    let settings = UploadSettings {
        max_concurrent_uploads: args
            .max_uploads
            .unwrap_or(config.upload.max_concurrent_uploads),
        max_concurrent_publishes: args
            .max_publishes
            .unwrap_or(config.upload.max_concurrent_publishes),
    };
    settings.validate().context("Invalid concurrency settings")?;

    let store_dir = args
        .store_dir
        .or(config.store_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    info!("Store: {}", store_dir.display());

    let mut request = read_manifest(&args.manifest).await?;
    let base = args
        .manifest
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    request
        .resolve_files(&base)
        .context("Failed to resolve manifest files")?;

    let registry_path = store_dir.join("registry.json");
    let storage = Arc::new(
        LocalStorage::open(store_dir.join("files"))
            .await
            .context("Failed to open local storage")?,
    );
    let registry = Arc::new(
        LocalRegistry::load(&registry_path)
            .await
            .context("Failed to load local registry")?,
    );

    let events = EventBus::new(256);
    let logger = tokio::spawn(log_events(events.subscribe()));

    let services = Services::new(storage, registry.clone(), events);
    let orchestrator = UploadOrchestrator::new(services, PipelineConfig::from(&settings));

    let result = orchestrator.upload(UserId(args.user_id), request).await;

    // Registry may hold partial results even on failure
    registry
        .persist(&registry_path)
        .await
        .context("Failed to persist local registry")?;
    drop(orchestrator);
    if let Err(e) = logger.await {
        warn!("Event logger failed: {}", e);
    }

    match result {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            if !e.errored().is_empty() {
                eprintln!("{}", serde_json::to_string_pretty(e.errored())?);
            }
            Err(e).context("Upload failed")
        }
    }
}

async fn read_manifest(path: &std::path::Path) -> Result<UploadRequest> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Invalid manifest {}", path.display()))
}

/// Log lifecycle events until the bus closes
async fn log_events(mut rx: tokio::sync::broadcast::Receiver<UploadEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(UploadEvent::Progress { .. }) => {}
            Ok(event) => info!(event = event.event_type(), "{}", describe(&event)),
            Err(RecvError::Lagged(n)) => warn!("Event logger lagged, {} events dropped", n),
            Err(RecvError::Closed) => break,
        }
    }
}

fn describe(event: &UploadEvent) -> String {
    match event {
        UploadEvent::UploadStarted { kind, count, .. } => format!("{} upload of {} track(s) started", kind, count),
        UploadEvent::TrackPublished { track_index, track_id, .. } => {
            format!("track {} published as {}", track_index, track_id)
        }
        UploadEvent::StemPublished { track_id, parent_track_id, .. } => match parent_track_id {
            Some(parent) => format!("stem {} of {} published", track_id, parent),
            None => format!("stem {} published", track_id),
        },
        UploadEvent::TrackFailed { track_index, stem_index, phase, message, .. } => match stem_index {
            Some(stem) => format!("track {} stem {} failed in {}: {}", track_index, stem, phase, message),
            None => format!("track {} failed in {}: {}", track_index, phase, message),
        },
        UploadEvent::UploadCompleted { count, kind, .. } => format!("{} upload finished, {} published", kind, count),
        UploadEvent::CollectionCreated { collection_id, is_album, track_count, .. } => format!(
            "{} {} created with {} track(s)",
            if *is_album { "album" } else { "playlist" },
            collection_id,
            track_count
        ),
        UploadEvent::Progress { .. } => String::new(),
    }
}
