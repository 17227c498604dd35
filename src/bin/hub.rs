use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lanwatch::{
    actors::messages::MonitorEvent,
    config::read_config_file,
    hub::Hub,
    net::{DnsResolver, HostnameResolver, NoResolver, SystemPing},
    storage::{MemoryBackend, StorageBackend},
    util::{get_config_path, get_db_path},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// SQLite database file (defaults to $LANWATCH_DB or ./lanwatch.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON configuration to store before starting (defaults to $LANWATCH_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep everything in memory instead of SQLite
    #[arg(long)]
    memory: bool,

    /// Skip reverse DNS lookups for discovered hosts
    #[arg(long)]
    no_dns: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("lanwatch", level),
        ("lanwatch_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_storage(args: &Args) -> anyhow::Result<Arc<dyn StorageBackend>> {
    if args.memory {
        info!("using in-memory storage");
        return Ok(Arc::new(MemoryBackend::new()));
    }

    #[cfg(feature = "storage-sqlite")]
    {
        let path = args.db.clone().unwrap_or_else(get_db_path);
        info!("using database {}", path.display());
        let backend = lanwatch::storage::sqlite::SqliteBackend::new(&path).await?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "storage-sqlite"))]
    {
        warn!("built without storage-sqlite, falling back to in-memory storage");
        Ok(Arc::new(MemoryBackend::new()))
    }
}

/// Store the configuration file, if one was given, as the active configuration
async fn seed_config(args: &Args, storage: &dyn StorageBackend) -> anyhow::Result<()> {
    let Some(path) = args.config.clone().or_else(get_config_path) else {
        return Ok(());
    };

    let config = read_config_file(&path)?;
    config.validate()?;
    storage.save_config(&config).await?;
    info!("loaded configuration from {}", path.display());
    Ok(())
}

#[instrument(skip_all)]
async fn log_events(mut events: broadcast::Receiver<MonitorEvent>) {
    loop {
        match events.recv().await {
            Ok(MonitorEvent::DeviceStatusChanged {
                name,
                previous,
                current,
                ..
            }) => info!("{name}: {previous} -> {current}"),
            Ok(MonitorEvent::ScanProgress(progress)) => trace!(
                "scan {}/{} ({} found)",
                progress.scanned, progress.total, progress.found
            ),
            Ok(MonitorEvent::MetricsBatch(samples)) => {
                debug!("recorded {} metric samples", samples.len())
            }
            Ok(event) => trace!("event: {event:?}"),
            Err(RecvError::Lagged(skipped)) => warn!("event log lagged, skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let storage = open_storage(&args).await?;
    seed_config(&args, storage.as_ref()).await?;

    let resolver: Arc<dyn HostnameResolver> = if args.no_dns {
        Arc::new(NoResolver)
    } else {
        Arc::new(DnsResolver::default())
    };

    let hub = Hub::new(storage.clone(), Arc::new(SystemPing::default()), resolver);
    let logger = tokio::spawn(log_events(hub.subscribe()));

    hub.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");

    hub.shutdown().await;
    logger.abort();

    if let Err(e) = storage.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}
