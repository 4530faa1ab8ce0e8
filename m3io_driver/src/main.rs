//! # m3io Driver Binary
//!
//! Runs the driver core on a backend together with the poll and watch
//! clients declared in the configuration.
//!
//! # Usage
//!
//! ```bash
//! # Simulation backend with built-in defaults
//! m3io_driver
//!
//! # Explicit configuration, dump every outgoing command
//! m3io_driver --config config/m3io.toml --trace-requests
//!
//! # Kernel message queues as event queues, verbose JSON logs
//! m3io_driver -b simulation-msgq -v --json
//! ```

use clap::Parser;
use m3io_common::config::{ConfigLoader, DriverConfig, LogLevel};
use m3io_common::consts::DEFAULT_CONFIG_PATH;
use m3io_driver::clients::{PollClient, WatchClient, sleep_while, spawn_event_ticker};
use m3io_driver::{BackendRegistry, DriverCore};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Interval of the periodic statistics log.
const STATS_PERIOD: Duration = Duration::from_secs(10);

/// m3io driver - serialized command channel and interrupt dispatch
#[derive(Parser, Debug)]
#[command(name = "m3io_driver")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Serialized command queue and interrupt dispatch for backplane I/O modules")]
#[command(long_about = None)]
struct Args {
    /// Path to the driver configuration (m3io.toml). Defaults are used
    /// when omitted and the default path does not exist.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend to run on, overriding the configuration
    #[arg(short, long)]
    backend: Option<String>,

    /// Log every outgoing command frame
    #[arg(long)]
    trace_requests: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("m3io driver failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    config.command.trace_requests |= args.trace_requests;

    setup_tracing(&args, config.shared.log_level);
    info!(
        "m3io driver v{} starting ({})...",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let mut core = DriverCore::new(config.clone())?;
    core.init(&BackendRegistry::with_builtin())?;

    let running = core.running_flag();
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    let mut watchers = Vec::with_capacity(config.watch.len());
    for watch in &config.watch {
        let client = WatchClient::new(watch);
        let address = client.address();
        core.register(client.clone(), address.unit, address.slot, address.channel)?;
        watchers.push(client);
    }

    let mut threads = Vec::new();
    let queue = core.request_queue().ok_or("command worker not running")?;
    for poll in &config.poll {
        let client = PollClient::new(poll, &config.command, queue.clone())?;
        threads.push(client.spawn(running.clone())?);
    }

    if config.simulation.event_period_ms > 0 {
        match core.injector() {
            Some(injector) => threads.push(spawn_event_ticker(
                injector,
                Duration::from_millis(config.simulation.event_period_ms),
                running.clone(),
            )?),
            None => warn!("Backend '{}' cannot simulate interrupts", config.backend),
        }
    }

    info!(
        "Running with {} poll and {} watch clients",
        config.poll.len(),
        watchers.len()
    );
    while running.load(Ordering::SeqCst) {
        sleep_while(&running, STATS_PERIOD);
        let stats = core.stats();
        info!(
            "Stats: {} commands ({} ok, {} transport, {} correlation errors), {} queued; \
             {} events, {} wake-ups, {} unmatched, {} malformed",
            stats.worker.completed,
            stats.worker.succeeded,
            stats.worker.transport_errors,
            stats.worker.correlation_errors,
            stats.queued,
            stats.dispatch.events,
            stats.dispatch.wakeups,
            stats.dispatch.unmatched,
            stats.dispatch.malformed
        );
    }

    core.shutdown();
    for handle in threads {
        if handle.join().is_err() {
            warn!("Client thread panicked");
        }
    }
    for watcher in &watchers {
        info!("{}: {} wake-ups", watcher.name(), watcher.wakeups());
    }

    info!("m3io driver shutdown complete");
    Ok(())
}

/// Load the configuration, falling back to defaults when no file is given
/// and the default path is absent.
fn load_config(path: Option<&Path>) -> Result<DriverConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => return Ok(DriverConfig::default()),
    };
    DriverConfig::load(path).map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let level = if args.verbose { "debug" } else { level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
