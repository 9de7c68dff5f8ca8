//! jsbridge - host bridge runtime for `nexus.*` addon scripts
//!
//! Runs the bridge core headless: addons are discovered on disk, each gets
//! an addon surface, and script runtimes attach to those surfaces over a
//! Unix socket. The main thread is the host frame thread.
//!
//! # Features
//! - Event bus, namespaced keybinds and timed game binds
//! - Overlay window bookkeeping with per-addon isolation
//! - Link data snapshots (MumbleLink and NexusLink regions)
//! - Quick access shortcuts and localization with a persistent store
//! - TOML configuration with per-component defaults

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod addons;
mod headless;
mod ipc;

use headless::HeadlessHost;
use ipc::{IpcServer, SurfacePool};
use jsbridge_core::config::Config;
use jsbridge_core::link::NexusLink;
use jsbridge_core::store::{FileStore, KeyValueStore, MemoryStore};
use jsbridge_core::{Bridge, LinkRegionId};

/// jsbridge - host bridge runtime for addon scripts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Run in debug mode with verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Print default configuration to stdout
    #[arg(long)]
    print_default_config: bool,

    /// Socket path for the wire protocol
    #[arg(short, long)]
    socket: Option<String>,

    /// Directory to discover addons in
    #[arg(long)]
    addons_dir: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("jsbridge v{} starting...", env!("CARGO_PKG_VERSION"));

    // Handle special commands
    if args.print_default_config {
        println!("{}", Config::default_config_string());
        return Ok(());
    }

    if args.validate {
        Config::load(args.config.as_deref())?;
        info!("Configuration is valid");
        return Ok(());
    }

    // Load configuration
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        },
        Err(e) => {
            warn!("Failed to load config: {:#}, using defaults", e);
            Config::default()
        },
    };
    if let Some(socket) = args.socket {
        config.general.socket_path = Some(socket);
    }
    if let Some(dir) = args.addons_dir {
        config.general.addons_dir = Some(dir);
    }

    run(config)
}

fn open_store(config: &Config) -> Arc<dyn KeyValueStore> {
    match config.store_path() {
        Some(path) => match FileStore::open(&path) {
            Ok(store) => {
                info!("Persisting keybinds and strings to {:?}", path);
                Arc::new(store)
            },
            Err(e) => {
                warn!("Failed to open store: {}, keeping state in memory", e);
                Arc::new(MemoryStore::new())
            },
        },
        None => Arc::new(MemoryStore::new()),
    }
}

fn run(config: Config) -> Result<()> {
    let host = Arc::new(HeadlessHost::new(&config));
    let store = open_store(&config);
    let addons_dir = config.addons_dir();
    let socket_path = config.socket_path();
    let tick = Duration::from_secs(1) / config.general.tick_rate_hz;
    let bridge = Bridge::new(config, host, store);

    // No game is attached, so publish a fixed viewport for NexusLink readers.
    let viewport = NexusLink {
        width: bridge.config().windows.default_width,
        height: bridge.config().windows.default_height,
        scaling: 1.0,
        ..NexusLink::default()
    };
    bridge
        .link_writer(LinkRegionId::Nexus)
        .publish(&viewport.to_bytes());

    let pool = SurfacePool::default();
    for manifest in addons::discover(&addons_dir)? {
        let id = manifest.id.clone();
        match bridge.load_addon(manifest) {
            Ok(surface) => {
                pool.lock().insert(id, Arc::new(surface));
            },
            Err(e) => warn!("Failed to load addon '{}': {}", id, e),
        }
    }
    info!("{} addon(s) loaded from {:?}", pool.lock().len(), addons_dir);

    IpcServer::new(&socket_path, Arc::clone(&pool))
        .start()
        .context("Failed to start wire protocol server")?;

    loop {
        let started = Instant::now();
        let stats = bridge.frame(started);
        if stats.tasks > 0 || stats.released > 0 {
            debug!(?stats, "frame");
        }
        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}
