//! qdiskd - Disk-based quorum arbitration daemon
//!
//! Single-threaded, synchronous by design: the protocol is a cooperative
//! tick loop with no concurrent writers, so there is nothing here for an
//! async runtime to schedule around.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qdiskd::config::QdiskConfig;
use qdiskd::daemon::Paceloop;
use qdiskd::disk::{resolve_label, BlockDevice};
use qdiskd::error::Result;
use qdiskd::membership::LoggingMembership;
use qdiskd::rt;
use qdiskd::rt::SystemReboot;
use qdiskd::score::FixedScore;

#[derive(Parser)]
#[command(name = "qdiskd")]
#[command(author, version, about = "Disk-based quorum arbitration daemon", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "/etc/qdiskd/qdiskd.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Stay in the foreground (do not detach)
    #[arg(short, long)]
    foreground: bool,

    /// Close standard streams after startup
    #[arg(short = 'Q', long = "close-stdio")]
    close_stdio: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the quorum daemon
    Start,
    /// Validate the configuration file and exit
    Validate,
    /// Print the human-readable status file and exit
    Status,
    /// Write a default configuration file
    Init {
        /// Output path for the generated config
        #[arg(short, long, default_value = "qdiskd.toml")]
        output: PathBuf,

        /// Node id to embed in the generated config
        #[arg(long, default_value_t = 1)]
        node_id: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Start => run_start(&cli.config, cli.foreground, cli.close_stdio),
        Commands::Validate => run_validate(&cli.config),
        Commands::Status => run_status(&cli.config),
        Commands::Init { output, node_id } => run_init(&output, node_id),
    }
}

fn init_logging(debug_flag: bool) {
    let forced_debug = std::env::var("QDISK_DEBUGLOG")
        .map(|v| v == "1")
        .unwrap_or(false);
    let level = if debug_flag || forced_debug { "debug" } else { "info" };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run_start(config_path: &PathBuf, foreground: bool, close_stdio: bool) -> Result<()> {
    tracing::info!("starting qdiskd");

    let config = match QdiskConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = ?config_path, error = %e, "failed to load configuration");
            return Err(e);
        }
    };
    tracing::info!(node_id = config.node.id, "configuration loaded");

    if !foreground {
        tracing::info!("running in foreground regardless of daemonization flag: no fork(2) in this build");
    }
    if close_stdio {
        tracing::debug!("close-stdio requested; standard streams remain attached under this supervisor model");
    }

    rt::lock_memory();
    rt::apply_scheduler(&config.scheduler);

    let device_path = match (&config.disk.device, &config.disk.label) {
        (Some(path), _) => path.clone(),
        (None, Some(label)) => resolve_label(label)?,
        (None, None) => unreachable!("validated by QdiskConfig::validate"),
    };

    let disk = BlockDevice::open(&device_path, config.disk.block_size_override)?;
    let membership = LoggingMembership::new(config.node.id, &[config.node.id]);
    let score = FixedScore::healthy();
    let reboot = SystemReboot;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handle = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        shutdown_handle.store(true, Ordering::Relaxed);
    })
    .map_err(|e| qdiskd::Error::Internal(format!("failed to install signal handler: {e}")))?;

    let mut paceloop = Paceloop::new(
        config,
        Box::new(disk),
        Box::new(membership),
        Box::new(score),
        Box::new(reboot),
        shutdown,
    );

    paceloop.quorum_init()?;
    paceloop.run()
}

fn run_validate(config_path: &PathBuf) -> Result<()> {
    match QdiskConfig::from_file(config_path) {
        Ok(config) => {
            println!("configuration OK (node id {})", config.node.id);
            Ok(())
        }
        Err(e) => {
            eprintln!("configuration error: {e}");
            Err(e)
        }
    }
}

fn run_status(config_path: &PathBuf) -> Result<()> {
    let config = QdiskConfig::from_file(config_path)?;
    if config.status_file.path == "-" {
        println!("status file is configured to print to stdout directly; nothing to read");
        return Ok(());
    }
    match std::fs::read_to_string(&config.status_file.path) {
        Ok(contents) => {
            print!("{contents}");
            Ok(())
        }
        Err(e) => {
            eprintln!("could not read status file {}: {e}", config.status_file.path);
            Err(e.into())
        }
    }
}

fn run_init(output: &PathBuf, node_id: u32) -> Result<()> {
    let template = format!(
        r#"[disk]
device = "/dev/sdq1"

[node]
id = {node_id}

[timing]
interval = 1
tko = 10

[quorum]
votes = 1

[flags]
reboot = false
allow_kill = false

[status_file]
path = "/var/run/qdiskd/status"
"#
    );

    std::fs::write(output, template)?;
    println!("wrote default configuration to {}", output.display());
    Ok(())
}
