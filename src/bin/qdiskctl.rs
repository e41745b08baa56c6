//! qdiskctl - read-only operator tool for a qdiskd quorum disk
//!
//! Usage:
//!   qdiskctl status --device <path> [--max-nodes N]   - dump every slot
//!   qdiskctl validate-config <path>                    - check a TOML config

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use qdiskd::config::QdiskConfig;
use qdiskd::disk::{BlockDevice, QuorumDisk};
use qdiskd::error::Result;
use qdiskd::state::MAX_NODES;

#[derive(Parser)]
#[command(name = "qdiskctl")]
#[command(about = "Inspect a qdiskd quorum disk without starting the daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read every slot on the device and print it
    Status {
        /// Shared block device or file to read
        #[arg(long)]
        device: PathBuf,

        /// Highest node id to read (defaults to MAX_NODES)
        #[arg(long)]
        max_nodes: Option<u32>,
    },
    /// Check a configuration file for errors
    ValidateConfig {
        /// Path to the TOML config to check
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status { device, max_nodes } => run_status(&device, max_nodes),
        Commands::ValidateConfig { path } => run_validate_config(&path),
    }
}

fn run_status(device: &PathBuf, max_nodes: Option<u32>) -> Result<()> {
    let mut disk = BlockDevice::open(device, 0)?;
    let header = disk.read_header()?;
    println!("block_size: {}", header.block_size);
    println!("max_nodes (on disk): {}", header.max_nodes);

    let limit = max_nodes.unwrap_or(MAX_NODES as u32).min(header.max_nodes.max(1));

    for node_id in 1..=limit {
        match disk.read_block(node_id) {
            Ok(block) => println!(
                "node {node_id}: state={} msg={} seq={} incarnation={} timestamp={} updatenode={}",
                block.state, block.msg, block.seq, block.incarnation, block.timestamp, block.updatenode
            ),
            Err(e) => println!("node {node_id}: unreadable ({e})"),
        }
    }

    Ok(())
}

fn run_validate_config(path: &PathBuf) -> Result<()> {
    match QdiskConfig::from_file(path) {
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
