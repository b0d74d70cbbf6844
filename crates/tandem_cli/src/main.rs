//! Tandem CLI
//!
//! Keeps two directory trees mirrored in both directions.
//!
//! # Commands
//!
//! - `local` - Mirror two trees on this machine
//! - `serve` - Run one networked endpoint (receiver + pusher)
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::serve::ServeOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tandem_engine::{DetectionMode, SyncConfig};
use tracing_subscriber::EnvFilter;

/// Bidirectional file tree synchronization.
#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror two directories on this machine
    Local {
        /// First tree
        a: PathBuf,

        /// Second tree
        b: PathBuf,

        /// Use filesystem notifications instead of periodic scans
        #[arg(short, long)]
        watch: bool,

        /// Scan interval in milliseconds
        #[arg(short, long, default_value = "2000")]
        interval_ms: u64,
    },

    /// Run one endpoint of a networked pair
    Serve {
        /// Tree to synchronize
        #[arg(short, long)]
        root: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:5000")]
        listen: SocketAddr,

        /// Address of the other endpoint
        #[arg(long)]
        peer: String,

        /// Use periodic scans instead of filesystem notifications
        #[arg(long)]
        poll: bool,

        /// Scan interval in milliseconds
        #[arg(short, long, default_value = "2000")]
        interval_ms: u64,

        /// Receiver worker threads
        #[arg(long, default_value = "4")]
        workers: usize,
    },

    /// Show version information
    Version,
}

fn sync_config(interval_ms: u64) -> SyncConfig {
    SyncConfig::new().with_poll_interval(Duration::from_millis(interval_ms.max(1)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Local {
            a,
            b,
            watch,
            interval_ms,
        } => {
            let mode = if watch {
                DetectionMode::Watch
            } else {
                DetectionMode::Poll
            };
            commands::local::run(&a, &b, mode, sync_config(interval_ms))?;
        }
        Commands::Serve {
            root,
            listen,
            peer,
            poll,
            interval_ms,
            workers,
        } => {
            let mode = if poll {
                DetectionMode::Poll
            } else {
                DetectionMode::Watch
            };
            let options = ServeOptions {
                root: &root,
                listen,
                peer,
                mode,
                workers,
            };
            commands::serve::run(options, sync_config(interval_ms))?;
        }
        Commands::Version => {
            println!("Tandem CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Wire protocol: SYNC/DELETE over TCP");
        }
    }

    Ok(())
}
