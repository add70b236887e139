//! skiff - share a local folder peer-to-peer, identified only by a
//! session key.
//!
//! `skiff send` shares the sender folder and prints the key; `skiff join
//! <key>` mirrors that share into the downloads folder and keeps it fresh
//! until interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

mod config;
mod ops;
mod process;
mod version;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "skiff")]
#[command(author, version, about = "Peer-to-peer folder sharing over a session key", long_about = None)]
struct Args {
    /// Base directory for stores and shared folders (defaults to ~/.skiff)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Port for the peer endpoint; an ephemeral port is used when unset
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Share the sender folder and print the session key
    Send,
    /// Join a share with its session key and mirror it into downloads
    Join {
        /// The sender's session key (64 hex characters)
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.base_dir, args.log_level, args.port)?;

    // Initialize tracing
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level.into())
        .from_env_lossy();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(fmt_layer).init();

    process::register_panic_logger();
    process::report_build_info();

    config.ensure_dirs()?;

    let (_signal_handle, _shutdown_tx, shutdown_rx) = process::graceful_shutdown_blocker();

    match args.command {
        Command::Send => ops::send::execute(&config, shutdown_rx).await,
        Command::Join { key } => ops::join::execute(&key, &config, shutdown_rx).await,
    }
}
