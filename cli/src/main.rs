//! BEER command-line frontend.
//!
//! One binary, two modes:
//!
//! ```bash
//! beer serve --ecdh --one-ship -v      # run the lobby server
//! beer play --ecdh --token PID42      # connect as a player
//! ```
//!
//! Environment variables (`BEER_HOST`, `BEER_PORT`, `BEER_SHOT_CLOCK`,
//! `BEER_PLACEMENT_TIMEOUT`, `BEER_BOARD_SIZE`, `BEER_KEY`, `BEER_DEBUG`,
//! `BEER_QUIET`, `BEER_TOKEN`) provide defaults; flags override them.

mod play;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::EnvFilter;

use beer_protocol::core::config::{SecurityMode, Settings};

#[derive(Parser)]
#[command(name = "beer", version, about = "BEER protocol match server and client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v: info, -vv: debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress everything but errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lobby server
    Serve(serve::ServeArgs),
    /// Connect to a server and play from the terminal
    Play(play::PlayArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();
    init_tracing(&cli, &settings);

    match cli.command {
        Commands::Serve(args) => serve::run(args, settings).await,
        Commands::Play(args) => play::run(args, settings).await,
    }
}

fn init_tracing(cli: &Cli, settings: &Settings) {
    let level = if cli.quiet {
        "error"
    } else if cli.debug || settings.debug || cli.verbose >= 2 {
        "debug"
    } else if cli.verbose >= 1 {
        "info"
    } else {
        "warn"
    };

    let mut filter = EnvFilter::new(level);
    for category in &settings.quiet {
        if let Ok(directive) = format!("beer::{category}=off").parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Shared `--secure[=<hex>]` / `--ecdh` resolution.
fn resolve_security(
    secure: Option<&str>,
    ecdh: bool,
    settings: &Settings,
) -> Result<SecurityMode> {
    if ecdh {
        return Ok(SecurityMode::Ecdh);
    }
    match secure {
        None => Ok(SecurityMode::Plain),
        Some("") => Ok(SecurityMode::StaticKey(settings.static_key.clone())),
        Some(hexstr) => {
            let key = hex::decode(hexstr.trim())
                .map_err(|_| anyhow::anyhow!("--secure key must be hex"))?;
            anyhow::ensure!(
                matches!(key.len(), 16 | 24 | 32),
                "--secure key must be 16, 24, or 32 bytes"
            );
            Ok(SecurityMode::StaticKey(key))
        }
    }
}
