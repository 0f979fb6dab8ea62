//! The `beer serve` subcommand.

use anyhow::Result;
use clap::Args;
use tracing::info;

use beer_protocol::core::config::Settings;
use beer_protocol::game::board::ONE_SHIP;
use beer_protocol::server::{serve, ServerConfig};

#[derive(Args)]
pub struct ServeArgs {
    /// Listen host (overrides BEER_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides BEER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Enable AEAD framing with a static key (hex; omit the value to use
    /// the built-in key / BEER_KEY)
    #[arg(long, value_name = "HEX", num_args = 0..=1, default_missing_value = "")]
    secure: Option<String>,

    /// Enable AEAD framing with per-connection ECDH key exchange
    #[arg(long)]
    ecdh: bool,

    /// Restrict the roster to the Carrier for fast matches
    #[arg(long)]
    one_ship: bool,

    /// Prompt players to place ships manually (random fallback on timeout)
    #[arg(long)]
    manual_placement: bool,

    /// Disable the opponent-reveal OPP_GRID channel
    #[arg(long)]
    no_reveal: bool,
}

pub async fn run(args: ServeArgs, settings: Settings) -> Result<()> {
    let security = crate::resolve_security(args.secure.as_deref(), args.ecdh, &settings)?;

    let mut config = ServerConfig::from_settings(&settings);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.security = security;
    if config.security.is_sealed() {
        info!("AEAD framing ENABLED");
    }
    if args.one_ship {
        config.match_config.roster = ONE_SHIP.to_vec();
        info!("running in ONE-SHIP mode (Carrier only)");
    }
    config.match_config.manual_placement = args.manual_placement;
    config.match_config.reveal_channel = !args.no_reveal;

    serve(config).await?;
    Ok(())
}
