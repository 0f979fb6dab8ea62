//! The `beer play` subcommand: a thin terminal player.
//!
//! Incoming payloads are rendered to stdout; stdin lines go to the server
//! verbatim (`FIRE A1`, `CHAT hi`, `QUIT`, `PLACE A1 H`).

use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};

use beer_protocol::client::{ClientConfig, GameClient};
use beer_protocol::core::config::Settings;
use beer_protocol::wire::payload::{Payload, TypedPayload};

#[derive(Args)]
pub struct PlayArgs {
    /// Server host (overrides BEER_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides BEER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Enable AEAD framing with a static key (hex; omit the value to use
    /// the built-in key / BEER_KEY)
    #[arg(long, value_name = "HEX", num_args = 0..=1, default_missing_value = "")]
    secure: Option<String>,

    /// Enable AEAD framing with per-connection ECDH key exchange
    #[arg(long)]
    ecdh: bool,

    /// Reconnect token (overrides BEER_TOKEN; default derived from the
    /// process id)
    #[arg(long)]
    token: Option<String>,
}

pub async fn run(args: PlayArgs, settings: Settings) -> Result<()> {
    let security = crate::resolve_security(args.secure.as_deref(), args.ecdh, &settings)?;
    let host = args.host.unwrap_or_else(|| settings.host.clone());
    let port = args.port.unwrap_or(settings.port);
    let token = args.token.or_else(|| std::env::var("BEER_TOKEN").ok());

    let mut client = GameClient::connect(ClientConfig {
        server_addr: format!("{host}:{port}"),
        token,
        security,
    })
    .await?;
    println!("[INFO] Using handshake TOKEN='{}'", client.token());
    println!("[INFO] Connected to {host}:{port}");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            payload = client.next_payload() => {
                match payload {
                    Some((_, payload)) => render(&payload),
                    None => {
                        println!("[INFO] Server closed the connection");
                        break;
                    }
                }
            }
            line = stdin.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        client.send_line(line.trim()).await?;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    Ok(())
}

fn render(payload: &Payload) {
    match payload {
        Payload::Text { msg } => println!("{msg}"),
        Payload::Handshake { .. } => {}
        Payload::Typed(typed) => match typed {
            TypedPayload::Grid { rows } => print_grid("Board", rows),
            TypedPayload::OppGrid { rows } => print_grid("Opponent fleet", rows),
            TypedPayload::SpecGrid { rows_p1, rows_p2 } => {
                print_grid("Player 1", rows_p1);
                print_grid("Player 2", rows_p2);
            }
            TypedPayload::Chat { name, msg } => println!("[CHAT] {name}: {msg}"),
            TypedPayload::Shot {
                player,
                coord,
                result,
                sunk,
            } => {
                let sunk = sunk
                    .as_deref()
                    .map(|ship| format!(" – sunk {ship}!"))
                    .unwrap_or_default();
                println!("[SHOT] P{player} fired at {coord}: {result:?}{sunk}");
            }
            TypedPayload::End {
                winner,
                reason,
                shots,
            } => println!("[GAME] Player {winner} wins by {reason} in {shots} shots"),
            TypedPayload::Role { slot } => println!("[INFO] You are Player {slot}"),
            TypedPayload::TurnPrompt { .. } => {}
        },
    }
}

fn print_grid(title: &str, rows: &[String]) {
    println!("\n[{title}]");
    let columns = rows.first().map_or(0, |r| r.split_whitespace().count());
    let header: Vec<String> = (1..=columns).map(|i| format!("{i:>2}")).collect();
    println!("   {}", header.join(" "));
    for (idx, row) in rows.iter().enumerate() {
        let label = (b'A' + idx as u8) as char;
        let cells: Vec<String> = row
            .split_whitespace()
            .map(|cell| format!("{cell:>2}"))
            .collect();
        println!("{label}  {}", cells.join(" "));
    }
}
