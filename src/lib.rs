//! # BEER Protocol
//!
//! **B**attleship **E**ncrypted **E**xchange **R**elay
//!
//! BEER is a framed, authenticated TCP protocol and match server for
//! two-player grid-based ship combat. It provides:
//!
//! - **Framing**: Length-delimited, sequence-numbered frames with CRC-32 or
//!   AES-GCM authentication, chosen per connection at handshake time
//! - **Reliability**: ACK/NAK control frames with a bounded retransmit ring
//!   to recover from corruption on an otherwise reliable TCP substrate
//! - **Replay protection**: A sliding window of accepted sequence numbers
//! - **Key exchange**: P-256 ECDH with HKDF-SHA256 session keys and
//!   threshold-driven in-session rekeying
//! - **Match sessions**: Turn alternation, shot adjudication, out-of-turn
//!   chat, forfeit, reconnect tokens, and spectator promotion
//! - **Lobby**: A pairing queue that doubles as the spectator gallery
//!
//! ## Modules
//!
//! - [`core`]: Constants, configuration, and error types
//! - [`wire`]: Frame codec, payload schema, replay window, retransmit ring
//! - [`crypto`]: ECDH keys, AEAD session ciphers, rekey scheduling
//! - [`transport`]: HELLO key exchange and the reader/writer endpoint
//! - [`game`]: Board engine, command parser, coordinates, session events
//! - [`server`]: Lobby controller, match session, reconnect, spectators
//! - [`client`]: Match client runtime
//!
//! ## Example Usage
//!
//! ```no_run
//! use beer_protocol::client::{ClientConfig, GameClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig {
//!     server_addr: "127.0.0.1:61337".into(),
//!     token: Some("PID42".into()),
//!     ..ClientConfig::default()
//! };
//!
//! let mut client = GameClient::connect(config).await?;
//! client.fire("B5").await?;
//!
//! while let Some(frame) = client.next_frame().await {
//!     // render grids / lines
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;

pub mod wire;

pub mod crypto;

pub mod transport;

pub mod game;

pub mod server;

pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::config::{SecurityMode, Settings};
    pub use crate::core::error::{BeerError, CommandError, CryptoError, WireError};
    pub use crate::crypto::keys::{EphemeralKeypair, SessionKey};
    pub use crate::crypto::session::LinkSecurity;
    pub use crate::game::board::Board;
    pub use crate::game::command::{parse_command, Command};
    pub use crate::game::event::{EndReason, Event, ShotResult, Slot};
    pub use crate::transport::endpoint::{EndpointConfig, FrameSink, FrameSource, Link};
    pub use crate::wire::frame::PacketType;
    pub use crate::wire::payload::{Payload, TypedPayload};
}

pub use crate::core::error::{BeerError, CommandError, CryptoError, WireError};
pub use crate::wire::frame::PacketType;
