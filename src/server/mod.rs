//! BEER Protocol - Server Side
//!
//! The lobby accepts connections, runs the framed token handshake, pairs
//! waiting clients into matches, and requeues finished players. Each match
//! runs as its own task built from:
//!
//! - [`session`]: the turn state machine
//! - [`reconnect`]: token registry and per-match reconnect windows
//! - [`spectator`]: the waiting room / spectator gallery
//! - [`router`]: event-to-frame translation

pub mod lobby;
pub mod reconnect;
pub mod router;
pub mod session;
pub mod spectator;

pub use lobby::{serve, ServerConfig};
pub use reconnect::{ReconnectController, ReconnectRegistry};
pub use router::EventRouter;
pub use session::{MatchConfig, MatchOutcome, MatchSession};
pub use spectator::SpectatorHub;
