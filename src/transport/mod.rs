//! BEER Protocol - Transport Layer
//!
//! This module connects the wire layer to live sockets:
//!
//! - **HELLO key exchange**: [`handshake`] runs the pre-framing
//!   `HELLO <hex-pub>` line exchange and derives the session key
//! - **Endpoint**: [`endpoint`] wraps one bidirectional stream in a reader
//!   task and a writer task with a single outbound mailbox, transparently
//!   handling ACK/NAK/REKEY, the replay window, and retransmission
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Session / Lobby / Client         │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   handshake, endpoint tasks, mailbox    │
//! ├─────────────────────────────────────────┤
//! │            Wire Layer                   │
//! ├─────────────────────────────────────────┤
//! │               TCP                       │
//! └─────────────────────────────────────────┘
//! ```

pub mod endpoint;
pub mod handshake;

pub use endpoint::{EndpointConfig, FrameSink, FrameSource, Link};
pub use handshake::{client_hello, server_hello, HandshakeError};
