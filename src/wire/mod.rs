//! BEER Protocol - Wire Layer
//!
//! This module implements the frame format and its reliability companions:
//!
//! - **Frame encoding/decoding**: [`frame`] and [`codec`] handle the
//!   12-byte header plus CRC-32 or AES-GCM body in either wire mode
//! - **Payload schema**: [`payload`] promotes decoded JSON into a closed
//!   set of tagged variants
//! - **Replay window**: [`replay`] rejects duplicated or stale sequences
//! - **Retransmit ring**: [`retransmit`] buffers sent frames for NAK replay
//!
//! # Architecture
//!
//! The wire layer sits between TCP and the transport endpoint. It is
//! agnostic to what the JSON payloads mean; the session layer interprets
//! them.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Session / Lobby / Client         │
//! ├─────────────────────────────────────────┤
//! │         Transport Endpoint              │
//! ├─────────────────────────────────────────┤
//! │            Wire Layer                   │  ← This module
//! │   framing, CRC/AEAD, replay, NAK ring   │
//! ├─────────────────────────────────────────┤
//! │               TCP                       │
//! └─────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod frame;
pub mod payload;
pub mod replay;
pub mod retransmit;

pub use codec::{decode, encode, open, read_wire, Frame, RawFrame};
pub use frame::{FrameHeader, PacketType};
pub use payload::{Payload, TypedPayload};
pub use replay::ReplayWindow;
pub use retransmit::RetransmitBuffer;
