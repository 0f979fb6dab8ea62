//! JSON payload schema.
//!
//! Decoded frame bodies are promoted immediately into this closed set of
//! variants; unknown `type` values fail to parse and are logged and dropped
//! by the receiving layer rather than flowing through the system as loose
//! JSON.

use serde::{Deserialize, Serialize};

use crate::game::event::{EndReason, ShotResult};

/// Any payload carried by a GAME/CHAT/OPP_GRID/ERROR frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// A structured payload discriminated by its `type` field.
    Typed(TypedPayload),
    /// The initial handshake frame: `{"token": "..."}`.
    Handshake {
        /// Opaque reconnect token.
        token: String,
    },
    /// A free-text line, human-oriented: `{"msg": "..."}`.
    Text {
        /// The text line.
        msg: String,
    },
}

/// Structured payloads keyed by their `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypedPayload {
    /// A single board view: ten strings of space-separated cells.
    Grid {
        /// Board rows, top to bottom.
        rows: Vec<String>,
    },
    /// Dual-board spectator snapshot, ships revealed.
    SpecGrid {
        /// Player 1's board rows.
        rows_p1: Vec<String>,
        /// Player 2's board rows.
        rows_p2: Vec<String>,
    },
    /// Opponent-board reveal (cheat-variant channel).
    OppGrid {
        /// Board rows with ships visible.
        rows: Vec<String>,
    },
    /// One adjudicated shot.
    Shot {
        /// Attacker slot number (1 or 2).
        player: u8,
        /// Fired coordinate, e.g. "A1".
        coord: String,
        /// Hit or miss.
        result: ShotResult,
        /// Name of the ship this shot sank, if any.
        sunk: Option<String>,
    },
    /// Match conclusion.
    End {
        /// Winning slot number (1 or 2).
        winner: u8,
        /// Why the match ended.
        reason: EndReason,
        /// The winner's shot count.
        shots: u32,
    },
    /// A chat line.
    Chat {
        /// Display name of the sender.
        name: String,
        /// Chat text.
        msg: String,
    },
    /// Slot assignment sent during match setup.
    Role {
        /// The receiving player's slot number (1 or 2).
        slot: u8,
    },
    /// Turn prompt unicast to the attacker.
    TurnPrompt {
        /// The prompted slot number (1 or 2).
        player: u8,
    },
}

impl Payload {
    /// A free-text payload.
    pub fn text(msg: impl Into<String>) -> Self {
        Payload::Text { msg: msg.into() }
    }

    /// The handshake payload for a reconnect token.
    pub fn handshake(token: impl Into<String>) -> Self {
        Payload::Handshake {
            token: token.into(),
        }
    }

    /// Parse payload bytes, rejecting anything outside the closed set.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("payload serialization is infallible")
    }
}

impl From<TypedPayload> for Payload {
    fn from(typed: TypedPayload) -> Self {
        Payload::Typed(typed)
    }
}
