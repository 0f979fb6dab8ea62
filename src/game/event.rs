//! Session events.
//!
//! The match session emits strongly-typed events so the router and other
//! subscribers (logging, the lobby) never parse free-text strings. The
//! router translates a subset into wire payloads; SYSTEM events stay
//! server-side.

use serde::{Deserialize, Serialize};

/// A player slot in a match. Player 1 shoots first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Player 1.
    P1,
    /// Player 2.
    P2,
}

impl Slot {
    /// The opposing slot.
    pub fn other(self) -> Slot {
        match self {
            Slot::P1 => Slot::P2,
            Slot::P2 => Slot::P1,
        }
    }

    /// Zero-based array index.
    pub fn index(self) -> usize {
        match self {
            Slot::P1 => 0,
            Slot::P2 => 1,
        }
    }

    /// Wire representation (1 or 2).
    pub fn number(self) -> u8 {
        match self {
            Slot::P1 => 1,
            Slot::P2 => 2,
        }
    }

    /// Both slots, in turn order.
    pub fn both() -> [Slot; 2] {
        [Slot::P1, Slot::P2]
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Player {}", self.number())
    }
}

/// Outcome of one shot against a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotResult {
    /// A ship cell was struck.
    Hit,
    /// Open water.
    Miss,
    /// The cell was already shot (filtered out by the session's
    /// duplicate-shot guard before it reaches the board).
    AlreadyShot,
}

/// Why a match concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Every defending ship was sunk.
    #[serde(rename = "fleet destroyed")]
    FleetDestroyed,
    /// A player sent QUIT.
    #[serde(rename = "concession")]
    Concession,
    /// The attacker's shot clock expired.
    #[serde(rename = "timeout")]
    Timeout,
    /// A player disconnected and never came back.
    #[serde(rename = "timeout/disconnect")]
    Disconnect,
    /// Both players vanished; Player 1 wins by convention.
    #[serde(rename = "abandoned")]
    Abandoned,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            EndReason::FleetDestroyed => "fleet destroyed",
            EndReason::Concession => "concession",
            EndReason::Timeout => "timeout",
            EndReason::Disconnect => "timeout/disconnect",
            EndReason::Abandoned => "abandoned",
        };
        f.write_str(text)
    }
}

/// An event emitted by the match session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Per-turn lifecycle.
    Turn(TurnEvent),
    /// A player chat line (frames are broadcast during parsing; this is
    /// for subscribers).
    Chat {
        /// The speaking slot.
        slot: Slot,
        /// Chat text.
        msg: String,
    },
    /// Connection lifecycle around a match.
    System(SystemEvent),
}

/// Turn-lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A match (or a restarted match after promotion) began.
    Start {
        /// Player 1's reconnect token.
        token_p1: String,
        /// Player 2's reconnect token.
        token_p2: String,
    },
    /// The named slot was prompted to act.
    Prompt {
        /// The attacker.
        slot: Slot,
    },
    /// An adjudicated shot.
    Shot {
        /// The attacker.
        slot: Slot,
        /// Fired coordinate.
        coord: String,
        /// Hit or miss.
        result: ShotResult,
        /// Ship sunk by this shot, if any.
        sunk: Option<String>,
    },
    /// The match concluded.
    End {
        /// Winning slot.
        winner: Slot,
        /// Why.
        reason: EndReason,
        /// The winner's shot count.
        shots: u32,
    },
}

/// Server-side lifecycle events; logged, never sent to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// A player's connection dropped mid-match.
    Disconnected {
        /// Affected slot.
        slot: Slot,
    },
    /// A player reattached within the reconnect window.
    Reconnected {
        /// Affected slot.
        slot: Slot,
    },
    /// A spectator was promoted into a vacant slot.
    Promoted {
        /// The filled slot.
        slot: Slot,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_other() {
        assert_eq!(Slot::P1.other(), Slot::P2);
        assert_eq!(Slot::P2.other(), Slot::P1);
        assert_eq!(Slot::P1.number(), 1);
        assert_eq!(Slot::P2.index(), 1);
    }

    #[test]
    fn test_shot_result_serialization() {
        assert_eq!(
            serde_json::to_string(&ShotResult::Hit).unwrap(),
            r#""hit""#
        );
        assert_eq!(
            serde_json::to_string(&ShotResult::AlreadyShot).unwrap(),
            r#""already_shot""#
        );
    }

    #[test]
    fn test_end_reason_display_matches_wire() {
        for reason in [
            EndReason::FleetDestroyed,
            EndReason::Concession,
            EndReason::Timeout,
            EndReason::Disconnect,
            EndReason::Abandoned,
        ] {
            let wire = serde_json::to_string(&reason).unwrap();
            assert_eq!(wire, format!("\"{reason}\""));
        }
    }
}
