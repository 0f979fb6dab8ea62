//! Event-to-frame translation.
//!
//! The session emits [`Event`]s; the router turns the turn-lifecycle ones
//! into structured GAME payloads for players and spectators. Chat frames
//! are already broadcast while commands are parsed, so chat events only
//! feed the server log, as do SYSTEM events.

use std::sync::Arc;

use tracing::{debug, info};

use crate::game::event::{Event, SystemEvent, TurnEvent};
use crate::server::spectator::SpectatorHub;
use crate::transport::endpoint::FrameSink;
use crate::wire::frame::PacketType;
use crate::wire::payload::{Payload, TypedPayload};

/// Session-scoped translator from events to wire payloads.
pub struct EventRouter {
    hub: Arc<SpectatorHub>,
}

impl EventRouter {
    /// A router broadcasting through the given hub.
    pub fn new(hub: Arc<SpectatorHub>) -> Self {
        Self { hub }
    }

    /// Dispatch one event. Player sinks are passed per call because they
    /// are rebound on reconnect and promotion.
    pub async fn route(&self, event: &Event, p1: &FrameSink, p2: &FrameSink) {
        match event {
            Event::Turn(turn) => self.route_turn(turn, p1, p2).await,
            Event::Chat { slot, msg } => {
                info!(target: "beer::chat", "[CHAT] P{}: {msg}", slot.number());
            }
            Event::System(system) => match system {
                SystemEvent::Disconnected { slot } => {
                    info!(target: "beer::system", "{slot} disconnected")
                }
                SystemEvent::Reconnected { slot } => {
                    info!(target: "beer::system", "{slot} reconnected")
                }
                SystemEvent::Promoted { slot } => {
                    info!(target: "beer::system", "spectator promoted into {slot}")
                }
            },
        }
    }

    async fn route_turn(&self, event: &TurnEvent, p1: &FrameSink, p2: &FrameSink) {
        match event {
            TurnEvent::Start { token_p1, token_p2 } => {
                // The legacy START text frames carry this already.
                debug!(target: "beer::system", "match started: {token_p1} vs {token_p2}");
            }
            TurnEvent::Prompt { slot } => {
                let payload = Payload::from(TypedPayload::TurnPrompt {
                    player: slot.number(),
                });
                let sink = if *slot == crate::game::event::Slot::P1 { p1 } else { p2 };
                let _ = sink.send_payload(PacketType::Game, &payload).await;
            }
            TurnEvent::Shot {
                slot,
                coord,
                result,
                sunk,
            } => {
                let payload = Payload::from(TypedPayload::Shot {
                    player: slot.number(),
                    coord: coord.clone(),
                    result: *result,
                    sunk: sunk.clone(),
                });
                self.broadcast(&payload, p1, p2).await;
                info!(
                    target: "beer::shot",
                    "P{} fired at {coord}: {result:?}{}",
                    slot.number(),
                    sunk.as_deref().map(|s| format!(" (sunk {s})")).unwrap_or_default(),
                );
            }
            TurnEvent::End {
                winner,
                reason,
                shots,
            } => {
                let payload = Payload::from(TypedPayload::End {
                    winner: winner.number(),
                    reason: *reason,
                    shots: *shots,
                });
                self.broadcast(&payload, p1, p2).await;
                info!(
                    target: "beer::system",
                    "match finished: {winner} wins by {reason} in {shots} shots"
                );
            }
        }
    }

    async fn broadcast(&self, payload: &Payload, p1: &FrameSink, p2: &FrameSink) {
        let _ = p1.send_payload(PacketType::Game, payload).await;
        let _ = p2.send_payload(PacketType::Game, payload).await;
        self.hub.broadcast_payload(PacketType::Game, payload).await;
    }
}
