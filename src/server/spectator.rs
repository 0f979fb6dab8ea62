//! The spectator hub.
//!
//! Spectators and lobby waiters are the same population: an ordered list of
//! connections that mirror game broadcasts while queuing to play. The lobby
//! pops seats from the front when pairing a match and pushes finished
//! players back in; the session pops a seat to promote into a vacant slot
//! after a reconnect window expires.
//!
//! Each seat runs a small drain task that rejects any game command a
//! spectator sends, so spectator input can never reach a match.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::game::board::Board;
use crate::transport::endpoint::{FrameSink, FrameSource, Link};
use crate::wire::frame::PacketType;
use crate::wire::payload::{Payload, TypedPayload};

struct Seat {
    sink: FrameSink,
    token: Option<String>,
    source: Arc<Mutex<FrameSource>>,
    drain: JoinHandle<()>,
}

impl Seat {
    fn new(link: Link, token: Option<String>) -> Self {
        let Link { sink, source } = link;
        let source = Arc::new(Mutex::new(source));

        let drain_source = Arc::clone(&source);
        let drain_sink = sink.clone();
        let drain = tokio::spawn(async move {
            let mut source = drain_source.lock().await;
            while let Some(frame) = source.recv().await {
                if matches!(frame.ptype, PacketType::Game | PacketType::Chat) {
                    let _ = drain_sink
                        .send_err("ERR Spectators cannot play or chat while waiting")
                        .await;
                }
            }
        });

        Self {
            sink,
            token,
            source,
            drain,
        }
    }

    /// Stop the drain task and reassemble the connection.
    async fn into_link(self) -> Option<(Link, Option<String>)> {
        self.drain.abort();
        let _ = self.drain.await;
        let source = Arc::try_unwrap(self.source).ok()?.into_inner();
        Some((
            Link {
                sink: self.sink,
                source,
            },
            self.token,
        ))
    }
}

/// Ordered waiting room shared by the lobby and the active match.
#[derive(Default)]
pub struct SpectatorHub {
    seats: Mutex<VecDeque<Seat>>,
    last_snapshot: Mutex<Option<Payload>>,
}

impl SpectatorHub {
    /// An empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection to the queue. When `announce` is set (a match
    /// is running), the newcomer is told it is spectating and receives the
    /// latest board snapshot. Returns the 1-based queue position.
    pub async fn add(&self, link: Link, token: Option<String>, announce: bool) -> usize {
        if announce {
            let _ = link.sink.send_msg("INFO You are now spectating").await;
            if let Some(snapshot) = self.last_snapshot.lock().await.clone() {
                let _ = link.sink.send_payload(PacketType::Game, &snapshot).await;
            }
        }
        let mut seats = self.seats.lock().await;
        seats.push_back(Seat::new(link, token));
        seats.len()
    }

    /// Put a finished player back at the head of the queue.
    pub async fn push_front(&self, link: Link, token: Option<String>) {
        self.seats
            .lock()
            .await
            .push_front(Seat::new(link, token));
    }

    /// Put a finished player at the tail of the queue.
    pub async fn push_back(&self, link: Link, token: Option<String>) {
        self.add(link, token, false).await;
    }

    /// Pop the head of the queue, reclaiming its connection.
    pub async fn take_front(&self) -> Option<(Link, Option<String>)> {
        loop {
            let seat = self.seats.lock().await.pop_front()?;
            if let Some(entry) = seat.into_link().await {
                return Some(entry);
            }
            // Seat was unrecoverable (task still holding it); skip it.
            debug!("dropped an unrecoverable spectator seat");
        }
    }

    /// Promote the head spectator toward a vacant player slot.
    ///
    /// This only reclaims the connection; the session installs it, swaps
    /// the reconnect token, and restarts the match.
    pub async fn promote(&self) -> Option<(Link, Option<String>)> {
        self.take_front().await
    }

    /// Send a text line to every spectator, dropping any whose connection
    /// is gone.
    pub async fn broadcast_msg(&self, msg: &str) {
        self.broadcast_payload(PacketType::Game, &Payload::text(msg))
            .await;
    }

    /// Send a payload to every spectator, dropping any whose connection is
    /// gone.
    pub async fn broadcast_payload(&self, ptype: PacketType, payload: &Payload) {
        let mut seats = self.seats.lock().await;
        let mut kept = VecDeque::with_capacity(seats.len());
        while let Some(seat) = seats.pop_front() {
            if seat.sink.send_payload(ptype, payload).await.is_ok() {
                kept.push_back(seat);
            } else {
                debug!("dropping spectator with a dead connection");
                seat.drain.abort();
            }
        }
        *seats = kept;
    }

    /// Fan out a reveal-both-boards snapshot, remembering it for late
    /// joiners.
    pub async fn snapshot(&self, board_p1: &Board, board_p2: &Board) {
        let payload = Payload::from(TypedPayload::SpecGrid {
            rows_p1: board_p1.rows(true),
            rows_p2: board_p2.rows(true),
        });
        *self.last_snapshot.lock().await = Some(payload.clone());
        self.broadcast_payload(PacketType::Game, &payload).await;
    }

    /// Clone the sinks of every waiting seat, in queue order.
    pub async fn sinks(&self) -> Vec<FrameSink> {
        self.seats.lock().await.iter().map(|s| s.sink.clone()).collect()
    }

    /// Number of waiting connections.
    pub async fn len(&self) -> usize {
        self.seats.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.seats.lock().await.is_empty()
    }
}
