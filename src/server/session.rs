//! The match session state machine.
//!
//! One session drives one match: Setup (START frames, placement, initial
//! grids) → Running (turn alternation with out-of-turn chat and quit) →
//! Concluded (final messages, end event, token cleanup). The session owns
//! both boards and both transport endpoints; on conclusion it relinquishes
//! the surviving connections back to the lobby in its outcome value.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::constants;
use crate::game::board::{Board, Orientation, SHIPS};
use crate::game::command::{parse_command, Command};
use crate::game::coord::{format_coord, parse_coord};
use crate::game::event::{EndReason, Event, ShotResult, Slot, SystemEvent, TurnEvent};
use crate::server::reconnect::{ReconnectController, ReconnectRegistry};
use crate::server::router::EventRouter;
use crate::server::spectator::SpectatorHub;
use crate::transport::endpoint::Link;
use crate::wire::codec::Frame;
use crate::wire::frame::PacketType;
use crate::wire::payload::{Payload, TypedPayload};

/// Per-match tuning.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Per-turn shot clock.
    pub shot_clock: Duration,
    /// Reconnect hold window.
    pub reconnect_window: Duration,
    /// Manual-placement window before random fallback.
    pub placement_timeout: Duration,
    /// Board dimension.
    pub board_size: usize,
    /// Ship roster for this match.
    pub roster: Vec<(&'static str, usize)>,
    /// Prompt players to place ships instead of placing randomly.
    pub manual_placement: bool,
    /// Send OPP_GRID reveal frames (the cheat-variant channel).
    pub reveal_channel: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            shot_clock: constants::SHOT_CLOCK,
            reconnect_window: constants::SHOT_CLOCK,
            placement_timeout: constants::PLACEMENT_TIMEOUT,
            board_size: constants::BOARD_SIZE,
            roster: SHIPS.to_vec(),
            manual_placement: false,
            reveal_channel: true,
        }
    }
}

/// What a finished session hands back to the lobby.
#[derive(Debug)]
pub struct MatchOutcome {
    /// Winning slot.
    pub winner: Slot,
    /// Why the match ended.
    pub reason: EndReason,
    /// The winner's shot count.
    pub shots: u32,
    /// Final tokens, by slot.
    pub tokens: [String; 2],
    /// Surviving connections, by slot; `None` means the player is gone.
    pub survivors: [Option<(Link, String)>; 2],
}

struct Player {
    sink: crate::transport::endpoint::FrameSink,
    source: crate::transport::endpoint::FrameSource,
    token: String,
    board: Board,
    shots: u32,
    fired: HashSet<(usize, usize)>,
    /// Cleared once this player's stream has yielded EOF.
    alive: bool,
}

impl Player {
    fn new(link: Link, token: String, board_size: usize) -> Self {
        Self {
            sink: link.sink,
            source: link.source,
            token,
            board: Board::new(board_size),
            shots: 0,
            fired: HashSet::new(),
            alive: true,
        }
    }
}

enum Wait {
    Frame(Slot, Option<Frame>),
    Clock,
}

enum TurnOutcome {
    Fired { row: usize, col: usize },
    Conceded { by: Slot },
    TimedOut,
    Disconnected { slot: Slot },
}

enum PlayOutcome {
    End { winner: Slot, reason: EndReason },
    Restart,
}

enum DisconnectOutcome {
    Resumed,
    Promoted,
    Lost { winner: Slot, reason: EndReason },
}

/// A single two-player match.
pub struct MatchSession {
    config: MatchConfig,
    players: [Player; 2],
    hub: Arc<SpectatorHub>,
    registry: Arc<ReconnectRegistry>,
    recon: Arc<ReconnectController>,
    router: EventRouter,
    half_turns: u32,
}

impl MatchSession {
    /// Build a session from two handshaken connections. Registers both
    /// reconnect tokens.
    pub fn new(
        config: MatchConfig,
        p1: (Link, String),
        p2: (Link, String),
        hub: Arc<SpectatorHub>,
        registry: Arc<ReconnectRegistry>,
    ) -> Self {
        let (link1, token1) = p1;
        let (link2, token2) = p2;
        let recon = Arc::new(ReconnectController::new(
            config.reconnect_window,
            token1.clone(),
            token2.clone(),
        ));
        registry.register(&token1, Arc::clone(&recon));
        registry.register(&token2, Arc::clone(&recon));

        let board_size = config.board_size;
        let router = EventRouter::new(Arc::clone(&hub));
        Self {
            config,
            players: [
                Player::new(link1, token1, board_size),
                Player::new(link2, token2, board_size),
            ],
            hub,
            registry,
            recon,
            router,
            half_turns: 0,
        }
    }

    /// Drive the match to its conclusion.
    pub async fn run(mut self) -> MatchOutcome {
        let (winner, reason) = loop {
            self.begin_match().await;
            match self.play().await {
                PlayOutcome::End { winner, reason } => break (winner, reason),
                PlayOutcome::Restart => continue,
            }
        };
        self.conclude(winner, reason).await
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    async fn begin_match(&mut self) {
        for player in &mut self.players {
            player.board = Board::new(self.config.board_size);
            player.shots = 0;
            player.fired.clear();
        }
        self.half_turns = 0;

        let token_p1 = self.players[0].token.clone();
        let token_p2 = self.players[1].token.clone();
        info!("starting match: {token_p1} vs {token_p2}");
        self.emit(Event::Turn(TurnEvent::Start {
            token_p1: token_p1.clone(),
            token_p2: token_p2.clone(),
        }))
        .await;

        self.notify(Slot::P1, "INFO New game: you are Player 1").await;
        self.notify(Slot::P2, "INFO New game: you are Player 2").await;
        self.notify(
            Slot::P1,
            format!("INFO You are now playing a new match against {token_p2}"),
        )
        .await;
        self.notify(
            Slot::P2,
            format!("INFO You are now playing a new match against {token_p1}"),
        )
        .await;

        for slot in Slot::both() {
            let role = Payload::from(TypedPayload::Role {
                slot: slot.number(),
            });
            let _ = self.players[slot.index()]
                .sink
                .send_payload(PacketType::Game, &role)
                .await;
        }
        self.notify(Slot::P1, format!("START you {token_p1}")).await;
        self.notify(Slot::P2, format!("START opp {token_p2}")).await;

        if self.config.manual_placement {
            let (left, right) = self.players.split_at_mut(1);
            tokio::join!(
                collect_placement(&self.config, &mut left[0]),
                collect_placement(&self.config, &mut right[0]),
            );
        } else {
            for player in &mut self.players {
                player.board.place_ships_randomly(&self.config.roster);
            }
        }

        self.refresh_views().await;
        if self.config.reveal_channel {
            self.send_opp_grid(Slot::P1).await;
            self.send_opp_grid(Slot::P2).await;
        }
        self.hub
            .snapshot(&self.players[0].board, &self.players[1].board)
            .await;
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    async fn play(&mut self) -> PlayOutcome {
        let mut attacker = Slot::P1;
        loop {
            self.prompt(attacker).await;
            match self.await_turn(attacker).await {
                TurnOutcome::Fired { row, col } => {
                    if let Some((winner, reason)) = self.resolve_shot(attacker, row, col).await {
                        return PlayOutcome::End { winner, reason };
                    }
                    attacker = attacker.other();
                }
                TurnOutcome::Conceded { by } => {
                    info!("{by} conceded");
                    return PlayOutcome::End {
                        winner: by.other(),
                        reason: EndReason::Concession,
                    };
                }
                TurnOutcome::TimedOut => {
                    info!("{attacker} ran out the shot clock");
                    return PlayOutcome::End {
                        winner: attacker.other(),
                        reason: EndReason::Timeout,
                    };
                }
                TurnOutcome::Disconnected { slot } => {
                    self.players[slot.index()].alive = false;
                    match self.handle_disconnect(slot).await {
                        DisconnectOutcome::Resumed => continue,
                        DisconnectOutcome::Promoted => return PlayOutcome::Restart,
                        DisconnectOutcome::Lost { winner, reason } => {
                            return PlayOutcome::End { winner, reason }
                        }
                    }
                }
            }
        }
    }

    async fn prompt(&self, slot: Slot) {
        self.notify(slot, "INFO YOUR TURN – FIRE <coord> or QUIT").await;
        self.emit(Event::Turn(TurnEvent::Prompt { slot })).await;
    }

    /// Wait for the attacker's action, servicing out-of-turn traffic from
    /// the defender. The shot clock spans the whole turn, including invalid
    /// attempts.
    async fn await_turn(&mut self, attacker: Slot) -> TurnOutcome {
        let deadline = Instant::now() + self.config.shot_clock;
        loop {
            let wait = {
                let (att, def) = self.pair_mut(attacker);
                tokio::select! {
                    biased;
                    frame = att.source.recv() => Wait::Frame(attacker, frame),
                    frame = def.source.recv() => Wait::Frame(attacker.other(), frame),
                    _ = tokio::time::sleep_until(deadline) => Wait::Clock,
                }
            };
            match wait {
                Wait::Clock => return TurnOutcome::TimedOut,
                Wait::Frame(slot, None) => return TurnOutcome::Disconnected { slot },
                Wait::Frame(slot, Some(frame)) => {
                    if let Some(outcome) = self.handle_frame(slot, attacker, frame).await {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Process one inbound frame during a turn. `None` keeps the turn
    /// open.
    async fn handle_frame(
        &self,
        from: Slot,
        attacker: Slot,
        frame: Frame,
    ) -> Option<TurnOutcome> {
        if !matches!(frame.ptype, PacketType::Game | PacketType::Chat) {
            return None;
        }
        let line = match Payload::parse(&frame.payload) {
            Ok(Payload::Text { msg }) => msg,
            Ok(other) => {
                debug!("ignoring non-command payload from {from}: {other:?}");
                return None;
            }
            Err(err) => {
                debug!("undecodable payload from {from}: {err}");
                return None;
            }
        };

        match parse_command(&line) {
            Err(err) => {
                self.notify(from, format!("ERR {err}")).await;
                if from == attacker {
                    self.prompt(attacker).await;
                }
                None
            }
            Ok(Command::Chat(text)) => {
                self.broadcast_chat(from, &text).await;
                None
            }
            Ok(Command::Quit) => Some(TurnOutcome::Conceded { by: from }),
            Ok(Command::Fire { row, col }) => {
                if from != attacker {
                    self.notify(from, "ERR Not your turn – wait for your turn prompt")
                        .await;
                    return None;
                }
                let coord = format_coord(row, col);
                if !self.players[attacker.other().index()].board.in_bounds(row, col) {
                    self.notify(from, format!("ERR Invalid coordinate: {coord}"))
                        .await;
                    self.prompt(attacker).await;
                    return None;
                }
                if self.players[attacker.index()].fired.contains(&(row, col)) {
                    self.notify(from, format!("ERR Already fired at {coord}, choose another"))
                        .await;
                    self.prompt(attacker).await;
                    return None;
                }
                Some(TurnOutcome::Fired { row, col })
            }
        }
    }

    /// Adjudicate a validated shot. Returns the conclusion when the shot
    /// destroys the last ship.
    async fn resolve_shot(
        &mut self,
        attacker: Slot,
        row: usize,
        col: usize,
    ) -> Option<(Slot, EndReason)> {
        let defender = attacker.other();
        let coord = format_coord(row, col);

        let (result, sunk) = {
            let (att, def) = self.pair_mut(attacker);
            att.fired.insert((row, col));
            att.shots += 1;
            def.board.fire_at(row, col)
        };

        match result {
            ShotResult::Hit => {
                self.notify(attacker, format!("YOU HIT at {coord}")).await;
                self.notify(defender, format!("OPPONENT HIT your ship at {coord}"))
                    .await;
            }
            ShotResult::Miss => {
                self.notify(attacker, format!("YOU MISSED at {coord}")).await;
                self.notify(defender, format!("OPPONENT MISSED at {coord}"))
                    .await;
            }
            ShotResult::AlreadyShot => {}
        }
        if let Some(ship) = &sunk {
            self.notify(attacker, format!("YOU SUNK opponent's {ship} at {coord}"))
                .await;
            self.notify(defender, format!("OPPONENT SUNK your {ship} at {coord}"))
                .await;
        }

        self.emit(Event::Turn(TurnEvent::Shot {
            slot: attacker,
            coord,
            result,
            sunk,
        }))
        .await;

        self.refresh_views().await;
        self.half_turns += 1;
        if self.half_turns % 2 == 0 {
            self.hub
                .snapshot(&self.players[0].board, &self.players[1].board)
                .await;
        }

        if self.players[defender.index()].board.all_ships_sunk() {
            Some((attacker, EndReason::FleetDestroyed))
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Disconnects
    // ------------------------------------------------------------------

    async fn handle_disconnect(&mut self, slot: Slot) -> DisconnectOutcome {
        self.emit(Event::System(SystemEvent::Disconnected { slot }))
            .await;
        let other = slot.other();

        if self.players[other.index()].sink.is_closed() {
            return self.handle_double_drop().await;
        }

        self.notify(
            other,
            format!(
                "INFO Opponent disconnected – holding slot for {}s",
                self.config.reconnect_window.as_secs()
            ),
        )
        .await;

        if self.recon.wait(slot).await {
            if let Some(link) = self.recon.take_new_socket(slot) {
                self.rebind(slot, link).await;
                self.notify(other, "INFO Opponent has reconnected – resuming match")
                    .await;
                self.notify(slot, "INFO You have reconnected – resuming match")
                    .await;
                self.emit(Event::System(SystemEvent::Reconnected { slot }))
                    .await;
                return DisconnectOutcome::Resumed;
            }
        }

        if let Some((link, token)) = self.hub.promote().await {
            self.install_promoted(slot, link, token).await;
            return DisconnectOutcome::Promoted;
        }

        DisconnectOutcome::Lost {
            winner: other,
            reason: EndReason::Disconnect,
        }
    }

    /// Both connections are gone: give each slot a reconnect window, then
    /// score whatever remains.
    async fn handle_double_drop(&mut self) -> DisconnectOutcome {
        warn!("both players disconnected; holding both slots");
        let mut failed = Vec::new();
        for slot in Slot::both() {
            let rebound = if self.recon.wait(slot).await {
                self.recon.take_new_socket(slot)
            } else {
                None
            };
            match rebound {
                Some(link) => {
                    self.rebind(slot, link).await;
                    self.emit(Event::System(SystemEvent::Reconnected { slot }))
                        .await;
                }
                None => failed.push(slot),
            }
        }
        match failed.as_slice() {
            [] => {
                for slot in Slot::both() {
                    self.notify(slot, "INFO You have reconnected – resuming match")
                        .await;
                }
                DisconnectOutcome::Resumed
            }
            [lost] => DisconnectOutcome::Lost {
                winner: lost.other(),
                reason: EndReason::Disconnect,
            },
            _ => DisconnectOutcome::Lost {
                winner: Slot::P1,
                reason: EndReason::Abandoned,
            },
        }
    }

    async fn rebind(&mut self, slot: Slot, link: Link) {
        let player = &mut self.players[slot.index()];
        player.sink = link.sink;
        player.source = link.source;
        player.alive = true;
        self.resync(slot).await;
    }

    /// Push fresh board state to a just-reattached player: own fleet
    /// reveal, opponent reveal (when the channel is on), opponent fog.
    async fn resync(&self, slot: Slot) {
        let own = &self.players[slot.index()].board;
        let opp = &self.players[slot.other().index()].board;
        let sink = &self.players[slot.index()].sink;

        let _ = sink
            .send_payload(
                PacketType::Game,
                &Payload::from(TypedPayload::Grid {
                    rows: own.rows(true),
                }),
            )
            .await;
        if self.config.reveal_channel {
            let _ = sink
                .send_payload(
                    PacketType::OppGrid,
                    &Payload::from(TypedPayload::OppGrid {
                        rows: opp.rows(true),
                    }),
                )
                .await;
        }
        let _ = sink
            .send_payload(
                PacketType::Game,
                &Payload::from(TypedPayload::Grid {
                    rows: opp.rows(false),
                }),
            )
            .await;
    }

    async fn install_promoted(&mut self, slot: Slot, link: Link, token: Option<String>) {
        let other = slot.other();
        self.notify(
            other,
            format!(
                "INFO Opponent disconnected – starting new game (you remain Player {})",
                other.number()
            ),
        )
        .await;

        let old_token = self.players[slot.index()].token.clone();
        self.registry.unregister(&old_token);
        let token = token.unwrap_or_else(|| self.registry.mint());
        self.recon.replace_token(slot, token.clone());
        self.registry.register(&token, Arc::clone(&self.recon));

        let player = &mut self.players[slot.index()];
        player.token = token;
        player.sink = link.sink;
        player.source = link.source;
        player.alive = true;

        self.notify(
            slot,
            "INFO YOU ARE NOW PLAYING – you've replaced the disconnected opponent",
        )
        .await;
        self.emit(Event::System(SystemEvent::Promoted { slot })).await;
    }

    // ------------------------------------------------------------------
    // Concluded
    // ------------------------------------------------------------------

    async fn conclude(self, winner: Slot, reason: EndReason) -> MatchOutcome {
        let loser = winner.other();
        let shots = self.players[winner.index()].shots;

        self.notify(winner, format!("YOU HAVE WON WITH {shots} SHOTS"))
            .await;
        self.notify(
            loser,
            format!("YOU HAVE LOST – opponent won with {shots} shots"),
        )
        .await;
        if reason == EndReason::Concession {
            self.notify(winner, "INFO Opponent has forfeited – match over")
                .await;
        }

        self.emit(Event::Turn(TurnEvent::End {
            winner,
            reason,
            shots,
        }))
        .await;
        self.hub
            .snapshot(&self.players[0].board, &self.players[1].board)
            .await;

        for player in &self.players {
            self.registry.unregister(&player.token);
        }

        let tokens = [
            self.players[0].token.clone(),
            self.players[1].token.clone(),
        ];
        let survivors = self.players.map(|p| {
            if !p.alive || p.sink.is_closed() {
                None
            } else {
                Some((
                    Link {
                        sink: p.sink,
                        source: p.source,
                    },
                    p.token,
                ))
            }
        });

        MatchOutcome {
            winner,
            reason,
            shots,
            tokens,
            survivors,
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn pair_mut(&mut self, attacker: Slot) -> (&mut Player, &mut Player) {
        let (left, right) = self.players.split_at_mut(1);
        match attacker {
            Slot::P1 => (&mut left[0], &mut right[0]),
            Slot::P2 => (&mut right[0], &mut left[0]),
        }
    }

    async fn notify(&self, slot: Slot, msg: impl Into<String>) {
        let _ = self.players[slot.index()].sink.send_msg(msg).await;
    }

    async fn emit(&self, event: Event) {
        self.router
            .route(&event, &self.players[0].sink, &self.players[1].sink)
            .await;
    }

    async fn broadcast_chat(&self, from: Slot, text: &str) {
        let payload = Payload::from(TypedPayload::Chat {
            name: format!("P{}", from.number()),
            msg: text.to_string(),
        });
        for player in &self.players {
            let _ = player.sink.send_payload(PacketType::Chat, &payload).await;
        }
        self.hub.broadcast_payload(PacketType::Chat, &payload).await;
        self.emit(Event::Chat {
            slot: from,
            msg: text.to_string(),
        })
        .await;
    }

    /// Send each player their own reveal and the opponent's fog view.
    async fn refresh_views(&self) {
        for slot in Slot::both() {
            let own = &self.players[slot.index()].board;
            let opp = &self.players[slot.other().index()].board;
            let sink = &self.players[slot.index()].sink;
            let _ = sink
                .send_payload(
                    PacketType::Game,
                    &Payload::from(TypedPayload::Grid {
                        rows: own.rows(true),
                    }),
                )
                .await;
            let _ = sink
                .send_payload(
                    PacketType::Game,
                    &Payload::from(TypedPayload::Grid {
                        rows: opp.rows(false),
                    }),
                )
                .await;
        }
    }

    async fn send_opp_grid(&self, slot: Slot) {
        let opp = &self.players[slot.other().index()].board;
        let payload = Payload::from(TypedPayload::OppGrid {
            rows: opp.rows(true),
        });
        let _ = self.players[slot.index()]
            .sink
            .send_payload(PacketType::OppGrid, &payload)
            .await;
    }
}

/// Prompt one player through manual placement, falling back to random
/// placement for whatever remains when the window closes.
async fn collect_placement(config: &MatchConfig, player: &mut Player) {
    let deadline = Instant::now() + config.placement_timeout;
    let mut placed = 0;

    'ships: while placed < config.roster.len() {
        let (name, len) = config.roster[placed];
        let _ = player
            .sink
            .send_msg(format!(
                "INFO Place your {name} (size {len}): PLACE <coord> <H|V>"
            ))
            .await;

        loop {
            let frame = match tokio::time::timeout_at(deadline, player.source.recv()).await {
                Err(_) | Ok(None) => break 'ships,
                Ok(Some(frame)) => frame,
            };
            let line = match Payload::parse(&frame.payload) {
                Ok(Payload::Text { msg }) => msg,
                _ => continue,
            };
            match parse_placement(&line) {
                Some((row, col, orientation)) => {
                    if player.board.place_ship(name, len, row, col, orientation) {
                        placed += 1;
                        continue 'ships;
                    }
                    let _ = player
                        .sink
                        .send_msg(format!(
                            "ERR Cannot place {name} at {}",
                            format_coord(row, col)
                        ))
                        .await;
                }
                None => {
                    let _ = player
                        .sink
                        .send_msg("ERR Expected: PLACE <coord> <H|V>")
                        .await;
                }
            }
        }
    }

    if placed < config.roster.len() {
        player.board.place_ships_randomly(&config.roster[placed..]);
        let _ = player
            .sink
            .send_msg("INFO Placement timed out – remaining ships placed randomly")
            .await;
    }
}

fn parse_placement(line: &str) -> Option<(usize, usize, Orientation)> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.eq_ignore_ascii_case("PLACE") {
        return None;
    }
    let (row, col) = parse_coord(parts.next()?)?;
    let orientation = match parts.next()?.to_ascii_uppercase().as_str() {
        "H" => Orientation::Horizontal,
        "V" => Orientation::Vertical,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((row, col, orientation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::game::board::ONE_SHIP;
    use crate::transport::endpoint::{start, EndpointConfig};

    const TICK: Duration = Duration::from_millis(500);

    fn link_pair() -> (Link, Link) {
        let (server_io, client_io) = tokio::io::duplex(65536);
        let (r, w) = tokio::io::split(server_io);
        let server = start(r, w, EndpointConfig::default());
        let (r, w) = tokio::io::split(client_io);
        let client = start(r, w, EndpointConfig::default());
        (server, client)
    }

    struct Harness {
        p1: Link,
        p2: Link,
        registry: Arc<ReconnectRegistry>,
        hub: Arc<SpectatorHub>,
        handle: tokio::task::JoinHandle<MatchOutcome>,
    }

    fn spawn_session(config: MatchConfig) -> Harness {
        let (s1, c1) = link_pair();
        let (s2, c2) = link_pair();
        let registry = Arc::new(ReconnectRegistry::new());
        let hub = Arc::new(SpectatorHub::new());
        let session = MatchSession::new(
            config,
            (s1, "PID42".to_string()),
            (s2, "PID43".to_string()),
            Arc::clone(&hub),
            Arc::clone(&registry),
        );
        Harness {
            p1: c1,
            p2: c2,
            registry,
            hub,
            handle: tokio::spawn(session.run()),
        }
    }

    fn one_ship_config() -> MatchConfig {
        MatchConfig {
            roster: ONE_SHIP.to_vec(),
            manual_placement: true,
            shot_clock: Duration::from_secs(5),
            reconnect_window: Duration::from_millis(300),
            placement_timeout: Duration::from_secs(5),
            ..MatchConfig::default()
        }
    }

    /// Read frames until a text line arrives; panics after the deadline.
    async fn next_text(link: &mut Link) -> String {
        loop {
            let frame = timeout(TICK, link.source.recv())
                .await
                .expect("text within deadline")
                .expect("connection alive");
            if let Ok(Payload::Text { msg }) = Payload::parse(&frame.payload) {
                return msg;
            }
        }
    }

    /// Read text lines until one satisfies the predicate.
    async fn text_until(link: &mut Link, what: &str) -> String {
        for _ in 0..64 {
            let msg = next_text(link).await;
            if msg.contains(what) {
                return msg;
            }
        }
        panic!("never saw a line containing {what:?}");
    }

    /// Drive both players through one-Carrier manual placement at A1..A5
    /// horizontal, and consume frames up to Player 1's first turn prompt.
    async fn place_both(h: &mut Harness) {
        text_until(&mut h.p1, "Place your Carrier").await;
        h.p1.sink.send_msg("PLACE A1 H").await.unwrap();
        text_until(&mut h.p2, "Place your Carrier").await;
        h.p2.sink.send_msg("PLACE A1 H").await.unwrap();
        text_until(&mut h.p1, "YOUR TURN").await;
    }

    #[tokio::test]
    async fn test_setup_start_frames_and_turn_order() {
        let mut h = spawn_session(one_ship_config());

        let start_p1 = text_until(&mut h.p1, "START").await;
        assert_eq!(start_p1, "START you PID42");
        let start_p2 = text_until(&mut h.p2, "START").await;
        assert_eq!(start_p2, "START opp PID43");

        // Player 1 is prompted first.
        place_both(&mut h).await;
        h.handle.abort();
    }

    #[tokio::test]
    async fn test_shot_hit_sink_and_win() {
        let mut h = spawn_session(one_ship_config());
        place_both(&mut h).await;

        for (i, coord) in ["A1", "A2", "A3", "A4"].into_iter().enumerate() {
            h.p1.sink.send_msg(format!("FIRE {coord}")).await.unwrap();
            let hit = text_until(&mut h.p1, "YOU HIT").await;
            assert_eq!(hit, format!("YOU HIT at {coord}"));
            let opp = text_until(&mut h.p2, "OPPONENT HIT").await;
            assert_eq!(opp, format!("OPPONENT HIT your ship at {coord}"));

            // P2 wastes its turn on open water to hand the turn back.
            text_until(&mut h.p2, "YOUR TURN").await;
            h.p2.sink
                .send_msg(format!("FIRE J{}", i + 1))
                .await
                .unwrap();
            text_until(&mut h.p1, "YOUR TURN").await;
        }

        h.p1.sink.send_msg("FIRE A5").await.unwrap();
        let sunk = text_until(&mut h.p1, "YOU SUNK").await;
        assert_eq!(sunk, "YOU SUNK opponent's Carrier at A5");
        let opp_sunk = text_until(&mut h.p2, "OPPONENT SUNK").await;
        assert_eq!(opp_sunk, "OPPONENT SUNK your Carrier at A5");

        let won = text_until(&mut h.p1, "YOU HAVE WON").await;
        assert_eq!(won, "YOU HAVE WON WITH 5 SHOTS");
        let lost = text_until(&mut h.p2, "YOU HAVE LOST").await;
        assert_eq!(lost, "YOU HAVE LOST – opponent won with 5 shots");

        let outcome = h.handle.await.unwrap();
        assert_eq!(outcome.winner, Slot::P1);
        assert_eq!(outcome.reason, EndReason::FleetDestroyed);
        assert_eq!(outcome.shots, 5);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_turn_fire_rejected() {
        let mut h = spawn_session(one_ship_config());
        place_both(&mut h).await;

        h.p2.sink.send_msg("FIRE A1").await.unwrap();
        let err = text_until(&mut h.p2, "ERR").await;
        assert_eq!(err, "ERR Not your turn – wait for your turn prompt");

        // Player 1's turn is still live.
        h.p1.sink.send_msg("FIRE J10").await.unwrap();
        text_until(&mut h.p1, "YOU MISSED").await;
        h.handle.abort();
    }

    #[tokio::test]
    async fn test_duplicate_shot_rejected_and_reprompted() {
        let mut h = spawn_session(one_ship_config());
        place_both(&mut h).await;

        h.p1.sink.send_msg("FIRE B7").await.unwrap();
        text_until(&mut h.p1, "YOU MISSED").await;
        text_until(&mut h.p2, "YOUR TURN").await;
        h.p2.sink.send_msg("FIRE C3").await.unwrap();
        text_until(&mut h.p1, "YOUR TURN").await;

        h.p1.sink.send_msg("FIRE B7").await.unwrap();
        let err = text_until(&mut h.p1, "ERR").await;
        assert_eq!(err, "ERR Already fired at B7, choose another");
        text_until(&mut h.p1, "YOUR TURN").await;

        // The turn never advanced; a fresh coordinate still works.
        h.p1.sink.send_msg("FIRE B8").await.unwrap();
        text_until(&mut h.p1, "YOU MISSED").await;
        h.handle.abort();
    }

    #[tokio::test]
    async fn test_chat_does_not_consume_turn() {
        let mut h = spawn_session(one_ship_config());
        place_both(&mut h).await;

        h.p2.sink.send_msg("CHAT good luck").await.unwrap();
        let frame = loop {
            let frame = timeout(TICK, h.p1.source.recv()).await.unwrap().unwrap();
            if frame.ptype == PacketType::Chat {
                break frame;
            }
        };
        assert_eq!(
            Payload::parse(&frame.payload).unwrap(),
            Payload::from(TypedPayload::Chat {
                name: "P2".into(),
                msg: "good luck".into()
            })
        );

        // Attacker still owns the turn.
        h.p1.sink.send_msg("FIRE J10").await.unwrap();
        text_until(&mut h.p1, "YOU MISSED").await;
        h.handle.abort();
    }

    #[tokio::test]
    async fn test_defender_quit_concedes() {
        let mut h = spawn_session(one_ship_config());
        place_both(&mut h).await;

        h.p2.sink.send_msg("QUIT").await.unwrap();
        let won = text_until(&mut h.p1, "YOU HAVE WON").await;
        assert_eq!(won, "YOU HAVE WON WITH 0 SHOTS");
        let forfeit = text_until(&mut h.p1, "forfeited").await;
        assert_eq!(forfeit, "INFO Opponent has forfeited – match over");

        let outcome = h.handle.await.unwrap();
        assert_eq!(outcome.winner, Slot::P1);
        assert_eq!(outcome.reason, EndReason::Concession);
    }

    #[tokio::test]
    async fn test_shot_clock_expiry() {
        let mut h = spawn_session(MatchConfig {
            shot_clock: Duration::from_millis(200),
            ..one_ship_config()
        });
        place_both(&mut h).await;

        // Player 1 never fires.
        let outcome = timeout(Duration::from_secs(5), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.winner, Slot::P2);
        assert_eq!(outcome.reason, EndReason::Timeout);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_match() {
        let mut h = spawn_session(one_ship_config());
        place_both(&mut h).await;

        // Player 1 vanishes mid-turn.
        drop(h.p1);
        let hold = text_until(&mut h.p2, "holding slot").await;
        assert!(hold.starts_with("INFO Opponent disconnected"));

        // A fresh connection attaches with Player 1's token.
        let (server, mut client) = link_pair();
        let ctrl = h.registry.lookup("PID42").expect("token registered");
        assert!(ctrl.attach("PID42", server).await);

        text_until(&mut h.p2, "resuming match").await;

        // The rebound player gets a state resync (its own fleet first),
        // then the resume notice.
        let mut saw_grid = false;
        loop {
            let frame = timeout(TICK, client.source.recv()).await.unwrap().unwrap();
            match Payload::parse(&frame.payload) {
                Ok(Payload::Typed(TypedPayload::Grid { .. })) => saw_grid = true,
                Ok(Payload::Text { msg }) if msg.contains("resuming match") => break,
                _ => {}
            }
        }
        assert!(saw_grid);

        // Play continues on the new socket.
        text_until(&mut client, "YOUR TURN").await;
        client.sink.send_msg("FIRE A1").await.unwrap();
        text_until(&mut client, "YOU HIT").await;
        h.handle.abort();
    }

    #[tokio::test]
    async fn test_disconnect_with_promotion_restarts_match() {
        let mut h = spawn_session(one_ship_config());

        // Seat a spectator before the drop.
        let (spec_server, mut spec_client) = link_pair();
        h.hub.add(spec_server, Some("PID77".into()), true).await;

        place_both(&mut h).await;
        drop(h.p2);

        text_until(&mut spec_client, "YOU ARE NOW PLAYING").await;
        text_until(&mut h.p1, "New game").await;

        // The promoted player's token now lives in the registry.
        assert!(h.registry.lookup("PID77").is_some());
        assert!(h.registry.lookup("PID43").is_none());

        // Fresh match: both players get placed again.
        text_until(&mut spec_client, "Place your Carrier").await;
        h.handle.abort();
    }

    #[tokio::test]
    async fn test_disconnect_without_reconnect_concludes() {
        let mut h = spawn_session(one_ship_config());
        place_both(&mut h).await;

        drop(h.p2);
        let outcome = timeout(Duration::from_secs(5), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.winner, Slot::P1);
        assert_eq!(outcome.reason, EndReason::Disconnect);
        // The winner's connection is relinquished back to the lobby.
        assert!(outcome.survivors[0].is_some());
        assert!(outcome.survivors[1].is_none());
    }

    #[test]
    fn test_parse_placement() {
        assert_eq!(
            parse_placement("PLACE A1 H"),
            Some((0, 0, Orientation::Horizontal))
        );
        assert_eq!(
            parse_placement("place j10 v"),
            Some((9, 9, Orientation::Vertical))
        );
        assert_eq!(parse_placement("PLACE A1"), None);
        assert_eq!(parse_placement("PLACE A1 X"), None);
        assert_eq!(parse_placement("FIRE A1 H"), None);
        assert_eq!(parse_placement("PLACE A1 H extra"), None);
    }
}
