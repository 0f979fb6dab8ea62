//! The lobby controller.
//!
//! A single accept loop admits connections: each one gets the optional
//! HELLO key exchange, an endpoint task pair, and a framed token handshake
//! (ACKed by the endpoint). Known tokens reattach to their running match;
//! everyone else joins the waiting room. Two waiting clients and no active
//! match means a new session is launched; when it finishes, the winner is
//! requeued at the head and the loser at the tail unless the match ended by
//! timeout or concession.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::config::{SecurityMode, Settings};
use crate::core::constants::HANDSHAKE_TIMEOUT;
use crate::crypto::keys::SessionKey;
use crate::crypto::rekey::RekeyRole;
use crate::crypto::session::LinkSecurity;
use crate::game::event::EndReason;
use crate::server::reconnect::ReconnectRegistry;
use crate::server::session::{MatchConfig, MatchOutcome, MatchSession};
use crate::server::spectator::SpectatorHub;
use crate::transport::endpoint::{self, EndpointConfig, Link};
use crate::transport::handshake::server_hello;
use crate::wire::payload::Payload;

/// Errors surfacing from the lobby.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listen socket.
    #[error("bind failed: {0}")]
    BindFailed(std::io::Error),

    /// I/O error on the listen socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen host.
    pub host: String,
    /// Listen port (0 picks an ephemeral port).
    pub port: u16,
    /// Per-connection wire security.
    pub security: SecurityMode,
    /// Settings handed to each match.
    pub match_config: MatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ServerConfig {
    /// Build a config from environment-derived [`Settings`].
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            security: SecurityMode::Plain,
            match_config: MatchConfig {
                shot_clock: settings.shot_clock,
                reconnect_window: settings.shot_clock,
                placement_timeout: settings.placement_timeout,
                board_size: settings.board_size,
                ..MatchConfig::default()
            },
        }
    }
}

/// A connection that finished its handshake.
struct Admitted {
    link: Link,
    token: Option<String>,
}

/// A bound lobby, ready to run.
pub struct Lobby {
    listener: TcpListener,
    config: ServerConfig,
}

impl Lobby {
    /// Bind the listen socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(ServerError::BindFailed)?;
        Ok(Self { listener, config })
    }

    /// The bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!("BEER server listening on {addr}");

        let registry = Arc::new(ReconnectRegistry::new());
        let hub = Arc::new(SpectatorHub::new());
        let (admit_tx, mut admit_rx) = mpsc::channel::<Admitted>(16);
        let mut matches: JoinSet<MatchOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("connection from {peer}");
                            let security = self.config.security.clone();
                            let tx = admit_tx.clone();
                            tokio::spawn(async move {
                                match admit(stream, security).await {
                                    Some(admitted) => {
                                        let _ = tx.send(admitted).await;
                                    }
                                    None => debug!("handshake with {peer} failed"),
                                }
                            });
                        }
                        Err(err) => warn!("accept failed: {err}"),
                    }
                }

                Some(admitted) = admit_rx.recv() => {
                    let active_running = !matches.is_empty();
                    enroll(admitted, &registry, &hub, active_running).await;
                    if !active_running {
                        try_pair(&mut matches, &hub, &registry, &self.config.match_config).await;
                    }
                }

                Some(outcome) = matches.join_next() => {
                    match outcome {
                        Ok(outcome) => finish_match(outcome, &hub).await,
                        Err(err) => warn!("match task failed: {err}"),
                    }
                    try_pair(&mut matches, &hub, &registry, &self.config.match_config).await;
                }

                _ = shutdown_signal() => {
                    info!("received shutdown signal; closing listener");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Bind and run a lobby until shutdown.
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    Lobby::bind(config).await?.run().await
}

/// Per-connection admission: optional HELLO exchange, endpoint start, and
/// the framed token handshake.
async fn admit(mut stream: TcpStream, security: SecurityMode) -> Option<Admitted> {
    let link_security = match &security {
        SecurityMode::Plain => LinkSecurity::Plain,
        SecurityMode::StaticKey(key) => {
            let key = SessionKey::new(key.clone()).ok()?;
            LinkSecurity::sealed(key).ok()?
        }
        SecurityMode::Ecdh => {
            let key = match server_hello(&mut stream).await {
                Ok(key) => key,
                Err(err) => {
                    debug!("HELLO exchange failed: {err}");
                    return None;
                }
            };
            LinkSecurity::sealed(key).ok()?
        }
    };

    let (reader, writer) = stream.into_split();
    let mut link = endpoint::start(
        reader,
        writer,
        EndpointConfig::with_security(link_security, RekeyRole::Initiator),
    );

    // The endpoint ACKs the handshake frame like any other data frame.
    let token = match tokio::time::timeout(HANDSHAKE_TIMEOUT, link.source.recv()).await {
        Ok(Some(frame)) => match Payload::parse(&frame.payload) {
            Ok(Payload::Handshake { token }) => Some(token),
            Ok(other) => {
                debug!("handshake frame carried {other:?}; treating as anonymous");
                None
            }
            Err(_) => None,
        },
        Ok(None) => return None,
        Err(_) => {
            debug!("no handshake frame within the window; treating as anonymous");
            None
        }
    };

    Some(Admitted { link, token })
}

/// Route an admitted connection: reattach by token, or join the queue.
async fn enroll(
    admitted: Admitted,
    registry: &Arc<ReconnectRegistry>,
    hub: &Arc<SpectatorHub>,
    active_running: bool,
) {
    if let Some(token) = &admitted.token {
        if let Some(controller) = registry.lookup(token) {
            if controller.attach(token, admitted.link).await {
                info!("reattached a player via token {token}");
            } else {
                info!("rejected duplicate attach for token {token}");
            }
            return;
        }
    }

    let token = admitted.token.clone();
    let position = hub.add(admitted.link, admitted.token, active_running).await;
    info!("lobby update: token {token:?} joined (size={position})");

    if active_running {
        let sinks = hub.sinks().await;
        if let Some(sink) = sinks.last() {
            let _ = sink
                .send_msg(format!(
                    "INFO You are currently number {position} in the queue to play"
                ))
                .await;
        }
    }
}

/// Launch a match when two live clients are waiting and nothing is running.
async fn try_pair(
    matches: &mut JoinSet<MatchOutcome>,
    hub: &Arc<SpectatorHub>,
    registry: &Arc<ReconnectRegistry>,
    match_config: &MatchConfig,
) {
    if !matches.is_empty() {
        return;
    }

    let mut picked: Vec<(Link, Option<String>)> = Vec::new();
    while picked.len() < 2 {
        match hub.take_front().await {
            Some((link, token)) if !link.sink.is_closed() => picked.push((link, token)),
            Some((_, token)) => debug!("discarding a dead waiter (token {token:?})"),
            None => {
                // Not enough live clients; put the ones we took back.
                for (link, token) in picked.into_iter().rev() {
                    hub.push_front(link, token).await;
                }
                return;
            }
        }
    }

    let (link2, token2) = picked.pop().expect("two picked");
    let (link1, token1) = picked.pop().expect("two picked");
    let token1 = token1.unwrap_or_else(|| registry.mint());
    let mut token2 = token2.unwrap_or_else(|| registry.mint());
    if token1 == token2 {
        warn!("duplicate token {token1} in lobby; minting a fresh one for the second slot");
        token2 = registry.mint();
    }

    info!("launching new game session: {token1} vs {token2}");
    let session = MatchSession::new(
        match_config.clone(),
        (link1, token1),
        (link2, token2),
        Arc::clone(hub),
        Arc::clone(registry),
    );
    matches.spawn(session.run());
}

/// Broadcast the result and requeue the finishers.
async fn finish_match(outcome: MatchOutcome, hub: &Arc<SpectatorHub>) {
    let winner_idx = outcome.winner.index();
    let winner_token = outcome.tokens[winner_idx].clone();
    let loser_token = outcome.tokens[1 - winner_idx].clone();
    info!(
        "match completed: {winner_token} beat {loser_token} by {} in {} shots",
        outcome.reason, outcome.shots
    );

    if outcome.reason == EndReason::Concession {
        hub.broadcast_msg(&format!(
            "INFO Player {loser_token} has forfeited – match over"
        ))
        .await;
    }
    hub.broadcast_msg(&format!(
        "INFO {winner_token} BEAT {loser_token} IN {} SHOTS",
        outcome.shots
    ))
    .await;

    let mut survivors = outcome.survivors;
    let winner_conn = survivors[winner_idx].take();
    let loser_conn = survivors[1 - winner_idx].take();

    if let Some((link, token)) = winner_conn {
        hub.push_front(link, Some(token)).await;
    }
    let drop_loser = matches!(outcome.reason, EndReason::Timeout | EndReason::Concession);
    if let Some((link, token)) = loser_conn {
        if drop_loser {
            debug!("dropping the loser ({token}) after {}", outcome.reason);
        } else {
            hub.push_back(link, Some(token)).await;
        }
    }

    // Everyone still waiting behind the next two learns their position.
    let sinks = hub.sinks().await;
    for (idx, sink) in sinks.iter().enumerate().skip(2) {
        let _ = sink
            .send_msg(format!("INFO You are number {} in the queue to play", idx - 1))
            .await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!("SIGTERM handler unavailable: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
