//! The match client.

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

use crate::core::config::{SecurityMode, Settings};
use crate::core::error::CryptoError;
use crate::crypto::keys::SessionKey;
use crate::crypto::rekey::RekeyRole;
use crate::crypto::session::LinkSecurity;
use crate::transport::endpoint::{self, EndpointConfig, FrameSink, FrameSource};
use crate::transport::handshake::{client_hello, HandshakeError};
use crate::wire::codec::Frame;
use crate::wire::frame::PacketType;
use crate::wire::payload::Payload;

/// Errors in the client runtime.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(std::io::Error),

    /// The HELLO key exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The static key was unusable.
    #[error("bad static key: {0}")]
    BadKey(#[from] CryptoError),

    /// The connection is gone.
    #[error("disconnected")]
    Disconnected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`.
    pub server_addr: String,
    /// Reconnect token; defaults to a PID-derived one (`BEER_TOKEN`
    /// overrides via [`Settings`]-aware callers).
    pub token: Option<String>,
    /// Wire security; must match the server's.
    pub security: SecurityMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: Settings::default().addr(),
            token: None,
            security: SecurityMode::Plain,
        }
    }
}

/// A connected match client.
pub struct GameClient {
    sink: FrameSink,
    source: FrameSource,
    token: String,
}

impl GameClient {
    /// Connect, run the configured key exchange, start the endpoint, and
    /// present the reconnect token.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let token = config
            .token
            .unwrap_or_else(|| format!("PID{}", std::process::id()));

        let mut stream = TcpStream::connect(&config.server_addr)
            .await
            .map_err(ClientError::ConnectionFailed)?;

        let security = match &config.security {
            SecurityMode::Plain => LinkSecurity::Plain,
            SecurityMode::StaticKey(key) => {
                LinkSecurity::sealed(SessionKey::new(key.clone())?)?
            }
            SecurityMode::Ecdh => {
                let key = client_hello(&mut stream).await?;
                LinkSecurity::sealed(key)?
            }
        };

        let (reader, writer) = stream.into_split();
        let link = endpoint::start(
            reader,
            writer,
            EndpointConfig::with_security(security, RekeyRole::Responder),
        );

        link.sink
            .send_payload(PacketType::Game, &Payload::handshake(&token))
            .await
            .map_err(|_| ClientError::Disconnected)?;

        Ok(Self {
            sink: link.sink,
            source: link.source,
            token,
        })
    }

    /// The token this client handshook with.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The next raw application frame; `None` once disconnected.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.source.recv().await
    }

    /// The next parseable payload, with its packet type. Payloads outside
    /// the protocol's closed set are logged and skipped.
    pub async fn next_payload(&mut self) -> Option<(PacketType, Payload)> {
        loop {
            let frame = self.source.recv().await?;
            match Payload::parse(&frame.payload) {
                Ok(payload) => return Some((frame.ptype, payload)),
                Err(err) => debug!("dropping unknown payload: {err}"),
            }
        }
    }

    /// Send one raw command line (`FIRE A1`, `CHAT hi`, `QUIT`, ...).
    pub async fn send_line(&self, line: &str) -> Result<(), ClientError> {
        self.sink
            .send_payload(PacketType::Game, &Payload::text(line))
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Fire at a coordinate.
    pub async fn fire(&self, coord: &str) -> Result<(), ClientError> {
        self.send_line(&format!("FIRE {coord}")).await
    }

    /// Send a chat line.
    pub async fn chat(&self, text: &str) -> Result<(), ClientError> {
        self.send_line(&format!("CHAT {text}")).await
    }

    /// Concede the match.
    pub async fn quit(&self) -> Result<(), ClientError> {
        self.send_line("QUIT").await
    }
}
