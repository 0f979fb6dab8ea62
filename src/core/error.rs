//! Error types for the BEER protocol.

use thiserror::Error;

/// Errors raised while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// Magic or version bytes did not match the protocol.
    #[error("magic/version mismatch")]
    BadMagic,

    /// The packet-type byte is not a known [`crate::wire::frame::PacketType`].
    #[error("unknown packet type: {0}")]
    UnknownType(u8),

    /// CRC-32 verification failed; carries the header's sequence number so
    /// the receiver can NAK it.
    #[error("CRC mismatch on seq {seq}")]
    Crc {
        /// Sequence number from the (intact) frame header.
        seq: u32,
    },

    /// AEAD authentication failed (bad tag or tampered ciphertext).
    #[error("AEAD authentication failed")]
    AuthFailed,

    /// The stream ended mid-header or mid-payload.
    #[error("stream closed mid-frame")]
    Incomplete,

    /// Declared payload length exceeds the protocol limit.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Frame encryption was requested but no session key is installed.
    #[error("no session key installed")]
    KeyMissing,

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the receive path may NAK and keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WireError::Crc { .. } | WireError::AuthFailed)
    }
}

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key exchange failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A peer public key could not be parsed as a P-256 point.
    #[error("invalid peer public key")]
    InvalidPublicKey,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed")]
    DecryptionFailed,

    /// HKDF expansion failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Session keys must be 16, 24, or 32 bytes.
    #[error("unsupported key length: {0}")]
    BadKeyLength(usize),

    /// A REKEY completion arrived with no staged ephemeral secret.
    #[error("no rekey in progress")]
    NoPendingRekey,
}

/// Errors produced by the command parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The line was empty after trimming.
    #[error("Empty command")]
    Empty,

    /// CHAT with no message text.
    #[error("CHAT requires a non-empty message")]
    MissingChatText,

    /// FIRE with no coordinate.
    #[error("FIRE requires a coordinate")]
    MissingCoordinate,

    /// FIRE with a coordinate outside A1..J10.
    #[error("Invalid coordinate: {0}")]
    BadCoordinate(String),

    /// Unrecognized verb.
    #[error("Unknown command: {0}")]
    Unknown(String),
}

/// Top-level BEER errors.
#[derive(Debug, Error)]
pub enum BeerError {
    /// Wire framing error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
