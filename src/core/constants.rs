//! Protocol constants.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed;
//! runtime-tunable knobs live in [`crate::core::config`].

use std::time::Duration;

// =============================================================================
// FRAME LAYOUT
// =============================================================================

/// Frame magic bytes ("BEER" is not valid hex, so 0xBEEF it is).
pub const MAGIC: u16 = 0xBEEF;

/// Protocol version.
pub const VERSION: u8 = 1;

/// Common header size: magic + version + ptype + seq + length.
pub const HEADER_LEN: usize = 12;

/// CRC-32 trailer size (CRC mode).
pub const CRC_LEN: usize = 4;

/// AES-GCM nonce size (AEAD mode).
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag size.
pub const TAG_LEN: usize = 16;

/// Upper bound on a single frame payload.
pub const MAX_PAYLOAD: usize = 10 * 1024 * 1024;

// =============================================================================
// RELIABILITY
// =============================================================================

/// Sliding replay-window size in sequence numbers.
pub const REPLAY_WINDOW: u32 = 64;

/// Retransmit ring capacity in frames.
pub const RETRANSMIT_CAPACITY: usize = 32;

/// Consecutive corrupt frames tolerated before the endpoint gives up.
pub const MAX_NAK_STREAK: u32 = 8;

// =============================================================================
// KEY EXCHANGE
// =============================================================================

/// HKDF info label for session-key derivation.
pub const HKDF_INFO: &[u8] = b"beer-session";

/// Derived session-key length in bytes (AES-256-GCM).
pub const SESSION_KEY_LEN: usize = 32;

/// SEC1 uncompressed P-256 public-key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Packets sent on one key before the server initiates a rekey.
pub const REKEY_PACKET_THRESHOLD: u64 = 1024;

/// Wall-clock age of a key before the server initiates a rekey.
pub const REKEY_TIME_THRESHOLD: Duration = Duration::from_secs(3600);

// =============================================================================
// MATCH TIMING
// =============================================================================

/// Per-turn shot clock; also the reconnect hold window.
pub const SHOT_CLOCK: Duration = Duration::from_secs(60);

/// Manual ship-placement window before falling back to random placement.
pub const PLACEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the framed token handshake after accept.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default listen/connect host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen/connect port.
pub const DEFAULT_PORT: u16 = 61337;

/// Default board dimension.
pub const BOARD_SIZE: usize = 10;

/// Default 16-byte static AEAD key, as hex ("beerbeerbeerbeer").
pub const DEFAULT_KEY_HEX: &str = "62656572626565726265657262656572";

/// First value of the lobby's PID-token counter.
pub const TOKEN_COUNTER_START: u64 = 100_000;
