//! Runtime-tunable settings.
//!
//! Every knob can be overridden through a `BEER_`-prefixed environment
//! variable so the production server runs at full speed by default while
//! tests and demos can slow individual components down.

use std::env;
use std::time::Duration;

use crate::core::constants;

/// Per-connection security mode, fixed at handshake time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityMode {
    /// Legacy CRC-32 framing, plaintext payloads.
    Plain,
    /// AEAD framing with a pre-shared static key (16/24/32 bytes).
    StaticKey(Vec<u8>),
    /// AEAD framing with a per-connection ECDH-derived key.
    Ecdh,
}

impl SecurityMode {
    /// Whether frames on this connection are AEAD-sealed.
    pub fn is_sealed(&self) -> bool {
        !matches!(self, SecurityMode::Plain)
    }
}

/// Environment-derived settings shared by the server and client runtimes.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listen/connect host (`BEER_HOST`).
    pub host: String,
    /// Listen/connect port (`BEER_PORT`).
    pub port: u16,
    /// Per-turn shot clock, doubling as the reconnect window
    /// (`BEER_SHOT_CLOCK`, seconds).
    pub shot_clock: Duration,
    /// Manual-placement window before random fallback
    /// (`BEER_PLACEMENT_TIMEOUT`, seconds).
    pub placement_timeout: Duration,
    /// Board dimension (`BEER_BOARD_SIZE`).
    pub board_size: usize,
    /// Static AEAD key used when `--secure` is given without an explicit
    /// key (`BEER_KEY`, hex).
    pub static_key: Vec<u8>,
    /// Debug logging requested via `BEER_DEBUG`.
    pub debug: bool,
    /// Log categories to silence (`BEER_QUIET`, comma-separated; any of
    /// `chat`, `shot`, `system`).
    pub quiet: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
            shot_clock: constants::SHOT_CLOCK,
            placement_timeout: constants::PLACEMENT_TIMEOUT,
            board_size: constants::BOARD_SIZE,
            static_key: hex::decode(constants::DEFAULT_KEY_HEX)
                .expect("default key hex is valid"),
            debug: false,
            quiet: Vec::new(),
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults for
    /// unset or unparseable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("BEER_HOST").unwrap_or(defaults.host),
            port: env_parse("BEER_PORT", defaults.port),
            shot_clock: env_secs("BEER_SHOT_CLOCK", defaults.shot_clock),
            placement_timeout: env_secs("BEER_PLACEMENT_TIMEOUT", defaults.placement_timeout),
            board_size: env_parse("BEER_BOARD_SIZE", defaults.board_size),
            static_key: env::var("BEER_KEY")
                .ok()
                .and_then(|hexstr| hex::decode(hexstr.trim()).ok())
                .filter(|key| matches!(key.len(), 16 | 24 | 32))
                .unwrap_or(defaults.static_key),
            debug: env_flag("BEER_DEBUG"),
            quiet: env::var("BEER_QUIET")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// The socket address string, `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse an environment variable, or return `default`.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse an environment variable holding whole seconds.
fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Truthy-flag environment variable ("1" or "true").
fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, constants::DEFAULT_PORT);
        assert_eq!(settings.board_size, 10);
        assert_eq!(settings.static_key.len(), 16);
        assert_eq!(settings.shot_clock, Duration::from_secs(60));
    }

    #[test]
    fn test_security_mode_sealed() {
        assert!(!SecurityMode::Plain.is_sealed());
        assert!(SecurityMode::StaticKey(vec![0u8; 16]).is_sealed());
        assert!(SecurityMode::Ecdh.is_sealed());
    }

    #[test]
    fn test_addr_format() {
        let settings = Settings::default();
        assert_eq!(settings.addr(), "127.0.0.1:61337");
    }
}
