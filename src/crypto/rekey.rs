//! Rekey scheduling.
//!
//! The server is the sole rekey initiator: when its packet counter or the
//! key's age crosses a threshold it generates an ephemeral keypair, sends
//! the public key in a REKEY frame, and keeps using the old key until the
//! client's REKEY response arrives. The client only responds. Keeping one
//! deterministic initiator avoids simultaneous rekeys from both ends.

use std::time::{Duration, Instant};

use crate::core::constants::{REKEY_PACKET_THRESHOLD, REKEY_TIME_THRESHOLD};
use crate::core::error::CryptoError;

use super::keys::{EphemeralKeypair, SessionKey};

/// Which end of the connection may start a rekey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyRole {
    /// Starts rekeys when thresholds trip (the server).
    Initiator,
    /// Only answers peer REKEY frames (the client).
    Responder,
}

/// Tracks rekey thresholds and the staged ephemeral secret.
#[derive(Debug)]
pub struct RekeySchedule {
    role: RekeyRole,
    packet_threshold: u64,
    time_threshold: Duration,
    sent_since_rekey: u64,
    epoch_start: Instant,
    pending: Option<EphemeralKeypair>,
}

impl RekeySchedule {
    /// Create a schedule with the protocol-default thresholds.
    pub fn new(role: RekeyRole) -> Self {
        Self::with_thresholds(role, REKEY_PACKET_THRESHOLD, REKEY_TIME_THRESHOLD)
    }

    /// Create a schedule with custom thresholds (used by tests).
    pub fn with_thresholds(role: RekeyRole, packets: u64, time: Duration) -> Self {
        Self {
            role,
            packet_threshold: packets,
            time_threshold: time,
            sent_since_rekey: 0,
            epoch_start: Instant::now(),
            pending: None,
        }
    }

    /// Record one sent data frame; returns whether this side should now
    /// initiate a rekey.
    pub fn record_send(&mut self) -> bool {
        self.sent_since_rekey += 1;
        self.role == RekeyRole::Initiator
            && self.pending.is_none()
            && (self.sent_since_rekey >= self.packet_threshold
                || self.epoch_start.elapsed() >= self.time_threshold)
    }

    /// Stage a fresh ephemeral keypair and return its public bytes for the
    /// outgoing REKEY frame.
    pub fn begin(&mut self) -> Vec<u8> {
        let pair = EphemeralKeypair::generate();
        let public = pair.public_bytes();
        self.pending = Some(pair);
        public
    }

    /// Complete a rekey we initiated: derive the new key from the staged
    /// secret and the peer's public bytes, and reset the counters.
    pub fn complete(&mut self, peer_public: &[u8]) -> Result<SessionKey, CryptoError> {
        let pair = self.pending.take().ok_or(CryptoError::NoPendingRekey)?;
        let key = pair.derive(peer_public)?;
        self.reset();
        Ok(key)
    }

    /// Answer a peer-initiated rekey: generate our keypair, derive the new
    /// key, and return (our public bytes, new key).
    pub fn respond(&mut self, peer_public: &[u8]) -> Result<(Vec<u8>, SessionKey), CryptoError> {
        let pair = EphemeralKeypair::generate();
        let public = pair.public_bytes();
        let key = pair.derive(peer_public)?;
        self.reset();
        Ok((public, key))
    }

    /// Whether a rekey we initiated is awaiting the peer's response.
    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    fn reset(&mut self) {
        self.sent_since_rekey = 0;
        self.epoch_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responder_never_initiates() {
        let mut schedule = RekeySchedule::with_thresholds(
            RekeyRole::Responder,
            2,
            Duration::from_secs(0),
        );
        for _ in 0..10 {
            assert!(!schedule.record_send());
        }
    }

    #[test]
    fn test_initiator_trips_on_packet_threshold() {
        let mut schedule =
            RekeySchedule::with_thresholds(RekeyRole::Initiator, 3, Duration::from_secs(3600));
        assert!(!schedule.record_send());
        assert!(!schedule.record_send());
        assert!(schedule.record_send());
    }

    #[test]
    fn test_no_reinitiation_while_pending() {
        let mut schedule =
            RekeySchedule::with_thresholds(RekeyRole::Initiator, 1, Duration::from_secs(3600));
        assert!(schedule.record_send());
        let _public = schedule.begin();
        assert!(schedule.in_progress());
        assert!(!schedule.record_send());
    }

    #[test]
    fn test_full_exchange_agrees() {
        let mut server =
            RekeySchedule::with_thresholds(RekeyRole::Initiator, 1, Duration::from_secs(3600));
        let mut client = RekeySchedule::new(RekeyRole::Responder);

        let server_pub = server.begin();
        let (client_pub, client_key) = client.respond(&server_pub).unwrap();
        let server_key = server.complete(&client_pub).unwrap();

        assert_eq!(server_key.as_bytes(), client_key.as_bytes());
        assert!(!server.in_progress());
    }

    #[test]
    fn test_complete_without_begin_fails() {
        let mut schedule = RekeySchedule::new(RekeyRole::Initiator);
        let peer = EphemeralKeypair::generate();
        assert!(matches!(
            schedule.complete(&peer.public_bytes()),
            Err(CryptoError::NoPendingRekey)
        ));
    }

    #[test]
    fn test_counters_reset_after_completion() {
        let mut schedule =
            RekeySchedule::with_thresholds(RekeyRole::Initiator, 2, Duration::from_secs(3600));
        schedule.record_send();
        assert!(schedule.record_send());
        let _public = schedule.begin();
        let peer = EphemeralKeypair::generate();
        schedule.complete(&peer.public_bytes()).unwrap();
        assert!(!schedule.record_send());
    }
}
