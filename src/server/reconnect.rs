//! Reconnect tokens and mid-match socket rebinding.
//!
//! A process-wide [`ReconnectRegistry`] maps tokens to the
//! [`ReconnectController`] of the match that owns them. When a handshake
//! arrives with a known token, the lobby attaches the new connection to the
//! controller; the match session, parked in [`ReconnectController::wait`],
//! picks it up and rebinds the player slot. The controller moves
//! connections only — the session performs the board resync and all INFO
//! messaging around the hold window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::core::constants::TOKEN_COUNTER_START;
use crate::game::event::Slot;
use crate::transport::endpoint::Link;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Process-wide token → controller map, plus the PID-token mint.
pub struct ReconnectRegistry {
    inner: Mutex<HashMap<String, std::sync::Arc<ReconnectController>>>,
    counter: AtomicU64,
}

impl Default for ReconnectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(TOKEN_COUNTER_START),
        }
    }

    /// Mint a fresh `PID`-style token for a client that supplied none.
    pub fn mint(&self) -> String {
        format!("PID{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a token for a match's controller.
    pub fn register(&self, token: &str, controller: std::sync::Arc<ReconnectController>) {
        lock(&self.inner).insert(token.to_string(), controller);
    }

    /// Remove a token (match over, or slot handed to a promoted player).
    pub fn unregister(&self, token: &str) {
        lock(&self.inner).remove(token);
    }

    /// Look up the controller holding a token.
    pub fn lookup(&self, token: &str) -> Option<std::sync::Arc<ReconnectController>> {
        lock(&self.inner).get(token).cloned()
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Whether no tokens are registered.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }
}

/// Per-match reconnect state: one token, pending-connection slot, and wait
/// event per player.
pub struct ReconnectController {
    window: Duration,
    tokens: Mutex<[String; 2]>,
    pending: Mutex<[Option<Link>; 2]>,
    arrived: [Notify; 2],
}

impl ReconnectController {
    /// Create a controller holding both players' tokens.
    pub fn new(window: Duration, token_p1: String, token_p2: String) -> Self {
        Self {
            window,
            tokens: Mutex::new([token_p1, token_p2]),
            pending: Mutex::new([None, None]),
            arrived: [Notify::new(), Notify::new()],
        }
    }

    /// The reconnect hold window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The token currently bound to a slot.
    pub fn token(&self, slot: Slot) -> String {
        lock(&self.tokens)[slot.index()].clone()
    }

    /// Which slot a token belongs to, if any.
    pub fn slot_for(&self, token: &str) -> Option<Slot> {
        let tokens = lock(&self.tokens);
        Slot::both().into_iter().find(|s| tokens[s.index()] == token)
    }

    /// Swap in a new token for a slot (spectator promotion).
    pub fn replace_token(&self, slot: Slot, token: String) {
        lock(&self.tokens)[slot.index()] = token;
    }

    /// Attach a reconnecting player's fresh connection by token.
    ///
    /// Returns `true` on success. When the slot already has a pending
    /// connection the newcomer gets an ERR and is dropped, keeping the
    /// original.
    pub async fn attach(&self, token: &str, link: Link) -> bool {
        let Some(slot) = self.slot_for(token) else {
            return false;
        };
        let link = match self.try_claim_pending(slot, link) {
            Ok(()) => {
                self.arrived[slot.index()].notify_one();
                info!("reattached {slot} via token {token}");
                return true;
            }
            Err(link) => link,
        };
        warn!("token {token} already has a pending socket; rejecting duplicate");
        let _ = link.sink.send_err("ERR token-in-use").await;
        false
    }

    /// Claim the pending slot for `slot` with `link`, unless already taken.
    fn try_claim_pending(&self, slot: Slot, link: Link) -> Result<(), Link> {
        let mut pending = lock(&self.pending);
        if pending[slot.index()].is_some() {
            return Err(link);
        }
        pending[slot.index()] = Some(link);
        Ok(())
    }

    /// Block up to the window for a fresh connection on `slot`.
    pub async fn wait(&self, slot: Slot) -> bool {
        let deadline = tokio::time::Instant::now() + self.window;
        loop {
            if lock(&self.pending)[slot.index()].is_some() {
                return true;
            }
            let notified = self.arrived[slot.index()].notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    /// Non-blocking check: if a fresh connection arrived since the last
    /// look, take it.
    pub fn try_rebind(&self, slot: Slot) -> Option<Link> {
        self.take_new_socket(slot)
    }

    /// Consume the pending connection for a slot.
    pub fn take_new_socket(&self, slot: Slot) -> Option<Link> {
        lock(&self.pending)[slot.index()].take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::transport::endpoint::{start, EndpointConfig};

    fn test_link() -> Link {
        let (io, _other) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(io);
        start(r, w, EndpointConfig::default())
    }

    fn controller() -> ReconnectController {
        ReconnectController::new(
            Duration::from_millis(200),
            "PID1".to_string(),
            "PID2".to_string(),
        )
    }

    #[test]
    fn test_slot_lookup() {
        let ctrl = controller();
        assert_eq!(ctrl.slot_for("PID1"), Some(Slot::P1));
        assert_eq!(ctrl.slot_for("PID2"), Some(Slot::P2));
        assert_eq!(ctrl.slot_for("PID3"), None);
    }

    #[tokio::test]
    async fn test_attach_then_wait() {
        let ctrl = controller();
        assert!(ctrl.attach("PID1", test_link()).await);
        // Arrival before wait still resolves: the permit is stored.
        assert!(ctrl.wait(Slot::P1).await);
        assert!(ctrl.take_new_socket(Slot::P1).is_some());
        assert!(ctrl.take_new_socket(Slot::P1).is_none());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let ctrl = controller();
        assert!(!ctrl.wait(Slot::P2).await);
    }

    #[tokio::test]
    async fn test_try_rebind_is_non_blocking() {
        let ctrl = controller();
        assert!(ctrl.try_rebind(Slot::P1).is_none());
        assert!(ctrl.attach("PID1", test_link()).await);
        assert!(ctrl.try_rebind(Slot::P1).is_some());
        assert!(ctrl.try_rebind(Slot::P1).is_none());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_late_attach() {
        let ctrl = Arc::new(controller());
        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.wait(Slot::P1).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ctrl.attach("PID1", test_link()).await);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_attach_rejected() {
        let ctrl = controller();
        assert!(ctrl.attach("PID1", test_link()).await);
        assert!(!ctrl.attach("PID1", test_link()).await);
        // The original pending connection survives.
        assert!(ctrl.take_new_socket(Slot::P1).is_some());
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let ctrl = controller();
        assert!(!ctrl.attach("PID99", test_link()).await);
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = ReconnectRegistry::new();
        let ctrl = Arc::new(controller());
        registry.register("PID1", Arc::clone(&ctrl));
        registry.register("PID2", Arc::clone(&ctrl));
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup("PID1").is_some());

        registry.unregister("PID1");
        registry.unregister("PID2");
        assert!(registry.is_empty());
        assert!(registry.lookup("PID1").is_none());
    }

    #[test]
    fn test_token_replacement() {
        let ctrl = controller();
        ctrl.replace_token(Slot::P2, "PID7".to_string());
        assert_eq!(ctrl.token(Slot::P2), "PID7");
        assert_eq!(ctrl.slot_for("PID2"), None);
        assert_eq!(ctrl.slot_for("PID7"), Some(Slot::P2));
    }
}
