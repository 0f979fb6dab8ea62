//! BEER Protocol - Security Layer
//!
//! P-256 ECDH key exchange with HKDF-SHA256 derivation, AES-GCM frame
//! sealing, and threshold-driven rekeying. Primitives come from the
//! RustCrypto stack; nothing is implemented by hand.

pub mod aead;
pub mod keys;
pub mod rekey;
pub mod session;

pub use aead::SessionCipher;
pub use keys::{derive_session_key, EphemeralKeypair, SessionKey};
pub use rekey::RekeySchedule;
pub use session::LinkSecurity;
