//! P-256 key management and session-key derivation.

use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::{EncodedPoint, PublicKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::core::constants::{HKDF_INFO, SESSION_KEY_LEN};
use crate::core::error::CryptoError;

/// A symmetric AEAD session key (16, 24, or 32 bytes).
///
/// Key material is zeroized on drop.
pub struct SessionKey {
    bytes: Vec<u8>,
}

impl SessionKey {
    /// Wrap raw key material, validating its length.
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self { bytes }),
            n => Err(CryptoError::BadKeyLength(n)),
        }
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; present for clippy's `len`-without-`is_empty` lint.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        write!(f, "SessionKey({} bytes)", self.bytes.len())
    }
}

/// An ephemeral P-256 keypair for one handshake or rekey exchange.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key as SEC1 uncompressed bytes (65 bytes).
    pub fn public_bytes(&self) -> Vec<u8> {
        EncodedPoint::from(self.public).as_bytes().to_vec()
    }

    /// Run ECDH against the peer's SEC1-encoded public key and derive the
    /// session key.
    pub fn derive(&self, peer_public: &[u8]) -> Result<SessionKey, CryptoError> {
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&peer);
        derive_session_key(shared.raw_secret_bytes().as_slice())
    }
}

impl std::fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EphemeralKeypair({})", hex::encode(self.public_bytes()))
    }
}

/// HKDF-SHA256 with the protocol's `beer-session` info label, no salt,
/// 32-byte output.
pub fn derive_session_key(shared_secret: &[u8]) -> Result<SessionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; SESSION_KEY_LEN];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    let key = SessionKey::new(okm.to_vec());
    okm.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation_distinct() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();
        assert_ne!(a.public_bytes(), b.public_bytes());
        assert_eq!(a.public_bytes().len(), crate::core::constants::PUBLIC_KEY_LEN);
        assert_eq!(a.public_bytes()[0], 0x04); // SEC1 uncompressed marker
    }

    #[test]
    fn test_ecdh_agreement() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();

        let alice_key = alice.derive(&bob.public_bytes()).unwrap();
        let bob_key = bob.derive(&alice.public_bytes()).unwrap();

        assert_eq!(alice_key.as_bytes(), bob_key.as_bytes());
        assert_eq!(alice_key.len(), SESSION_KEY_LEN);
    }

    #[test]
    fn test_bad_peer_key_rejected() {
        let alice = EphemeralKeypair::generate();
        assert!(matches!(
            alice.derive(&[0u8; 65]),
            Err(CryptoError::InvalidPublicKey)
        ));
        assert!(matches!(
            alice.derive(b"not a point"),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_session_key_lengths() {
        assert!(SessionKey::new(vec![0u8; 16]).is_ok());
        assert!(SessionKey::new(vec![0u8; 24]).is_ok());
        assert!(SessionKey::new(vec![0u8; 32]).is_ok());
        assert!(matches!(
            SessionKey::new(vec![0u8; 15]),
            Err(CryptoError::BadKeyLength(15))
        ));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let key1 = derive_session_key(b"shared secret material").unwrap();
        let key2 = derive_session_key(b"shared secret material").unwrap();
        let other = derive_session_key(b"different material").unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert_ne!(key1.as_bytes(), other.as_bytes());
    }
}
