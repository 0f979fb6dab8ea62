//! Per-connection security state.
//!
//! A connection is either in legacy CRC mode for its whole life or sealed
//! with AES-GCM. Sealed links retain the previous cipher through a rekey
//! transition so frames that were already in flight under the old key still
//! authenticate; the retained key is discarded at the next rotation.

use crate::core::error::CryptoError;

use super::aead::SessionCipher;
use super::keys::SessionKey;

/// Security state for one connection.
#[derive(Debug)]
pub enum LinkSecurity {
    /// Legacy CRC-32 framing; payloads travel in plaintext.
    Plain,
    /// AEAD framing.
    Sealed(SealedLink),
}

/// Cipher state of a sealed connection.
#[derive(Debug)]
pub struct SealedLink {
    current: SessionCipher,
    previous: Option<SessionCipher>,
}

impl LinkSecurity {
    /// Sealed state from a freshly derived or pre-shared key.
    pub fn sealed(key: SessionKey) -> Result<Self, CryptoError> {
        Ok(LinkSecurity::Sealed(SealedLink {
            current: SessionCipher::new(&key)?,
            previous: None,
        }))
    }

    /// Whether frames on this connection are AEAD-sealed.
    pub fn is_sealed(&self) -> bool {
        matches!(self, LinkSecurity::Sealed(_))
    }

    /// Rotate to a new session key, retaining the old cipher for late
    /// frames. No-op error on plain links.
    pub fn install(&mut self, key: SessionKey) -> Result<(), CryptoError> {
        match self {
            LinkSecurity::Sealed(link) => {
                let fresh = SessionCipher::new(&key)?;
                link.previous = Some(std::mem::replace(&mut link.current, fresh));
                Ok(())
            }
            LinkSecurity::Plain => Err(CryptoError::HandshakeFailed(
                "cannot install a key on a plain link".into(),
            )),
        }
    }
}

impl SealedLink {
    /// Seal a payload under the current key.
    pub fn seal(&self, plaintext: &[u8]) -> Result<([u8; 12], Vec<u8>), CryptoError> {
        self.current.seal(plaintext)
    }

    /// Open a payload, falling back to the retained previous key for
    /// frames that crossed a rekey.
    pub fn open(&self, nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self.current.open(nonce, ciphertext) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => match &self.previous {
                Some(old) => old.open(nonce, ciphertext),
                None => Err(err),
            },
        }
    }
}
