//! AES-GCM frame sealing.
//!
//! Each frame is sealed with a fresh random 12-byte nonce and no associated
//! data; the nonce travels in the frame header region. Key length selects
//! the AES variant.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::core::constants::NONCE_LEN;
use crate::core::error::CryptoError;

use super::keys::SessionKey;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// An installed AEAD cipher for one connection direction pair.
pub struct SessionCipher {
    inner: CipherKind,
}

enum CipherKind {
    A128(Aes128Gcm),
    A192(Aes192Gcm),
    A256(Aes256Gcm),
}

impl SessionCipher {
    /// Build a cipher from a session key; the key length picks
    /// AES-128/192/256.
    pub fn new(key: &SessionKey) -> Result<Self, CryptoError> {
        let bytes = key.as_bytes();
        let inner = match bytes.len() {
            16 => CipherKind::A128(
                Aes128Gcm::new_from_slice(bytes).map_err(|_| CryptoError::BadKeyLength(16))?,
            ),
            24 => CipherKind::A192(
                Aes192Gcm::new_from_slice(bytes).map_err(|_| CryptoError::BadKeyLength(24))?,
            ),
            32 => CipherKind::A256(
                Aes256Gcm::new_from_slice(bytes).map_err(|_| CryptoError::BadKeyLength(32))?,
            ),
            n => return Err(CryptoError::BadKeyLength(n)),
        };
        Ok(Self { inner })
    }

    /// Encrypt a payload under a fresh random nonce.
    ///
    /// Returns the nonce and `ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = match &self.inner {
            CipherKind::A128(c) => c.encrypt(Nonce::from_slice(&nonce), plaintext),
            CipherKind::A192(c) => c.encrypt(Nonce::from_slice(&nonce), plaintext),
            CipherKind::A256(c) => c.encrypt(Nonce::from_slice(&nonce), plaintext),
        }
        .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok((nonce, ciphertext))
    }

    /// Decrypt and authenticate `ciphertext || tag`.
    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.inner {
            CipherKind::A128(c) => c.decrypt(Nonce::from_slice(nonce), ciphertext),
            CipherKind::A192(c) => c.decrypt(Nonce::from_slice(nonce), ciphertext),
            CipherKind::A256(c) => c.decrypt(Nonce::from_slice(nonce), ciphertext),
        }
        .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = match self.inner {
            CipherKind::A128(_) => 128,
            CipherKind::A192(_) => 192,
            CipherKind::A256(_) => 256,
        };
        write!(f, "SessionCipher(AES-{bits}-GCM)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(len: usize) -> SessionCipher {
        SessionCipher::new(&SessionKey::new(vec![0x42; len]).unwrap()).unwrap()
    }

    #[test]
    fn test_seal_open_all_key_lengths() {
        for len in [16, 24, 32] {
            let c = cipher(len);
            let (nonce, ct) = c.seal(b"attack at dawn").unwrap();
            assert_eq!(ct.len(), b"attack at dawn".len() + crate::core::constants::TAG_LEN);
            assert_eq!(c.open(&nonce, &ct).unwrap(), b"attack at dawn");
        }
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let c = cipher(32);
        let (nonce, mut ct) = c.seal(b"payload").unwrap();
        ct[0] ^= 0x80;
        assert!(matches!(
            c.open(&nonce, &ct),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_tag_rejected() {
        let c = cipher(16);
        let (nonce, mut ct) = c.seal(b"payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(c.open(&nonce, &ct).is_err());
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        let c = cipher(32);
        let (mut nonce, ct) = c.seal(b"payload").unwrap();
        nonce[0] ^= 0xFF;
        assert!(c.open(&nonce, &ct).is_err());
    }

    #[test]
    fn test_nonces_are_random() {
        let c = cipher(32);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let (nonce, _) = c.seal(b"x").unwrap();
            assert!(seen.insert(nonce));
        }
    }
}
