//! Pre-framing ECDH key exchange.
//!
//! Before AEAD framing starts, the peers trade one line each on the raw
//! stream: the client sends `HELLO <hex(client-pub)>\n`, the server replies
//! `HELLO <hex(server-pub)>\n`, and both derive the session key with
//! HKDF-SHA256. The greeting is read one byte at a time so nothing past the
//! newline is buffered away from the framed stream that follows.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::error::CryptoError;
use crate::crypto::keys::{EphemeralKeypair, SessionKey};

/// Longest greeting line accepted (hex pubkey is 130 chars).
const MAX_HELLO_LEN: usize = 256;

/// Errors during the HELLO exchange.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer's line did not start with `HELLO `.
    #[error("expected HELLO greeting")]
    BadGreeting,

    /// The public key was not valid hex.
    #[error("malformed public key hex")]
    BadHex,

    /// The greeting line exceeded the size limit or the stream closed.
    #[error("greeting line truncated or oversized")]
    Truncated,

    /// Key derivation failed.
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client role: send our HELLO, read the server's, derive the key.
pub async fn client_hello<S>(stream: &mut S) -> Result<SessionKey, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let keypair = EphemeralKeypair::generate();
    send_hello(stream, &keypair).await?;
    let server_pub = read_hello(stream).await?;
    Ok(keypair.derive(&server_pub)?)
}

/// Server role: read the client's HELLO, reply with ours, derive the key.
pub async fn server_hello<S>(stream: &mut S) -> Result<SessionKey, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client_pub = read_hello(stream).await?;
    let keypair = EphemeralKeypair::generate();
    send_hello(stream, &keypair).await?;
    Ok(keypair.derive(&client_pub)?)
}

async fn send_hello<S: AsyncWrite + Unpin>(
    stream: &mut S,
    keypair: &EphemeralKeypair,
) -> Result<(), HandshakeError> {
    let line = format!("HELLO {}\n", hex::encode(keypair.public_bytes()));
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_hello<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, HandshakeError> {
    let mut line = Vec::with_capacity(MAX_HELLO_LEN);
    loop {
        let mut byte = [0u8; 1];
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(HandshakeError::Truncated);
        }
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= MAX_HELLO_LEN {
            return Err(HandshakeError::Truncated);
        }
        line.push(byte[0]);
    }

    let text = std::str::from_utf8(&line).map_err(|_| HandshakeError::BadGreeting)?;
    let hex_pub = text
        .trim()
        .strip_prefix("HELLO ")
        .ok_or(HandshakeError::BadGreeting)?;
    hex::decode(hex_pub.trim()).map_err(|_| HandshakeError::BadHex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hello_exchange_agrees() {
        let (mut client_side, mut server_side) = tokio::io::duplex(1024);

        let (client_key, server_key) = tokio::join!(
            client_hello(&mut client_side),
            server_hello(&mut server_side),
        );

        assert_eq!(
            client_key.unwrap().as_bytes(),
            server_key.unwrap().as_bytes()
        );
    }

    #[tokio::test]
    async fn test_bad_greeting_rejected() {
        let (mut client_side, mut server_side) = tokio::io::duplex(1024);
        client_side.write_all(b"EHLO whatever\n").await.unwrap();

        let err = server_hello(&mut server_side).await.unwrap_err();
        assert!(matches!(err, HandshakeError::BadGreeting));
    }

    #[tokio::test]
    async fn test_bad_hex_rejected() {
        let (mut client_side, mut server_side) = tokio::io::duplex(1024);
        client_side.write_all(b"HELLO not-hex!\n").await.unwrap();

        let err = server_hello(&mut server_side).await.unwrap_err();
        assert!(matches!(err, HandshakeError::BadHex));
    }

    #[tokio::test]
    async fn test_eof_mid_greeting() {
        let (mut client_side, mut server_side) = tokio::io::duplex(1024);
        client_side.write_all(b"HELLO abc").await.unwrap();
        drop(client_side);

        let err = server_hello(&mut server_side).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Truncated));
    }

    #[tokio::test]
    async fn test_nothing_past_newline_is_consumed() {
        let (mut client_side, mut server_side) = tokio::io::duplex(4096);

        let keypair = EphemeralKeypair::generate();
        let line = format!("HELLO {}\nTRAILING", hex::encode(keypair.public_bytes()));
        client_side.write_all(line.as_bytes()).await.unwrap();

        let _pub = read_hello(&mut server_side).await.unwrap();

        let mut rest = [0u8; 8];
        server_side.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"TRAILING");
    }
}
