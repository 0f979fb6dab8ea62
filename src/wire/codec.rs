//! Frame pack/unpack for both wire modes.
//!
//! Decoding is split in two phases so callers can keep lock scopes
//! synchronous: [`read_wire`] pulls raw bytes off the stream without
//! verifying anything, then [`open`] checks the CRC or AEAD tag against the
//! connection's [`LinkSecurity`]. [`decode`] combines the two for
//! single-task use.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::constants::{CRC_LEN, HEADER_LEN, NONCE_LEN, TAG_LEN};
use crate::core::error::WireError;
use crate::crypto::session::LinkSecurity;
use crate::wire::frame::{FrameHeader, PacketType};

/// A decoded, verified application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet type.
    pub ptype: PacketType,
    /// Sender-assigned sequence number.
    pub seq: u32,
    /// Plaintext payload bytes (UTF-8 JSON for data frames, empty for
    /// ACK/NAK, hex text for REKEY).
    pub payload: Vec<u8>,
}

/// A frame read off the stream but not yet verified.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Parsed header.
    pub header: FrameHeader,
    /// Mode-specific body.
    pub body: RawBody,
}

/// The mode-specific portion of a raw frame.
#[derive(Debug, Clone)]
pub enum RawBody {
    /// CRC mode: checksum trailer plus plaintext payload.
    Plain {
        /// CRC-32 over header bytes and payload.
        crc: u32,
        /// Plaintext payload.
        payload: Vec<u8>,
    },
    /// AEAD mode: per-frame nonce plus ciphertext and tag.
    Sealed {
        /// Random 12-byte nonce.
        nonce: [u8; NONCE_LEN],
        /// Ciphertext followed by the 16-byte tag.
        ciphertext: Vec<u8>,
    },
}

/// Serialize one frame under the connection's security mode.
///
/// CRC mode appends a CRC-32 of `header[0..12] + payload`, then the
/// plaintext. AEAD mode generates a fresh random nonce and appends
/// `nonce + ciphertext + tag`; the header's `length` counts the
/// ciphertext and tag.
pub fn encode(
    security: &LinkSecurity,
    ptype: PacketType,
    seq: u32,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    match security {
        LinkSecurity::Plain => {
            let header = FrameHeader::new(ptype, seq, payload.len() as u32).to_bytes();
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&header);
            hasher.update(payload);
            let crc = hasher.finalize();

            let mut frame = Vec::with_capacity(HEADER_LEN + CRC_LEN + payload.len());
            frame.extend_from_slice(&header);
            frame.extend_from_slice(&crc.to_be_bytes());
            frame.extend_from_slice(payload);
            Ok(frame)
        }
        LinkSecurity::Sealed(link) => {
            let (nonce, ciphertext) = link.seal(payload).map_err(|_| WireError::KeyMissing)?;
            let header = FrameHeader::new(ptype, seq, ciphertext.len() as u32).to_bytes();

            let mut frame = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
            frame.extend_from_slice(&header);
            frame.extend_from_slice(&nonce);
            frame.extend_from_slice(&ciphertext);
            Ok(frame)
        }
    }
}

/// Read one raw frame from the stream.
///
/// `sealed` selects the wire mode the connection agreed on at handshake
/// time. A clean EOF (or one mid-frame) surfaces as
/// [`WireError::Incomplete`].
pub async fn read_wire<R: AsyncRead + Unpin>(
    reader: &mut R,
    sealed: bool,
) -> Result<RawFrame, WireError> {
    let mut header_bytes = [0u8; HEADER_LEN];
    read_fully(reader, &mut header_bytes).await?;
    let header = FrameHeader::parse(&header_bytes)?;
    let length = header.length as usize;

    let body = if sealed {
        if length < TAG_LEN {
            return Err(WireError::AuthFailed);
        }
        let mut nonce = [0u8; NONCE_LEN];
        read_fully(reader, &mut nonce).await?;
        let mut ciphertext = vec![0u8; length];
        read_fully(reader, &mut ciphertext).await?;
        RawBody::Sealed { nonce, ciphertext }
    } else {
        let mut crc_bytes = [0u8; CRC_LEN];
        read_fully(reader, &mut crc_bytes).await?;
        let mut payload = vec![0u8; length];
        read_fully(reader, &mut payload).await?;
        RawBody::Plain {
            crc: u32::from_be_bytes(crc_bytes),
            payload,
        }
    };

    Ok(RawFrame { header, body })
}

/// Verify a raw frame and yield its plaintext.
pub fn open(raw: RawFrame, security: &LinkSecurity) -> Result<Frame, WireError> {
    let header = raw.header;
    match raw.body {
        RawBody::Plain { crc, payload } => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&header.to_bytes());
            hasher.update(&payload);
            if hasher.finalize() != crc {
                return Err(WireError::Crc { seq: header.seq });
            }
            Ok(Frame {
                ptype: header.ptype,
                seq: header.seq,
                payload,
            })
        }
        RawBody::Sealed { nonce, ciphertext } => {
            let plaintext = match security {
                LinkSecurity::Sealed(link) => link
                    .open(&nonce, &ciphertext)
                    .map_err(|_| WireError::AuthFailed)?,
                LinkSecurity::Plain => return Err(WireError::KeyMissing),
            };
            Ok(Frame {
                ptype: header.ptype,
                seq: header.seq,
                payload: plaintext,
            })
        }
    }
}

/// Read and verify one frame: the combined `unpack` operation.
pub async fn decode<R: AsyncRead + Unpin>(
    reader: &mut R,
    security: &LinkSecurity,
) -> Result<Frame, WireError> {
    let raw = read_wire(reader, security.is_sealed()).await?;
    open(raw, security)
}

async fn read_fully<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), WireError> {
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::Incomplete
        } else {
            WireError::Io(e)
        }
    })?;
    Ok(())
}
