//! The per-connection transport endpoint.
//!
//! [`start`] wraps one bidirectional stream in a reader task and a writer
//! task joined by a single outbound mailbox, and hands back a [`Link`]:
//! a cloneable [`FrameSink`] for sending and a [`FrameSource`] yielding
//! verified application frames.
//!
//! The tasks keep all reliability bookkeeping inside the endpoint:
//!
//! - the writer assigns sequence numbers, stashes data frames in the
//!   retransmit ring before writing, and initiates rekeys when due;
//! - the reader ACKs accepted data frames, NAKs corrupt ones, answers
//!   NAKs with verbatim retransmissions, prunes the ring on ACKs,
//!   completes REKEY exchanges, and silently drops replayed sequences.
//!
//! When the stream ends cleanly, or corruption persists past the NAK
//! budget, both tasks wind down and the source yields `None`; callers
//! treat that as a disconnect.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::core::constants::{
    MAX_NAK_STREAK, REKEY_PACKET_THRESHOLD, REKEY_TIME_THRESHOLD, REPLAY_WINDOW,
    RETRANSMIT_CAPACITY,
};
use crate::core::error::WireError;
use crate::crypto::keys::SessionKey;
use crate::crypto::rekey::{RekeyRole, RekeySchedule};
use crate::crypto::session::LinkSecurity;
use crate::wire::codec::{self, Frame};
use crate::wire::frame::PacketType;
use crate::wire::payload::Payload;
use crate::wire::replay::ReplayWindow;
use crate::wire::retransmit::RetransmitBuffer;

/// The peer tasks have shut down; the connection is gone.
#[derive(Debug, Error)]
#[error("endpoint closed")]
pub struct EndpointClosed;

/// Endpoint tuning knobs.
#[derive(Debug)]
pub struct EndpointConfig {
    /// Wire mode and key state for this connection.
    pub security: LinkSecurity,
    /// Which side may initiate rekeys (the server).
    pub rekey_role: RekeyRole,
    /// Packets sent on one key before a rekey is initiated.
    pub rekey_packet_threshold: u64,
    /// Key age before a rekey is initiated.
    pub rekey_time_threshold: std::time::Duration,
    /// Replay-window size.
    pub replay_window: u32,
    /// Retransmit-ring capacity.
    pub retransmit_capacity: usize,
    /// Mailbox and inbox depth.
    pub queue_depth: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            security: LinkSecurity::Plain,
            rekey_role: RekeyRole::Responder,
            rekey_packet_threshold: REKEY_PACKET_THRESHOLD,
            rekey_time_threshold: REKEY_TIME_THRESHOLD,
            replay_window: REPLAY_WINDOW,
            retransmit_capacity: RETRANSMIT_CAPACITY,
            queue_depth: 64,
        }
    }
}

impl EndpointConfig {
    /// A config with the given security state and rekey role, defaults
    /// elsewhere.
    pub fn with_security(security: LinkSecurity, rekey_role: RekeyRole) -> Self {
        Self {
            security,
            rekey_role,
            ..Self::default()
        }
    }
}

/// One running endpoint: the sending and receiving handles.
#[derive(Debug)]
pub struct Link {
    /// Outbound handle; clone freely.
    pub sink: FrameSink,
    /// Inbound application frames.
    pub source: FrameSource,
}

/// Cloneable handle that enqueues frames for the writer task.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Outbound>,
}

impl FrameSink {
    /// Enqueue a data frame.
    pub async fn send(&self, ptype: PacketType, payload: Vec<u8>) -> Result<(), EndpointClosed> {
        self.tx
            .send(Outbound::Data { ptype, payload })
            .await
            .map_err(|_| EndpointClosed)
    }

    /// Enqueue a [`Payload`] on a data frame.
    pub async fn send_payload(
        &self,
        ptype: PacketType,
        payload: &Payload,
    ) -> Result<(), EndpointClosed> {
        self.send(ptype, payload.to_bytes()).await
    }

    /// Enqueue a free-text GAME line.
    pub async fn send_msg(&self, msg: impl Into<String>) -> Result<(), EndpointClosed> {
        self.send_payload(PacketType::Game, &Payload::text(msg.into()))
            .await
    }

    /// Enqueue an ERROR frame carrying a text line.
    pub async fn send_err(&self, msg: impl Into<String>) -> Result<(), EndpointClosed> {
        self.send_payload(PacketType::Error, &Payload::text(msg.into()))
            .await
    }

    /// Whether the writer task is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving handle yielding verified, deduplicated application frames.
#[derive(Debug)]
pub struct FrameSource {
    rx: mpsc::Receiver<Frame>,
}

impl FrameSource {
    /// Await the next application frame; `None` means the connection is
    /// gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

enum Outbound {
    Data {
        ptype: PacketType,
        payload: Vec<u8>,
    },
    /// ACK/NAK; the header seq references the peer's frame.
    Control {
        ptype: PacketType,
        seq: u32,
    },
    /// Verbatim retransmission of buffered bytes.
    Raw(Vec<u8>),
    /// REKEY frame; `install` switches to the new key after the frame is
    /// on the wire (the responder path).
    Rekey {
        public_hex: Vec<u8>,
        install: Option<SessionKey>,
    },
}

struct Shared {
    security: Mutex<LinkSecurity>,
    retransmit: Mutex<RetransmitBuffer>,
    rekey: Mutex<RekeySchedule>,
}

/// Lock helper that shrugs off poisoning; endpoint state stays usable even
/// if a task panicked mid-update.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Spawn the reader/writer task pair for one stream and return its handles.
pub fn start<R, W>(reader: R, writer: W, config: EndpointConfig) -> Link
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let shared = Arc::new(Shared {
        security: Mutex::new(config.security),
        retransmit: Mutex::new(RetransmitBuffer::with_capacity(config.retransmit_capacity)),
        rekey: Mutex::new(RekeySchedule::with_thresholds(
            config.rekey_role,
            config.rekey_packet_threshold,
            config.rekey_time_threshold,
        )),
    });

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(config.queue_depth);
    let (app_tx, app_rx) = mpsc::channel::<Frame>(config.queue_depth);

    tokio::spawn(write_loop(writer, out_rx, Arc::clone(&shared)));
    tokio::spawn(read_loop(
        BufReader::new(reader),
        out_tx.clone(),
        app_tx,
        Arc::clone(&shared),
        config.replay_window,
    ));

    Link {
        sink: FrameSink { tx: out_tx },
        source: FrameSource { rx: app_rx },
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut out_rx: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
) {
    let mut seq: u32 = 0;

    while let Some(cmd) = out_rx.recv().await {
        let result = match cmd {
            Outbound::Data { ptype, payload } => {
                let encoded = {
                    let security = lock(&shared.security);
                    codec::encode(&security, ptype, seq, &payload)
                };
                match encoded {
                    Ok(frame) => {
                        lock(&shared.retransmit).insert(seq, frame.clone());
                        seq = seq.wrapping_add(1);
                        let write = write_frame(&mut writer, &frame).await;
                        if write.is_ok() {
                            if let Some(frame) = initiate_rekey_if_due(&shared, &mut seq) {
                                write_frame(&mut writer, &frame).await
                            } else {
                                Ok(())
                            }
                        } else {
                            write
                        }
                    }
                    Err(err) => {
                        warn!("frame encode failed: {err}");
                        Ok(())
                    }
                }
            }
            Outbound::Control { ptype, seq: ref_seq } => {
                let encoded = {
                    let security = lock(&shared.security);
                    codec::encode(&security, ptype, ref_seq, b"")
                };
                match encoded {
                    Ok(frame) => write_frame(&mut writer, &frame).await,
                    Err(err) => {
                        warn!("control encode failed: {err}");
                        Ok(())
                    }
                }
            }
            Outbound::Raw(frame) => write_frame(&mut writer, &frame).await,
            Outbound::Rekey {
                public_hex,
                install,
            } => {
                let encoded = {
                    let security = lock(&shared.security);
                    codec::encode(&security, PacketType::Rekey, seq, &public_hex)
                };
                seq = seq.wrapping_add(1);
                match encoded {
                    Ok(frame) => {
                        let write = write_frame(&mut writer, &frame).await;
                        // Only switch keys once our REKEY is on the wire,
                        // so the peer can still read it under the old key.
                        if write.is_ok() {
                            if let Some(key) = install {
                                if let Err(err) = lock(&shared.security).install(key) {
                                    warn!("rekey install failed: {err}");
                                }
                            }
                        }
                        write
                    }
                    Err(err) => {
                        warn!("rekey encode failed: {err}");
                        Ok(())
                    }
                }
            }
        };

        if let Err(err) = result {
            debug!("writer stopping: {err}");
            break;
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// When the schedule trips, stage an ephemeral key and encode the REKEY
/// frame inline so it follows the data frame that tripped it.
fn initiate_rekey_if_due(shared: &Shared, seq: &mut u32) -> Option<Vec<u8>> {
    let sealed = lock(&shared.security).is_sealed();
    if !sealed {
        return None;
    }
    let public = {
        let mut rekey = lock(&shared.rekey);
        if !rekey.record_send() {
            return None;
        }
        rekey.begin()
    };
    debug!("rekey threshold reached; sending REKEY");
    let public_hex = hex::encode(public).into_bytes();
    let encoded = {
        let security = lock(&shared.security);
        codec::encode(&security, PacketType::Rekey, *seq, &public_hex)
    };
    *seq = seq.wrapping_add(1);
    match encoded {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!("rekey encode failed: {err}");
            None
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    out_tx: mpsc::Sender<Outbound>,
    app_tx: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
    replay_window: u32,
) {
    let mut replay = ReplayWindow::with_window(replay_window);
    let mut nak_streak: u32 = 0;

    loop {
        let sealed = lock(&shared.security).is_sealed();
        let raw = match codec::read_wire(&mut reader, sealed).await {
            Ok(raw) => raw,
            Err(WireError::Incomplete) => {
                trace!("stream closed");
                break;
            }
            Err(err) => {
                debug!("reader stopping: {err}");
                break;
            }
        };

        let header_seq = raw.header.seq;
        let frame = {
            let security = lock(&shared.security);
            codec::open(raw, &security)
        };
        let frame = match frame {
            Ok(frame) => {
                nak_streak = 0;
                frame
            }
            Err(err) if err.is_recoverable() => {
                // The header's seq survives CRC failures; for AEAD auth
                // failures the last received header's seq is used.
                let seq = match err {
                    WireError::Crc { seq } => seq,
                    _ => header_seq,
                };
                nak_streak += 1;
                if nak_streak > MAX_NAK_STREAK {
                    warn!("corruption persisted past {MAX_NAK_STREAK} frames; disconnecting");
                    break;
                }
                debug!("corrupt frame (seq {seq}); sending NAK");
                if out_tx
                    .send(Outbound::Control {
                        ptype: PacketType::Nak,
                        seq,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
            Err(err) => {
                debug!("reader stopping: {err}");
                break;
            }
        };

        match frame.ptype {
            PacketType::Ack => {
                lock(&shared.retransmit).acknowledge(frame.seq);
            }
            PacketType::Nak => {
                let buffered = lock(&shared.retransmit).get(frame.seq).map(<[u8]>::to_vec);
                match buffered {
                    Some(bytes) => {
                        debug!("NAK for seq {}; retransmitting", frame.seq);
                        if out_tx.send(Outbound::Raw(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => debug!("NAK for unbuffered seq {}", frame.seq),
                }
            }
            PacketType::Rekey => {
                if handle_rekey(&shared, &out_tx, &frame.payload).await.is_err() {
                    break;
                }
            }
            PacketType::Game | PacketType::Chat | PacketType::OppGrid | PacketType::Error => {
                if !replay.accept(frame.seq) {
                    trace!("replayed seq {} dropped", frame.seq);
                    continue;
                }
                if frame.ptype.wants_ack()
                    && out_tx
                        .send(Outbound::Control {
                            ptype: PacketType::Ack,
                            seq: frame.seq,
                        })
                        .await
                        .is_err()
                {
                    break;
                }
                if app_tx.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Handle an inbound REKEY: complete our own exchange or answer the peer's.
async fn handle_rekey(
    shared: &Shared,
    out_tx: &mpsc::Sender<Outbound>,
    payload: &[u8],
) -> Result<(), EndpointClosed> {
    let peer_public = match std::str::from_utf8(payload)
        .ok()
        .and_then(|hex_text| hex::decode(hex_text.trim()).ok())
    {
        Some(bytes) => bytes,
        None => {
            warn!("REKEY payload was not hex; ignoring");
            return Ok(());
        }
    };

    let in_progress = lock(&shared.rekey).in_progress();
    if in_progress {
        // We initiated; the peer answered. Derive and switch immediately:
        // the peer already rotated when it sent this frame.
        let key = lock(&shared.rekey).complete(&peer_public);
        match key {
            Ok(key) => {
                if let Err(err) = lock(&shared.security).install(key) {
                    warn!("rekey install failed: {err}");
                } else {
                    debug!("rekey complete");
                }
            }
            Err(err) => warn!("rekey completion failed: {err}"),
        }
        Ok(())
    } else {
        // Peer-initiated: answer with our public key, then rotate once the
        // response frame is on the wire.
        let response = lock(&shared.rekey).respond(&peer_public);
        match response {
            Ok((public, key)) => out_tx
                .send(Outbound::Rekey {
                    public_hex: hex::encode(public).into_bytes(),
                    install: Some(key),
                })
                .await
                .map_err(|_| EndpointClosed),
            Err(err) => {
                warn!("rekey response failed: {err}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    use crate::wire::codec::{decode, encode, open, read_wire, RawBody};

    const TICK: Duration = Duration::from_millis(200);

    fn plain_link(io: tokio::io::DuplexStream) -> Link {
        let (r, w) = tokio::io::split(io);
        start(r, w, EndpointConfig::default())
    }

    /// Read one frame off a raw stream and return its exact wire bytes.
    async fn read_raw_bytes<R: AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
        let raw = read_wire(reader, false).await.unwrap();
        let mut bytes = raw.header.to_bytes().to_vec();
        match &raw.body {
            RawBody::Plain { crc, payload } => {
                bytes.extend_from_slice(&crc.to_be_bytes());
                bytes.extend_from_slice(payload);
            }
            RawBody::Sealed { .. } => unreachable!("plain-mode helper"),
        }
        bytes
    }

    #[tokio::test]
    async fn test_data_frames_flow_and_sequence() {
        let (a_io, b_io) = tokio::io::duplex(4096);
        let a = plain_link(a_io);
        let mut b = plain_link(b_io);

        a.sink.send(PacketType::Game, b"one".to_vec()).await.unwrap();
        a.sink.send(PacketType::Chat, b"two".to_vec()).await.unwrap();

        let first = b.source.recv().await.unwrap();
        assert_eq!((first.ptype, first.seq, first.payload.as_slice()),
                   (PacketType::Game, 0, &b"one"[..]));
        let second = b.source.recv().await.unwrap();
        assert_eq!((second.ptype, second.seq, second.payload.as_slice()),
                   (PacketType::Chat, 1, &b"two"[..]));
    }

    #[tokio::test]
    async fn test_accepted_data_frame_is_acked() {
        let (a_io, mut raw) = tokio::io::duplex(4096);
        let mut a = plain_link(a_io);

        let frame = encode(&LinkSecurity::Plain, PacketType::Game, 5, b"hello").unwrap();
        raw.write_all(&frame).await.unwrap();

        let delivered = a.source.recv().await.unwrap();
        assert_eq!(delivered.seq, 5);

        let ack = decode(&mut raw, &LinkSecurity::Plain).await.unwrap();
        assert_eq!(ack.ptype, PacketType::Ack);
        assert_eq!(ack.seq, 5);
        assert!(ack.payload.is_empty());
    }

    #[tokio::test]
    async fn test_nak_triggers_verbatim_retransmit() {
        let (a_io, mut raw) = tokio::io::duplex(4096);
        let a = plain_link(a_io);

        a.sink
            .send(PacketType::Game, b"precious".to_vec())
            .await
            .unwrap();
        let original = read_raw_bytes(&mut raw).await;

        let nak = encode(&LinkSecurity::Plain, PacketType::Nak, 0, b"").unwrap();
        raw.write_all(&nak).await.unwrap();

        let resent = read_raw_bytes(&mut raw).await;
        assert_eq!(resent, original);
    }

    #[tokio::test]
    async fn test_ack_prunes_retransmit_ring() {
        let (a_io, mut raw) = tokio::io::duplex(4096);
        let a = plain_link(a_io);

        a.sink.send(PacketType::Game, b"data".to_vec()).await.unwrap();
        let _original = read_raw_bytes(&mut raw).await;

        let ack = encode(&LinkSecurity::Plain, PacketType::Ack, 0, b"").unwrap();
        raw.write_all(&ack).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A NAK for the pruned seq must no longer produce a retransmission.
        let nak = encode(&LinkSecurity::Plain, PacketType::Nak, 0, b"").unwrap();
        raw.write_all(&nak).await.unwrap();

        let mut byte = [0u8; 1];
        assert!(timeout(TICK, raw.read_exact(&mut byte)).await.is_err());
    }

    #[tokio::test]
    async fn test_replayed_seq_delivered_once() {
        let (a_io, mut raw) = tokio::io::duplex(4096);
        let mut a = plain_link(a_io);

        let frame = encode(&LinkSecurity::Plain, PacketType::Game, 10, b"dup").unwrap();
        raw.write_all(&frame).await.unwrap();
        raw.write_all(&frame).await.unwrap();
        let follow = encode(&LinkSecurity::Plain, PacketType::Game, 11, b"next").unwrap();
        raw.write_all(&follow).await.unwrap();

        assert_eq!(a.source.recv().await.unwrap().seq, 10);
        // The duplicate is silently dropped: the next delivery is seq 11.
        assert_eq!(a.source.recv().await.unwrap().seq, 11);
    }

    #[tokio::test]
    async fn test_out_of_order_within_window_accepted() {
        let (a_io, mut raw) = tokio::io::duplex(4096);
        let mut a = plain_link(a_io);

        for seq in [1u32, 3, 2, 4] {
            let frame = encode(&LinkSecurity::Plain, PacketType::Game, seq, b"x").unwrap();
            raw.write_all(&frame).await.unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(a.source.recv().await.unwrap().seq);
        }
        assert_eq!(seen, vec![1, 3, 2, 4]);
    }

    #[tokio::test]
    async fn test_corrupt_frame_naks_and_stream_continues() {
        let (a_io, mut raw) = tokio::io::duplex(4096);
        let mut a = plain_link(a_io);

        let mut corrupt = encode(&LinkSecurity::Plain, PacketType::Game, 9, b"garbled").unwrap();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        raw.write_all(&corrupt).await.unwrap();

        let nak = decode(&mut raw, &LinkSecurity::Plain).await.unwrap();
        assert_eq!(nak.ptype, PacketType::Nak);
        assert_eq!(nak.seq, 9);

        let good = encode(&LinkSecurity::Plain, PacketType::Game, 9, b"garbled").unwrap();
        raw.write_all(&good).await.unwrap();
        assert_eq!(a.source.recv().await.unwrap().payload, b"garbled");
    }

    #[tokio::test]
    async fn test_eof_closes_source() {
        let (a_io, raw) = tokio::io::duplex(4096);
        let mut a = plain_link(a_io);
        drop(raw);
        assert!(a.source.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rekey_exchange_keeps_traffic_flowing() {
        let key = || SessionKey::new(vec![9u8; 32]).unwrap();
        let (server_io, client_io) = tokio::io::duplex(16384);

        let (r, w) = tokio::io::split(server_io);
        let server = start(
            r,
            w,
            EndpointConfig {
                security: LinkSecurity::sealed(key()).unwrap(),
                rekey_role: RekeyRole::Initiator,
                rekey_packet_threshold: 3,
                ..EndpointConfig::default()
            },
        );

        let (r, w) = tokio::io::split(client_io);
        let mut client = start(
            r,
            w,
            EndpointConfig {
                security: LinkSecurity::sealed(key()).unwrap(),
                rekey_role: RekeyRole::Responder,
                ..EndpointConfig::default()
            },
        );

        // Enough traffic to trip the threshold, then more on the new key.
        for i in 0..8u8 {
            server
                .sink
                .send(PacketType::Game, vec![b'm', i])
                .await
                .unwrap();
            let frame = timeout(TICK, client.source.recv())
                .await
                .expect("frame within deadline")
                .expect("stream alive");
            assert_eq!(frame.payload, vec![b'm', i]);
        }

        // And the reverse direction still authenticates post-rotation.
        client
            .sink
            .send(PacketType::Chat, b"still here".to_vec())
            .await
            .unwrap();
        let mut server = server;
        let frame = timeout(TICK, server.source.recv()).await.unwrap().unwrap();
        assert_eq!(frame.payload, b"still here");
    }

    #[tokio::test]
    async fn test_open_after_encode_is_symmetric_for_control() {
        // ACK/NAK frames have empty payloads in both modes.
        let sealed = LinkSecurity::sealed(SessionKey::new(vec![1u8; 16]).unwrap()).unwrap();
        for security in [LinkSecurity::Plain, sealed] {
            let bytes = encode(&security, PacketType::Nak, 77, b"").unwrap();
            let raw = read_wire(&mut bytes.as_slice(), security.is_sealed())
                .await
                .unwrap();
            let frame = open(raw, &security).unwrap();
            assert_eq!(frame.seq, 77);
            assert!(frame.payload.is_empty());
        }
    }
}
