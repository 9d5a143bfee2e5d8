//! Framed session transport over a reliable ordered stream.
//!
//! The session channel between a client and the server is a TCP stream
//! carrying length-delimited frames: a 4-byte little-endian length prefix
//! followed by a bincode-serialized [`Frame`]. The first frame a client
//! sends is its connection handshake; after that the stream carries
//! opaque command payloads produced by the message codec, interleaved
//! with keepalive pings so an idle but healthy connection is not torn
//! down by the read timeout.

use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Maximum allowed frame size. World snapshot payloads are the largest
/// expected frames; anything beyond this is treated as a corrupt stream.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// A peer is dropped after this long without any inbound frame. Keepalives
/// arrive well within the window, so expiry means the connection is dead.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between keepalive pings on an otherwise idle connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Queue handle for payloads bound for one remote peer.
pub type PayloadSender = mpsc::UnboundedSender<Vec<u8>>;

/// One unit of the framed session stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Connection handshake: the connecting side's claimed identity, as a
    /// UUID string. `None` when the peer has no identity to present.
    Hello { client_id: Option<String> },
    /// Opaque command envelope payload produced by the message codec.
    Command(Vec<u8>),
    /// Keepalive, ignored beyond resetting the idle timeout.
    Ping,
}

/// Writes one length-delimited frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let body = bincode::serialize(frame)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes", body.len()),
        ));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Reads one length-delimited frame.
///
/// Returns `UnexpectedEof` when the stream closes before or during a
/// frame, and `InvalidData` for an oversized length prefix or a body that
/// does not deserialize.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Drains queued command payloads onto the stream, interleaving keepalive
/// pings. Runs until the queue closes or a write fails; either way the
/// write half is dropped and the peer's read side observes the close.
pub async fn write_session<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            payload = outgoing.recv() => match payload {
                Some(payload) => {
                    if write_frame(&mut writer, &Frame::Command(payload)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = keepalive.tick() => {
                if write_frame(&mut writer, &Frame::Ping).await.is_err() {
                    break;
                }
            }
        }
    }
}
