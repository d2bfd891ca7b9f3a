//! shrd wire format — length-prefixed JSON frames and chunked file I/O.
//!
//! Every message on the wire is `[4-byte big-endian length N][N bytes of
//! UTF-8 JSON]`. The JSON header carries `version`, an integer `type`
//! tag, and a `payload` object. File bytes are never embedded in the
//! header: a FILE_CHUNK frame declares `size`, and exactly that many raw
//! bytes follow it on the stream.
//!
//! These tags and payload keys ARE the protocol. Changing anything here
//! is a breaking change against every deployed peer.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::device::{DirListing, FileInfo};

/// Wire format version, carried in every frame header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Sender-side chunk size for file bodies. Receivers must not assume it:
/// the FILE_CHUNK header declares the actual size of each body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Hard cap on the JSON header. Anything larger is a protocol error.
pub const MAX_HEADER_BYTES: usize = 10 * 1024 * 1024;

// ── Message type tags ─────────────────────────────────────────────────────────

pub const TAG_HELLO: u32 = 1;
pub const TAG_HELLO_ACK: u32 = 2;
pub const TAG_FILE_OFFER: u32 = 10;
pub const TAG_FILE_ACCEPT: u32 = 11;
pub const TAG_FILE_REJECT: u32 = 12;
pub const TAG_FILE_CHUNK: u32 = 13;
pub const TAG_FILE_COMPLETE: u32 = 14;
pub const TAG_FILE_ERROR: u32 = 15;
pub const TAG_LIST_DIR_REQUEST: u32 = 20;
pub const TAG_LIST_DIR_RESPONSE: u32 = 21;
pub const TAG_FILE_DOWNLOAD_REQUEST: u32 = 22;
pub const TAG_FILE_DOWNLOAD_START: u32 = 23;
pub const TAG_PING: u32 = 30;
pub const TAG_PONG: u32 = 31;
pub const TAG_ERROR: u32 = 99;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame header of {0} bytes exceeds the 10 MiB limit")]
    HeaderTooLarge(usize),

    #[error("stream ended mid-frame")]
    Truncated,

    #[error("unsupported protocol version {0}")]
    Version(u32),

    #[error("unknown message type tag {0}")]
    UnknownType(u32),

    #[error("expected FILE_CHUNK, got tag {0}")]
    UnexpectedMessage(u32),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An UnexpectedEof inside a frame or chunk body is a protocol-level
/// truncation, not a plain I/O failure.
fn truncated(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::Truncated
    } else {
        WireError::Io(e)
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// A decoded frame header, before payload validation.
///
/// Kept separate from [`Message`] so a dispatcher can skip frames with
/// tags it does not know without tearing the session down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub version: u32,
    #[serde(rename = "type")]
    pub type_tag: u32,
    /// A frame without a payload key means an empty payload.
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Frame {
    /// Serialize to the on-wire byte form, length prefix included.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let header = serde_json::to_vec(self)?;
        let mut buf = BytesMut::with_capacity(4 + header.len());
        buf.put_u32(header.len() as u32);
        buf.put_slice(&header);
        Ok(buf.freeze())
    }
}

/// Read one frame.
///
/// `Ok(None)` means the peer closed the connection cleanly at a frame
/// boundary. EOF anywhere after the first header byte is
/// [`WireError::Truncated`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let n = reader.read(&mut len_buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < 4 {
        reader.read_exact(&mut len_buf[n..]).await.map_err(truncated)?;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_HEADER_BYTES {
        return Err(WireError::HeaderTooLarge(len));
    }

    let mut header = vec![0u8; len];
    reader.read_exact(&mut header).await.map_err(truncated)?;
    Ok(Some(serde_json::from_slice(&header)?))
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Handshake payload: who is on the other end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub device_id: String,
    pub device_name: String,
}

/// One statically typed variant per protocol message.
///
/// The integer tag travels on the wire; payloads are validated on
/// decode. A tag nobody here knows surfaces as
/// [`WireError::UnknownType`] so dispatchers can choose to skip it.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Identity),
    HelloAck(Identity),
    FileOffer { file: FileInfo },
    FileAccept,
    FileReject { reason: String },
    /// Declares that exactly `size` raw bytes follow this frame.
    FileChunk { size: u64 },
    FileComplete { path: String },
    FileError { error: String },
    ListDirRequest { path: String },
    ListDirResponse(DirListing),
    FileDownloadRequest { path: String },
    FileDownloadStart { file: FileInfo },
    Ping,
    Pong,
    Error { error: String },
}

#[derive(Serialize, Deserialize)]
struct FilePayload {
    file: FileInfo,
}

#[derive(Serialize, Deserialize)]
struct PathPayload {
    #[serde(default)]
    path: String,
}

#[derive(Serialize, Deserialize)]
struct SizePayload {
    size: u64,
}

#[derive(Serialize, Deserialize)]
struct ReasonPayload {
    reason: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    error: String,
}

impl Message {
    pub fn type_tag(&self) -> u32 {
        match self {
            Message::Hello(_) => TAG_HELLO,
            Message::HelloAck(_) => TAG_HELLO_ACK,
            Message::FileOffer { .. } => TAG_FILE_OFFER,
            Message::FileAccept => TAG_FILE_ACCEPT,
            Message::FileReject { .. } => TAG_FILE_REJECT,
            Message::FileChunk { .. } => TAG_FILE_CHUNK,
            Message::FileComplete { .. } => TAG_FILE_COMPLETE,
            Message::FileError { .. } => TAG_FILE_ERROR,
            Message::ListDirRequest { .. } => TAG_LIST_DIR_REQUEST,
            Message::ListDirResponse(_) => TAG_LIST_DIR_RESPONSE,
            Message::FileDownloadRequest { .. } => TAG_FILE_DOWNLOAD_REQUEST,
            Message::FileDownloadStart { .. } => TAG_FILE_DOWNLOAD_START,
            Message::Ping => TAG_PING,
            Message::Pong => TAG_PONG,
            Message::Error { .. } => TAG_ERROR,
        }
    }

    pub fn to_frame(&self) -> Result<Frame, WireError> {
        let payload = match self {
            Message::Hello(identity) | Message::HelloAck(identity) => {
                serde_json::to_value(identity)?
            }
            Message::FileOffer { file } | Message::FileDownloadStart { file } => {
                json!({ "file": file })
            }
            Message::FileAccept | Message::Ping | Message::Pong => json!({}),
            Message::FileReject { reason } => json!({ "reason": reason }),
            Message::FileChunk { size } => json!({ "size": size }),
            Message::FileComplete { path }
            | Message::ListDirRequest { path }
            | Message::FileDownloadRequest { path } => json!({ "path": path }),
            Message::FileError { error } | Message::Error { error } => {
                json!({ "error": error })
            }
            Message::ListDirResponse(listing) => serde_json::to_value(listing)?,
        };
        Ok(Frame {
            version: PROTOCOL_VERSION,
            type_tag: self.type_tag(),
            payload,
        })
    }

    pub fn from_frame(frame: &Frame) -> Result<Message, WireError> {
        if frame.version != PROTOCOL_VERSION {
            return Err(WireError::Version(frame.version));
        }

        fn payload<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T, WireError> {
            Ok(serde_json::from_value(frame.payload.clone())?)
        }

        let message = match frame.type_tag {
            TAG_HELLO => Message::Hello(payload(frame)?),
            TAG_HELLO_ACK => Message::HelloAck(payload(frame)?),
            TAG_FILE_OFFER => {
                let p: FilePayload = payload(frame)?;
                Message::FileOffer { file: p.file }
            }
            TAG_FILE_ACCEPT => Message::FileAccept,
            TAG_FILE_REJECT => {
                let p: ReasonPayload = payload(frame)?;
                Message::FileReject { reason: p.reason }
            }
            TAG_FILE_CHUNK => {
                let p: SizePayload = payload(frame)?;
                Message::FileChunk { size: p.size }
            }
            TAG_FILE_COMPLETE => {
                let p: PathPayload = payload(frame)?;
                Message::FileComplete { path: p.path }
            }
            TAG_FILE_ERROR => {
                let p: ErrorPayload = payload(frame)?;
                Message::FileError { error: p.error }
            }
            TAG_LIST_DIR_REQUEST => {
                let p: PathPayload = payload(frame)?;
                Message::ListDirRequest { path: p.path }
            }
            TAG_LIST_DIR_RESPONSE => Message::ListDirResponse(payload(frame)?),
            TAG_FILE_DOWNLOAD_REQUEST => {
                let p: PathPayload = payload(frame)?;
                Message::FileDownloadRequest { path: p.path }
            }
            TAG_FILE_DOWNLOAD_START => {
                let p: FilePayload = payload(frame)?;
                Message::FileDownloadStart { file: p.file }
            }
            TAG_PING => Message::Ping,
            TAG_PONG => Message::Pong,
            TAG_ERROR => {
                let p: ErrorPayload = payload(frame)?;
                Message::Error { error: p.error }
            }
            other => return Err(WireError::UnknownType(other)),
        };
        Ok(message)
    }
}

/// Read and validate one message. `Ok(None)` = peer closed cleanly.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, WireError>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        Some(frame) => Ok(Some(Message::from_frame(&frame)?)),
        None => Ok(None),
    }
}

/// Encode and write one message.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.to_frame()?.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ── Chunked file streaming ────────────────────────────────────────────────────

/// Stream a file as FILE_CHUNK frames. Returns the hex SHA-256 of the
/// bytes sent. `progress` is called with (bytes sent, total) after each
/// chunk.
///
/// Header and body are written back-to-back by the single caller that
/// owns this writer; nothing else may interleave writes on the session.
pub async fn send_file<W>(
    writer: &mut W,
    path: &Path,
    mut progress: impl FnMut(u64, u64),
) -> Result<String, WireError>
where
    W: AsyncWrite + Unpin,
{
    use sha2::{Digest, Sha256};

    let total = tokio::fs::metadata(path).await?.len();
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);

        write_message(writer, &Message::FileChunk { size: n as u64 }).await?;
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;

        sent += n as u64;
        progress(sent, total);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Receive exactly `expected_size` bytes of FILE_CHUNK frames into
/// `dest`. Returns the hex SHA-256 of the bytes received. `progress` is
/// called with (bytes received, expected) after each chunk.
pub async fn receive_file<R>(
    reader: &mut R,
    dest: &Path,
    expected_size: u64,
    mut progress: impl FnMut(u64, u64),
) -> Result<String, WireError>
where
    R: AsyncRead + Unpin,
{
    use sha2::{Digest, Sha256};

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut received: u64 = 0;

    while received < expected_size {
        let size = match read_message(reader).await? {
            Some(Message::FileChunk { size }) => size,
            Some(other) => return Err(WireError::UnexpectedMessage(other.type_tag())),
            None => return Err(WireError::Truncated),
        };

        let mut chunk = vec![0u8; size as usize];
        reader.read_exact(&mut chunk).await.map_err(truncated)?;

        hasher.update(&chunk);
        file.write_all(&chunk).await?;

        received += size;
        progress(received, expected_size);
    }

    file.flush().await?;
    Ok(hex::encode(hasher.finalize()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
