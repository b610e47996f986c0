//! Length-prefixed framing for stream transports (TCP, Unix sockets).
//!
//! Wire shape: a 4-byte big-endian unsigned length, followed by that many
//! bytes of a canonical JSON serialization of `EncodedMessage`. A
//! zero-length frame is illegal; frames over `MAX_FRAME_BYTES` are
//! rejected without reading the body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;
use crate::message::EncodedMessage;

/// Maximum frame size: 64 MiB (spec.md §3, open question resolved in
/// SPEC_FULL.md). Shared by both the read and write paths so the limit
/// can never drift between them.
pub const MAX_FRAME_BYTES: u64 = 64 * 1024 * 1024;

const LEN_PREFIX_BYTES: usize = 4;

/// Read one length-prefixed frame from `stream` and decode it as an
/// `EncodedMessage`. Does not take a lock; callers on shared streams must
/// serialize their own reads (only one reader task per channel in this
/// SDK, so this is never actually contended).
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<EncodedMessage, FrameError> {
    let mut len_buf = [0u8; LEN_PREFIX_BYTES];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::TruncatedFrame);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as u64;
    if len == 0 {
        return Err(FrameError::ZeroLengthFrame);
    }
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; len as usize];
    match stream.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::TruncatedFrame);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let encoded: EncodedMessage =
        serde_json::from_slice(&body).map_err(|e| FrameError::Codec(crate::error::CodecError::Deserialize {
            format: "json",
            source: Box::new(e),
        }))?;
    Ok(encoded)
}

/// Write `encoded` as a single length-prefixed frame to `stream`, as one
/// atomic write of length + body. Callers must guarantee mutual exclusion
/// on `stream` across concurrent writers (spec.md §4.1) — the socket
/// transport holds a writer-side mutex for exactly this reason.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    encoded: &EncodedMessage,
) -> Result<(), FrameError> {
    let body = serde_json::to_vec(encoded).map_err(|e| {
        FrameError::Codec(crate::error::CodecError::Serialize {
            format: "json",
            source: Box::new(e),
        })
    })?;
    if body.len() as u64 > MAX_FRAME_BYTES {
        return Err(FrameError::FrameTooLarge {
            size: body.len() as u64,
            limit: MAX_FRAME_BYTES,
        });
    }
    let len = body.len() as u32;
    let mut frame = Vec::with_capacity(LEN_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}
