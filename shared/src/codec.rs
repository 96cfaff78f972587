//! Length-prefixed bincode frames.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   bincode payload  |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! A stream socket gives per-connection in-order delivery, which is the only
//! ordering guarantee the protocol relies on.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(value)?;
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge {
            size: payload.len() as u32,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(payload)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(bincode::deserialize(payload)?)
}

/// Reads one frame and decodes it. Returns `ConnectionClosed` on clean EOF.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(CodecError::ConnectionClosed);
        }
        Err(e) => return Err(CodecError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::ConnectionClosed
        } else {
            CodecError::Io(e)
        }
    })?;

    decode(&payload)
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(value)?;
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}
