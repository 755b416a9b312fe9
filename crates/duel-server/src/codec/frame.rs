use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// FIN set, opcode text.
const TEXT_FRAME: u8 = 0x81;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,

    #[error("frame payload of {len} bytes exceeds limit of {max}")]
    TooLarge { len: u64, max: usize },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// XOR `payload` in place with the 4-byte masking key.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Decode one frame and return its payload as text.
///
/// A clean EOF before the first header byte is `Closed`; any other short read
/// surfaces as `Io`.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    if let Err(e) = reader.read_exact(&mut head).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::Closed,
            _ => FrameError::Io(e),
        });
    }

    let fin = head[0] & 0x80 != 0;
    let opcode = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    let len = match head[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
        n => n as u64,
    };
    trace!(fin, opcode, masked, len, "frame header");

    if len > max_len as u64 {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(String::from_utf8(payload)?)
}

/// Encode `payload` as a single unmasked server-to-client text frame.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let len = bytes.len();
    let mut out = Vec::with_capacity(len + 10);
    out.push(TEXT_FRAME);
    if len <= 125 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(bytes);
    out
}

pub async fn write_frame<W>(writer: &mut W, payload: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}
