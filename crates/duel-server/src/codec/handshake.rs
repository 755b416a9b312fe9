use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the request line plus headers.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("connection closed before the upgrade request completed")]
    Closed,

    #[error("upgrade request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("upgrade request has no Sec-WebSocket-Key header")]
    MissingKey,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The complete 101 response, blank line included.
pub fn handshake_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Read an upgrade request up to its blank line and return the client key.
///
/// Header names are compared case-insensitively. Nothing past the blank line
/// is consumed, so the same reader can go on to decode frames.
pub async fn read_handshake<R>(reader: &mut R) -> Result<String, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut key = None;
    let mut total = 0usize;
    let mut line = String::new();

    loop {
        line.clear();
        // One byte of slack so an over-long request is detectable.
        let budget = (MAX_REQUEST_BYTES - total + 1) as u64;
        let n = (&mut *reader).take(budget).read_line(&mut line).await?;
        if n == 0 {
            return Err(HandshakeError::Closed);
        }
        total += n;
        if total > MAX_REQUEST_BYTES {
            return Err(HandshakeError::TooLarge(MAX_REQUEST_BYTES));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':')
            && name.trim().eq_ignore_ascii_case("sec-websocket-key")
        {
            key = Some(value.trim().to_string());
        }
    }

    key.filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)
}
