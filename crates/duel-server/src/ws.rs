//! Duel socket: accept loop and per-connection handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use duel_core::protocol::timestamp;
use duel_core::{ClientMessage, ServerMessage};

use crate::codec::{self, FrameError};
use crate::registry::ConnectionId;
use crate::state::AppState;

/// Accept duel sockets forever, one task per connection.
///
/// Sockets beyond `max_connections` are closed right after accept.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "duel socket listening");
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        if !state.try_acquire_connection() {
            warn!(
                %peer,
                max = state.config.max_connections,
                "connection limit reached, refusing"
            );
            drop(stream);
            continue;
        }

        debug!(%peer, "accepted");
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(state.clone(), stream).await;
            state.release_connection();
        });
    }
}

/// Drive one connection from handshake to close.
pub async fn handle_connection<S>(state: Arc<AppState>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let key = match tokio::time::timeout(
        state.config.handshake_timeout(),
        codec::read_handshake(&mut reader),
    )
    .await
    {
        Ok(Ok(key)) => key,
        Ok(Err(e)) => {
            debug!(error = %e, "handshake failed");
            let _ = write_half.shutdown().await;
            return;
        }
        Err(_) => {
            debug!("handshake timed out");
            let _ = write_half.shutdown().await;
            return;
        }
    };
    let reply = codec::handshake_response(&codec::accept_key(&key));
    if let Err(e) = write_half.write_all(reply.as_bytes()).await {
        debug!(error = %e, "failed to send handshake response");
        return;
    }

    let id = ConnectionId::generate();
    let (frames, queue) = mpsc::channel(state.config.outbound_queue.max(1));
    state.registry.register(id, frames);
    let writer = tokio::spawn(write_loop(id, write_half, queue));
    info!(conn = %id, "duel connection opened");

    loop {
        match codec::read_frame(&mut reader, state.config.max_message_size).await {
            Ok(text) => dispatch(&state, id, &text),
            Err(FrameError::Closed) => break,
            Err(e) => {
                debug!(conn = %id, error = %e, "read failed, closing");
                break;
            }
        }
    }

    if let Some(binding) = state.registry.unbind(id) {
        state.broadcaster.broadcast(
            binding.match_id,
            &ServerMessage::PlayerLeft {
                user_id: binding.user_id,
                timestamp: timestamp(),
            },
            None,
        );
    }
    writer.abort();
    info!(conn = %id, "duel connection closed");
}

/// Route one inbound text frame.
///
/// Frames that are not a known client message are ignored without a reply.
pub fn dispatch(state: &AppState, id: ConnectionId, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            trace!(conn = %id, error = %e, "ignoring malformed message");
            return;
        }
    };

    match message {
        ClientMessage::Auth { user_id, match_id } => {
            if !state.registry.bind(id, user_id, match_id) {
                return;
            }
            debug!(conn = %id, user_id, match_id, "bound");
            state.broadcaster.broadcast(
                match_id,
                &ServerMessage::PlayerJoined {
                    user_id,
                    timestamp: timestamp(),
                },
                Some(id),
            );
        }
        ClientMessage::Answer { match_id, answer } => {
            let Some(binding) = state.registry.binding(id) else {
                debug!(conn = %id, "answer before auth, dropped");
                return;
            };
            state.broadcaster.broadcast(
                match_id,
                &ServerMessage::AnswerSubmitted {
                    user_id: binding.user_id,
                    answer,
                    timestamp: timestamp(),
                },
                Some(id),
            );
        }
        ClientMessage::Chat { match_id, message } => {
            let Some(binding) = state.registry.binding(id) else {
                debug!(conn = %id, "chat before auth, dropped");
                return;
            };
            state.broadcaster.broadcast(
                match_id,
                &ServerMessage::Chat {
                    user_id: binding.user_id,
                    message,
                    timestamp: timestamp(),
                },
                None,
            );
        }
    }
}

/// Drain a connection's queue onto the socket, in enqueue order.
async fn write_loop<S>(
    id: ConnectionId,
    mut sink: WriteHalf<S>,
    mut queue: mpsc::Receiver<Arc<[u8]>>,
)
where
    S: AsyncWrite,
{
    while let Some(frame) = queue.recv().await {
        if let Err(e) = sink.write_all(&frame).await {
            debug!(conn = %id, error = %e, "write failed");
            break;
        }
    }
    let _ = sink.shutdown().await;
}
