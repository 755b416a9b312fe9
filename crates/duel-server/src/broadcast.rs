//! Fan-out of server messages to a match group.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use duel_core::{MatchId, ServerMessage};

use crate::codec::encode_frame;
use crate::registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug, Clone)]
pub struct MatchBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl MatchBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `message` for every member of the match group except `exclude`.
    ///
    /// The message is serialized and framed once. Delivery is best-effort: a
    /// member whose queue is full or whose writer has gone away is skipped
    /// without affecting the rest. Returns how many members got the frame.
    pub fn broadcast(
        &self,
        match_id: MatchId,
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.registry.members(match_id);
        if members.is_empty() {
            return 0;
        }

        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(match_id, error = %e, "failed to serialize broadcast");
                return 0;
            }
        };
        let frame: Arc<[u8]> = encode_frame(&json).into();

        let mut delivered = 0;
        for (id, frames) in members {
            if Some(id) == exclude {
                continue;
            }
            match frames.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(match_id, conn = %id, "outbound queue full, dropping frame")
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(match_id, conn = %id, "writer gone, skipping")
                }
            }
        }
        debug!(match_id, delivered, "broadcast");
        delivered
    }
}
