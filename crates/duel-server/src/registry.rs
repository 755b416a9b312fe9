//! Live duel connections and their match groups.
//!
//! Two sharded maps: connection id -> binding, and match id -> member set.
//! Locks are always taken group first, then connection, and a socket write
//! never happens while either is held.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use duel_core::{MatchId, UserId};

/// Queue of encoded frames drained by a connection's writer task.
pub type FrameSender = mpsc::Sender<Arc<[u8]>>;

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The user and match a connection announced with `auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub user_id: UserId,
    pub match_id: MatchId,
}

#[derive(Debug)]
struct ConnectionEntry {
    frames: FrameSender,
    binding: Option<Binding>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    groups: DashMap<MatchId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly upgraded connection. It joins no group until `bind`.
    pub fn register(&self, id: ConnectionId, frames: FrameSender) {
        self.connections.insert(
            id,
            ConnectionEntry {
                frames,
                binding: None,
            },
        );
    }

    /// Bind a connection to `(user_id, match_id)` and add it to that match's group.
    ///
    /// Binding twice to the same match does not duplicate membership; binding to
    /// another match moves the connection. Returns `false` if the connection is
    /// not (or no longer) registered.
    pub fn bind(&self, id: ConnectionId, user_id: UserId, match_id: MatchId) -> bool {
        let previous = match self.connections.get(&id) {
            Some(conn) => conn.binding,
            None => return false,
        };
        if let Some(prev) = previous {
            if prev.match_id != match_id {
                self.leave_group(prev.match_id, id);
            }
        }

        let mut group = self.groups.entry(match_id).or_default();
        let Some(mut conn) = self.connections.get_mut(&id) else {
            // Unbound concurrently; don't leave an empty group behind.
            drop(group);
            self.groups.remove_if(&match_id, |_, set| set.is_empty());
            return false;
        };
        conn.binding = Some(Binding { user_id, match_id });
        group.insert(id);
        true
    }

    /// Forget a connection. Returns its last binding.
    ///
    /// Only the first call for a given id gets `Some`; later or concurrent
    /// calls are no-ops.
    pub fn unbind(&self, id: ConnectionId) -> Option<Binding> {
        let (_, entry) = self.connections.remove(&id)?;
        if let Some(binding) = entry.binding {
            self.leave_group(binding.match_id, id);
        }
        entry.binding
    }

    pub fn binding(&self, id: ConnectionId) -> Option<Binding> {
        self.connections.get(&id).and_then(|c| c.binding)
    }

    /// Snapshot of a match group's members and their frame queues.
    pub fn members(&self, match_id: MatchId) -> Vec<(ConnectionId, FrameSender)> {
        let Some(group) = self.groups.get(&match_id) else {
            return Vec::new();
        };
        group
            .iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|conn| (*id, conn.frames.clone()))
            })
            .collect()
    }

    pub fn group_size(&self, match_id: MatchId) -> usize {
        self.groups.get(&match_id).map(|g| g.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn leave_group(&self, match_id: MatchId, id: ConnectionId) {
        if let Some(mut set) = self.groups.get_mut(&match_id) {
            set.remove(&id);
        }
        self.groups.remove_if(&match_id, |_, set| set.is_empty());
    }
}
