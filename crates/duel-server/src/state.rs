use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use sqlx::SqlitePool;

use crate::broadcast::MatchBroadcaster;
use crate::config::ServerConfig;
use crate::db::SqliteStore;
use crate::duel::DuelCoordinator;
use crate::registry::ConnectionRegistry;

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub db: SqlitePool,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: MatchBroadcaster,
    pub duel: DuelCoordinator,
    /// Open duel sockets, counted from accept to close.
    pub connection_count: AtomicU32,
}

impl AppState {
    pub fn new(config: ServerConfig, db: SqlitePool) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = MatchBroadcaster::new(registry.clone());
        let duel = DuelCoordinator::new(
            Arc::new(SqliteStore::new(db.clone())),
            broadcaster.clone(),
        );
        Self {
            config,
            db,
            registry,
            broadcaster,
            duel,
            connection_count: AtomicU32::new(0),
        }
    }

    /// Reserve a connection slot. Fails once `max_connections` sockets are open.
    pub fn try_acquire_connection(&self) -> bool {
        let max = self.config.max_connections;
        self.connection_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn release_connection(&self) {
        self.connection_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn open_connections(&self) -> u32 {
        self.connection_count.load(Ordering::Acquire)
    }
}
