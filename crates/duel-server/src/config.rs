//! Server configuration.
//!
//! Every field can be overridden through an environment variable; anything
//! missing or unparseable falls back to its default.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface both listeners bind to (`HOST`)
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP match API port (`PORT`)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Duel socket port (`WS_PORT`)
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// sqlx connection string (`DATABASE_URL`)
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// SQLite pool size (`DB_MAX_CONNECTIONS`)
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Concurrent duel sockets before new ones are refused (`MAX_CONNECTIONS`)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Frames buffered per connection before broadcasts to it are dropped (`OUTBOUND_QUEUE`)
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Largest accepted inbound payload in bytes (`MAX_MESSAGE_SIZE`)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Time a client gets to finish the upgrade request (`HANDSHAKE_TIMEOUT_SECS`)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            max_connections: default_max_connections(),
            outbound_queue: default_outbound_queue(),
            max_message_size: default_max_message_size(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl ServerConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        override_parsed(&lookup, "PORT", &mut config.http_port);
        override_parsed(&lookup, "WS_PORT", &mut config.ws_port);
        override_parsed(&lookup, "DB_MAX_CONNECTIONS", &mut config.db_max_connections);
        override_parsed(&lookup, "MAX_CONNECTIONS", &mut config.max_connections);
        override_parsed(&lookup, "OUTBOUND_QUEUE", &mut config.outbound_queue);
        override_parsed(&lookup, "MAX_MESSAGE_SIZE", &mut config.max_message_size);
        override_parsed(
            &lookup,
            "HANDSHAKE_TIMEOUT_SECS",
            &mut config.handshake_timeout_secs,
        );
        config
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable setting"),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_ws_port() -> u16 {
    8765
}

fn default_database_url() -> String {
    "sqlite:duel.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_max_connections() -> u32 {
    1000
}

fn default_outbound_queue() -> usize {
    64
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_handshake_timeout() -> u64 {
    10
}
