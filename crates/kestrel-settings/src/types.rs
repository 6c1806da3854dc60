//! Settings type definitions.

use serde::{Deserialize, Serialize};

/// Top-level settings for the kestrel client.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct KestrelSettings {
    /// Backend server location.
    pub server: ServerSettings,
    /// Persistent-connection behavior.
    pub connection: ConnectionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Where the backend lives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerSettings {
    /// Backend host.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// Use `https`/`wss` instead of plain `http`/`ws`.
    pub tls: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            tls: false,
        }
    }
}

impl ServerSettings {
    /// REST base URL including the `/api` prefix.
    pub fn http_base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}/api", self.host, self.port)
    }

    /// WebSocket base URL; the session ID is appended per connection.
    pub fn ws_base_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/api/ws", self.host, self.port)
    }
}

/// Reconnection tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ConnectionSettings {
    /// One backoff "time unit" in milliseconds. The Nth reconnect attempt
    /// waits `N * backoff_unit_ms`.
    pub backoff_unit_ms: u64,
    /// Reconnect attempts before giving up until the next explicit connect.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backoff_unit_ms: 1000,
            max_reconnect_attempts: 5,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LoggingSettings {
    /// Minimum level for stderr output (`error`..`trace`).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}
