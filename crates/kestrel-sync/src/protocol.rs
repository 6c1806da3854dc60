//! WebSocket wire frames.
//!
//! Every frame is a JSON object with a required `type` discriminator. The
//! connection manager forwards inbound frames to the dispatcher under that
//! tag without interpreting the rest; the typed structs here are what
//! consumers parse payloads into.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kestrel_core::ChatTurn;

/// Event-type tags seen by dispatcher subscribers.
///
/// `connected` and `disconnected` are synthetic — emitted locally by the
/// connection manager on open/close, never sent by the backend.
pub mod event {
    /// Synthetic: the socket opened.
    pub const CONNECTED: &str = "connected";
    /// Synthetic: the socket closed.
    pub const DISCONNECTED: &str = "disconnected";
    /// An assistant turn completed.
    pub const RESPONSE: &str = "response";
    /// A directly-executed tool finished.
    pub const TOOL_RESULT: &str = "tool_result";
    /// The backend reported a failure.
    pub const ERROR: &str = "error";
}

/// Outbound frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send a chat message over the socket.
    Chat {
        /// Message text.
        message: String,
    },
    /// Execute a tool; the result arrives as a `tool_result` push event.
    Tool {
        /// Tool name.
        tool_name: String,
        /// Tool arguments.
        args: Value,
    },
}

/// Payload of a `response` push event.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ResponseFrame {
    /// The completed turn.
    pub data: ChatTurn,
}

/// Payload of a `tool_result` push event.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ToolResultFrame {
    /// Which tool ran.
    #[serde(default)]
    pub tool: String,
    /// Raw tool output.
    #[serde(default)]
    pub data: Value,
}

/// Payload of an `error` push event.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ErrorFrame {
    /// Human-readable failure description.
    #[serde(default)]
    pub message: String,
}
