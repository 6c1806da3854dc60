//! Session, message, and todo types.
//!
//! These mirror the backend's JSON wire format. Timestamps arrive either as
//! RFC 3339 with an offset or as naive ISO 8601 (the backend serializes
//! `datetime.isoformat()` without a zone); [`timestamp`] accepts both and
//! normalizes to UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Roles and statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Role of a conversation message. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// A human turn.
    User,
    /// An assistant turn.
    Assistant,
    /// System prompt / instruction.
    System,
    /// Tool output fed back to the model.
    Tool,
}

/// Status of a todo item. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not started.
    Pending,
    /// Currently being worked on.
    InProgress,
    /// Done.
    Completed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// A tool call recorded on an assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique tool call ID.
    #[serde(default)]
    pub id: String,
    /// Tool name.
    #[serde(default)]
    pub name: String,
    /// Argument blob — shape varies per tool, kept opaque.
    #[serde(default)]
    pub arguments: Value,
}

/// One turn in a session's conversation.
///
/// Messages are append-only from the client's perspective: once accepted
/// into a projection they are never mutated or removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within a session.
    pub id: String,
    /// Who produced the turn.
    pub role: MessageRole,
    /// Plain text; fenced code blocks are a rendering concern.
    pub content: String,
    /// Tool calls issued during this turn, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Creation time, normalized to UTC.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a locally-synthesized message stamped with the current time.
    pub fn local(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            tool_calls: None,
            created_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Todos
// ─────────────────────────────────────────────────────────────────────────────

/// One task in a session's todo list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    /// Backend-assigned ID.
    pub id: String,
    /// Task description.
    pub content: String,
    /// Current status.
    pub status: TodoStatus,
}

/// A todo as submitted to the backend — no ID yet.
///
/// The backend has no stable merge key for todos across optimistic and
/// confirmed versions, so the whole list is always replaced wholesale and
/// drafts never carry an identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TodoDraft {
    /// Task description.
    pub content: String,
    /// Requested status.
    pub status: TodoStatus,
}

impl From<&Todo> for TodoDraft {
    fn from(todo: &Todo) -> Self {
        Self {
            content: todo.content.clone(),
            status: todo.status,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Full session snapshot: identity, metadata, messages, and todos.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque stable identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Workspace directory on the backend host, if bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    /// Creation time.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last update time. Absent on freshly-created sessions.
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Conversation history, ordered by the backend.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Current todo list.
    #[serde(default)]
    pub todos: Vec<Todo>,
}

/// Session list entry — counts instead of full content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Opaque stable identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Workspace directory, if bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    /// Creation time.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last update time.
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Number of messages in the session.
    #[serde(default)]
    pub message_count: usize,
    /// Number of todos in the session.
    #[serde(default)]
    pub todo_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat turns
// ─────────────────────────────────────────────────────────────────────────────

/// The assistant's reply inside a [`ChatTurn`].
///
/// Deployed backends reply with a plain string; richer deployments return a
/// full [`Message`] object carrying a backend-assigned ID. Duplicate
/// suppression on merge only applies when an ID is present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnMessage {
    /// Full message object with backend identity.
    Full(Message),
    /// Bare reply text.
    Text(String),
}

impl TurnMessage {
    /// Reply text regardless of representation.
    pub fn content(&self) -> &str {
        match self {
            Self::Full(message) => &message.content,
            Self::Text(text) => text,
        }
    }

    /// Backend-assigned message ID, when one exists.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Full(message) => Some(&message.id),
            Self::Text(_) => None,
        }
    }
}

/// Result of one chat command — returned by `POST .../chat` and carried by
/// the `response` push event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// The assistant's reply.
    pub message: TurnMessage,
    /// Raw results of tools executed during the turn.
    #[serde(default)]
    pub tool_results: Vec<Value>,
    /// Agent loop iterations consumed.
    #[serde(default)]
    pub iterations: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamp (de)serialization
// ─────────────────────────────────────────────────────────────────────────────

/// Serde helpers for backend timestamps.
///
/// Accepts RFC 3339 with an offset, or naive ISO 8601 interpreted as UTC.
/// Serializes as RFC 3339.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        // Naive `isoformat()` output, e.g. "2025-08-25T12:34:56.789012"
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Deserialize a required timestamp.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// Serialize a required timestamp.
    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    /// Optional-timestamp variant for `#[serde(with = "timestamp::option")]`.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        /// Deserialize an optional timestamp; `null` and absent both map to `None`.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw {
                None => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
            }
        }

        /// Serialize an optional timestamp.
        pub fn serialize<S>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serde_snake_case() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
        let role: MessageRole = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, MessageRole::Tool);
    }

    #[test]
    fn todo_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&TodoStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        let status: TodoStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, TodoStatus::Completed);
    }

    #[test]
    fn message_deserializes_naive_timestamp() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "role": "user",
            "content": "hello",
            "tool_calls": null,
            "created_at": "2025-08-25T12:34:56.789012",
        }))
        .unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.role, MessageRole::User);
        assert!(msg.tool_calls.is_none());
        assert_eq!(msg.created_at.timezone(), Utc);
    }

    #[test]
    fn message_deserializes_rfc3339_timestamp() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m2",
            "role": "assistant",
            "content": "hi",
            "created_at": "2025-08-25T12:34:56+02:00",
        }))
        .unwrap();
        assert_eq!(msg.created_at.to_rfc3339(), "2025-08-25T10:34:56+00:00");
    }

    #[test]
    fn message_rejects_garbage_timestamp() {
        let result: Result<Message, _> = serde_json::from_value(json!({
            "id": "m3",
            "role": "user",
            "content": "x",
            "created_at": "yesterday",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn message_local_stamps_now() {
        let before = Utc::now();
        let msg = Message::local("local-1", MessageRole::User, "fix bug");
        assert!(msg.created_at >= before);
        assert_eq!(msg.content, "fix bug");
    }

    #[test]
    fn session_defaults_for_missing_collections() {
        let session: Session = serde_json::from_value(json!({
            "id": "s1",
            "name": "New Session",
            "created_at": "2025-08-25T00:00:00",
        }))
        .unwrap();
        assert!(session.messages.is_empty());
        assert!(session.todos.is_empty());
        assert!(session.updated_at.is_none());
    }

    #[test]
    fn session_full_snapshot_roundtrip() {
        let session: Session = serde_json::from_value(json!({
            "id": "s1",
            "name": "demo",
            "workspace_path": "/tmp/work",
            "created_at": "2025-08-25T00:00:00",
            "updated_at": "2025-08-25T01:00:00",
            "messages": [
                {"id": "m1", "role": "user", "content": "hi", "created_at": "2025-08-25T00:00:01"},
                {"id": "m2", "role": "assistant", "content": "hello", "created_at": "2025-08-25T00:00:02"}
            ],
            "todos": [
                {"id": "t1", "content": "write tests", "status": "pending"}
            ],
        }))
        .unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.todos[0].status, TodoStatus::Pending);
    }

    #[test]
    fn turn_message_text_variant() {
        let turn: ChatTurn = serde_json::from_value(json!({
            "message": "Fixed.",
            "tool_results": [],
            "iterations": 1,
        }))
        .unwrap();
        assert_eq!(turn.message.content(), "Fixed.");
        assert_eq!(turn.message.id(), None);
        assert_eq!(turn.iterations, 1);
    }

    #[test]
    fn turn_message_full_variant() {
        let turn: ChatTurn = serde_json::from_value(json!({
            "message": {
                "id": "m9",
                "role": "assistant",
                "content": "Done.",
                "created_at": "2025-08-25T00:00:03",
            },
            "tool_results": [{"tool": "bash", "result": "ok"}],
            "iterations": 2,
        }))
        .unwrap();
        assert_eq!(turn.message.id(), Some("m9"));
        assert_eq!(turn.message.content(), "Done.");
        assert_eq!(turn.tool_results.len(), 1);
    }

    #[test]
    fn chat_turn_defaults() {
        let turn: ChatTurn = serde_json::from_value(json!({"message": "ok"})).unwrap();
        assert!(turn.tool_results.is_empty());
        assert_eq!(turn.iterations, 0);
    }

    #[test]
    fn tool_call_opaque_arguments() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "c1",
            "name": "bash",
            "arguments": {"command": "ls -la"},
        }))
        .unwrap();
        assert_eq!(call.name, "bash");
        assert_eq!(call.arguments["command"], "ls -la");
    }

    #[test]
    fn todo_draft_from_todo_drops_id() {
        let todo = Todo {
            id: "t1".into(),
            content: "ship it".into(),
            status: TodoStatus::InProgress,
        };
        let draft = TodoDraft::from(&todo);
        assert_eq!(draft.content, "ship it");
        assert_eq!(draft.status, TodoStatus::InProgress);
        let json = serde_json::to_value(&draft).unwrap();
        assert!(json.get("id").is_none());
    }
}
