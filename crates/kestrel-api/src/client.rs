//! REST client over `reqwest`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use kestrel_core::{ChatTurn, Message, Session, SessionSummary, Todo, TodoDraft};

use crate::errors::ApiError;

/// Backend health report.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    /// Overall status, e.g. `"healthy"`.
    pub status: String,
    /// Service name.
    #[serde(default)]
    pub service: String,
}

/// Typed client for the backend's `/api` REST surface.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace_path: Option<&'a str>,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct UpdateTodosBody<'a> {
    todos: &'a [TodoDraft],
}

#[derive(Serialize)]
struct ExecuteToolBody<'a> {
    tool_name: &'a str,
    args: &'a Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

impl ApiClient {
    /// Create a client for the given base URL (including the `/api` prefix,
    /// no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .user_agent("kestrel/0.1")
            .build()
            .unwrap_or_default();
        Self::with_client(http, base_url)
    }

    /// Create a client with a caller-supplied `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ─── Sessions ────────────────────────────────────────────────────────

    /// `POST /sessions` — create a session.
    pub async fn create_session(
        &self,
        name: Option<&str>,
        workspace_path: Option<&str>,
    ) -> Result<Session, ApiError> {
        let url = format!("{}/sessions", self.base_url);
        debug!(%url, "create session");
        let response = self
            .http
            .post(&url)
            .json(&CreateSessionBody {
                name,
                workspace_path,
            })
            .send()
            .await?;
        decode(response).await
    }

    /// `GET /sessions` — list session summaries.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let url = format!("{}/sessions", self.base_url);
        let response = self.http.get(&url).send().await?;
        decode(response).await
    }

    /// `GET /sessions/{id}` — full snapshot including messages and todos.
    pub async fn get_session(&self, session_id: &str) -> Result<Session, ApiError> {
        let url = format!("{}/sessions/{session_id}", self.base_url);
        debug!(%session_id, "fetch session snapshot");
        let response = self.http.get(&url).send().await?;
        decode(response).await
    }

    /// `DELETE /sessions/{id}`.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/sessions/{session_id}", self.base_url);
        let response = self.http.delete(&url).send().await?;
        expect_success(response).await
    }

    // ─── Chat ────────────────────────────────────────────────────────────

    /// `POST /sessions/{id}/chat` — send a message, receive the turn result.
    pub async fn chat(&self, session_id: &str, message: &str) -> Result<ChatTurn, ApiError> {
        let url = format!("{}/sessions/{session_id}/chat", self.base_url);
        debug!(%session_id, "chat command");
        let response = self
            .http
            .post(&url)
            .json(&ChatBody { message })
            .send()
            .await?;
        decode(response).await
    }

    /// `GET /sessions/{id}/messages`.
    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = format!("{}/sessions/{session_id}/messages", self.base_url);
        let response = self.http.get(&url).send().await?;
        decode(response).await
    }

    // ─── Todos ───────────────────────────────────────────────────────────

    /// `GET /sessions/{id}/todos`.
    pub async fn get_todos(&self, session_id: &str) -> Result<Vec<Todo>, ApiError> {
        let url = format!("{}/sessions/{session_id}/todos", self.base_url);
        let response = self.http.get(&url).send().await?;
        decode(response).await
    }

    /// `PUT /sessions/{id}/todos` — wholesale replacement. Returns the
    /// backend's authoritative list.
    pub async fn put_todos(
        &self,
        session_id: &str,
        todos: &[TodoDraft],
    ) -> Result<Vec<Todo>, ApiError> {
        let url = format!("{}/sessions/{session_id}/todos", self.base_url);
        debug!(%session_id, count = todos.len(), "replace todos");
        let response = self
            .http
            .put(&url)
            .json(&UpdateTodosBody { todos })
            .send()
            .await?;
        decode(response).await
    }

    // ─── Tools ───────────────────────────────────────────────────────────

    /// `POST /sessions/{id}/tools/execute` — run a tool directly.
    pub async fn execute_tool(
        &self,
        session_id: &str,
        tool_name: &str,
        args: &Value,
    ) -> Result<Value, ApiError> {
        let url = format!("{}/sessions/{session_id}/tools/execute", self.base_url);
        debug!(%session_id, %tool_name, "execute tool");
        let response = self
            .http
            .post(&url)
            .json(&ExecuteToolBody { tool_name, args })
            .send()
            .await?;
        decode(response).await
    }

    // ─── Health ──────────────────────────────────────────────────────────

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).send().await?;
        decode(response).await
    }
}

/// Decode a JSON body on success, or extract `{detail}` on failure.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    Err(status_error(status.as_u16(), response).await)
}

/// Like [`decode`] but for endpoints with no meaningful body.
async fn expect_success(response: reqwest::Response) -> Result<(), ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(status_error(status.as_u16(), response).await)
}

async fn status_error(status: u16, response: reqwest::Response) -> ApiError {
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.detail)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body
            }
        });
    ApiError::Status { status, detail }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
