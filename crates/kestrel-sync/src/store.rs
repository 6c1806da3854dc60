//! Session state store.
//!
//! Merges three concurrent, unordered sources into one consistent view of
//! the active session: the REST snapshot fetched on selection, push events
//! arriving over the socket, and optimistic local mutations. The merged
//! result is exposed as an immutable [`Projection`] snapshot plus a `watch`
//! channel that ticks on every change.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use kestrel_api::ApiClient;
use kestrel_core::{Message, MessageRole, Todo, TodoDraft, TurnMessage};

use crate::connection::ConnectionManager;
use crate::errors::SyncError;
use crate::protocol::{ErrorFrame, ResponseFrame, event};

/// Immutable snapshot of the reconciled session view.
#[derive(Clone, Debug, Default)]
pub struct Projection {
    /// The selected session, if any.
    pub session_id: Option<String>,
    /// Conversation, ordered by creation time with arrival order breaking
    /// ties. Duplicate-free by message ID.
    pub messages: Vec<Message>,
    /// Current todo list.
    pub todos: Vec<Todo>,
    /// A snapshot fetch is in flight.
    pub loading: bool,
    /// Most recent command or push failure, cleared on the next selection.
    pub error: Option<String>,
    /// Live socket to the backend.
    pub connected: bool,
}

/// A message plus its arrival sequence number, the ordering tie-breaker.
struct OrderedMessage {
    seq: u64,
    message: Message,
}

#[derive(Default)]
struct ProjectionState {
    /// Bumped on every selection. Async completions from an older epoch are
    /// discarded instead of applied.
    epoch: u64,
    active: Option<String>,
    messages: Vec<OrderedMessage>,
    todos: Vec<Todo>,
    loading: bool,
    error: Option<String>,
    connected: bool,
    next_seq: u64,
}

/// The reconciliation engine.
///
/// All mutation goes through the store; readers take [`Projection`]
/// snapshots and re-read when [`SessionStore::subscribe`] ticks.
pub struct SessionStore {
    api: ApiClient,
    connection: Arc<ConnectionManager>,
    state: Mutex<ProjectionState>,
    changed: watch::Sender<u64>,
}

impl SessionStore {
    /// Build a store wired to `api` for commands and to `connection`'s
    /// dispatcher for push events.
    ///
    /// Push handlers hold a weak reference, so dropping the store (while the
    /// connection outlives it) detaches them cleanly.
    pub fn new(api: ApiClient, connection: Arc<ConnectionManager>) -> Arc<Self> {
        let (changed, _) = watch::channel(0);
        let store = Arc::new(Self {
            api,
            connection: Arc::clone(&connection),
            state: Mutex::new(ProjectionState::default()),
            changed,
        });

        let dispatcher = connection.dispatcher();

        let weak = Arc::downgrade(&store);
        let _ = dispatcher.on(event::CONNECTED, move |_| {
            if let Some(store) = weak.upgrade() {
                store.set_connected(true);
            }
        });

        let weak = Arc::downgrade(&store);
        let _ = dispatcher.on(event::DISCONNECTED, move |_| {
            if let Some(store) = weak.upgrade() {
                store.set_connected(false);
            }
        });

        let weak = Arc::downgrade(&store);
        let _ = dispatcher.on(event::RESPONSE, move |payload| {
            if let Some(store) = weak.upgrade() {
                store.on_response(payload);
            }
        });

        let weak = Arc::downgrade(&store);
        let _ = dispatcher.on(event::ERROR, move |payload| {
            if let Some(store) = weak.upgrade() {
                store.on_error(payload);
            }
        });

        store
    }

    // ─── Selection ───────────────────────────────────────────────────────

    /// Select `session_id` as the active session: reset the projection,
    /// bind the socket, and fetch the authoritative snapshot.
    ///
    /// Selecting while a previous selection's fetch is still in flight is
    /// safe; the superseded response is discarded on arrival no matter which
    /// order the responses come back in.
    pub async fn select(&self, session_id: &str) {
        let epoch = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.active = Some(session_id.to_string());
            state.messages.clear();
            state.todos.clear();
            state.error = None;
            state.loading = true;
            state.epoch
        };
        self.notify();

        self.connection.connect(session_id);

        match self.api.get_session(session_id).await {
            Ok(snapshot) => {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    debug!(session_id, "discarding superseded snapshot");
                    return;
                }
                if state.active.as_deref() != Some(snapshot.id.as_str()) {
                    debug!(snapshot_id = %snapshot.id, "discarding mismatched snapshot");
                    return;
                }
                for message in snapshot.messages {
                    insert_message(&mut state, message);
                }
                state.todos = snapshot.todos;
                state.loading = false;
                drop(state);
                self.notify();
            }
            Err(error) => {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    return;
                }
                state.error = Some(error.to_string());
                state.loading = false;
                drop(state);
                self.notify();
            }
        }
    }

    /// Deselect: close the socket and clear the projection.
    pub fn clear(&self) {
        self.connection.disconnect();
        {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.active = None;
            state.messages.clear();
            state.todos.clear();
            state.error = None;
            state.loading = false;
        }
        self.notify();
    }

    // ─── Commands ────────────────────────────────────────────────────────

    /// Send a chat message.
    ///
    /// The user's message appears in the projection immediately and is never
    /// rolled back: on failure it stays, with the failure recorded in
    /// [`Projection::error`], which is what actually happened from the
    /// user's point of view. The assistant's reply is merged when the
    /// command completes; if the same turn also arrived as a push event the
    /// second copy is suppressed by ID.
    pub async fn send_message(&self, content: &str) -> Result<(), SyncError> {
        let (epoch, session_id) = {
            let mut state = self.state.lock();
            let Some(session_id) = state.active.clone() else {
                return Err(SyncError::NoActiveSession);
            };
            let local_id = format!("local-{}", state.next_seq);
            let message = Message::local(local_id, MessageRole::User, content);
            insert_message(&mut state, message);
            (state.epoch, session_id)
        };
        self.notify();

        match self.api.chat(&session_id, content).await {
            Ok(turn) => {
                self.apply_turn(epoch, &turn.message);
                // Chat turns routinely rewrite the todo list server-side;
                // refresh it. The chat itself still succeeded, but a failed
                // refresh leaves a stale list visible, so it is recorded as
                // the session error rather than dropped.
                match self.api.get_todos(&session_id).await {
                    Ok(todos) => self.replace_todos(epoch, todos),
                    Err(error) => self.record_error(epoch, error.to_string()),
                }
                Ok(())
            }
            Err(error) => {
                self.record_error(epoch, error.to_string());
                Err(SyncError::Command(error))
            }
        }
    }

    /// Replace the todo list wholesale.
    ///
    /// The projection shows the drafts immediately (with placeholder IDs);
    /// the backend's echo, carrying authoritative IDs, replaces them when
    /// the command completes.
    pub async fn update_todos(&self, drafts: &[TodoDraft]) -> Result<Vec<Todo>, SyncError> {
        let (epoch, session_id) = {
            let mut state = self.state.lock();
            let Some(session_id) = state.active.clone() else {
                return Err(SyncError::NoActiveSession);
            };
            let mut optimistic = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let seq = state.next_seq;
                state.next_seq += 1;
                optimistic.push(Todo {
                    id: format!("local-{seq}"),
                    content: draft.content.clone(),
                    status: draft.status,
                });
            }
            state.todos = optimistic;
            (state.epoch, session_id)
        };
        self.notify();

        match self.api.put_todos(&session_id, drafts).await {
            Ok(todos) => {
                self.replace_todos(epoch, todos.clone());
                Ok(todos)
            }
            Err(error) => {
                self.record_error(epoch, error.to_string());
                Err(SyncError::Command(error))
            }
        }
    }

    /// Execute a tool against the active session.
    ///
    /// Prefers the socket when it is open (the result then arrives as a
    /// `tool_result` push event and `Ok(None)` is returned); falls back to
    /// REST otherwise and returns the result inline.
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        args: &Value,
    ) -> Result<Option<Value>, SyncError> {
        let session_id = self
            .state
            .lock()
            .active
            .clone()
            .ok_or(SyncError::NoActiveSession)?;

        if self.connection.is_connected() {
            let sent = self.connection.send(&crate::protocol::ClientFrame::Tool {
                tool_name: tool_name.to_string(),
                args: args.clone(),
            });
            if sent {
                return Ok(None);
            }
        }
        let result = self.api.execute_tool(&session_id, tool_name, args).await?;
        Ok(Some(result))
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    /// Snapshot the current projection.
    pub fn projection(&self) -> Projection {
        let state = self.state.lock();
        Projection {
            session_id: state.active.clone(),
            messages: state
                .messages
                .iter()
                .map(|ordered| ordered.message.clone())
                .collect(),
            todos: state.todos.clone(),
            loading: state.loading,
            error: state.error.clone(),
            connected: state.connected,
        }
    }

    /// A receiver that ticks after every projection change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    // ─── Push event handlers ─────────────────────────────────────────────

    fn on_response(&self, payload: &Value) {
        let frame: ResponseFrame = match serde_json::from_value(payload.clone()) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping malformed response event");
                return;
            }
        };
        // Push events carry no session marker; they are trusted only while
        // the connection is still bound to the session we have active.
        let bound = self.connection.session_id();
        let epoch = {
            let state = self.state.lock();
            if state.active.is_none() || state.active != bound {
                debug!("dropping response event for inactive session");
                return;
            }
            state.epoch
        };
        self.apply_turn(epoch, &frame.data.message);
    }

    fn on_error(&self, payload: &Value) {
        let frame: ErrorFrame = serde_json::from_value(payload.clone()).unwrap_or(ErrorFrame {
            message: String::new(),
        });
        let message = if frame.message.is_empty() {
            "backend reported an error".to_string()
        } else {
            frame.message
        };
        let epoch = self.state.lock().epoch;
        self.record_error(epoch, message);
    }

    fn set_connected(&self, connected: bool) {
        {
            let mut state = self.state.lock();
            if state.connected == connected {
                return;
            }
            state.connected = connected;
        }
        self.notify();
    }

    // ─── Merge internals ─────────────────────────────────────────────────

    /// Merge an assistant reply into the projection, unless the projection
    /// has moved to a different epoch since the command started.
    fn apply_turn(&self, epoch: u64, reply: &TurnMessage) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!("discarding superseded turn");
            return;
        }
        let message = match reply {
            TurnMessage::Full(message) => message.clone(),
            // Bare-text replies carry no identity; synthesize one. Such a
            // reply can be double-merged only if the backend sends the same
            // text both inline and as a push event without IDs, which the
            // wire contract rules out.
            TurnMessage::Text(text) => {
                let local_id = format!("local-{}", state.next_seq);
                Message::local(local_id, MessageRole::Assistant, text.clone())
            }
        };
        insert_message(&mut state, message);
        drop(state);
        self.notify();
    }

    fn replace_todos(&self, epoch: u64, todos: Vec<Todo>) {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.todos = todos;
        }
        self.notify();
    }

    fn record_error(&self, epoch: u64, message: String) {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.error = Some(message);
        }
        self.notify();
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version += 1);
    }
}

/// Insert `message` into the ordered projection, skipping duplicates by ID.
///
/// Position is the last slot whose `created_at` is not after the new
/// message's. Sequence numbers are monotonic, so equal timestamps resolve to
/// arrival order and re-merging the same set of messages in any interleaving
/// yields the same final order.
fn insert_message(state: &mut ProjectionState, message: Message) {
    if state
        .messages
        .iter()
        .any(|ordered| ordered.message.id == message.id)
    {
        return;
    }
    let seq = state.next_seq;
    state.next_seq += 1;
    let at = state
        .messages
        .partition_point(|ordered| ordered.message.created_at <= message.created_at);
    state.messages.insert(at, OrderedMessage { seq, message });
    debug_assert!(is_ordered(&state.messages));
}

fn is_ordered(messages: &[OrderedMessage]) -> bool {
    messages.windows(2).all(|pair| {
        let (a, b) = (&pair[0], &pair[1]);
        a.message.created_at < b.message.created_at
            || (a.message.created_at == b.message.created_at && a.seq < b.seq)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
