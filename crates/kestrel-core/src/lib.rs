//! # kestrel-core
//!
//! Shared vocabulary for the kestrel client crates:
//!
//! - **Session model**: [`Session`], [`Message`], [`Todo`] and their role /
//!   status enums, mirroring the backend's wire format
//! - **Chat turns**: [`ChatTurn`] — the result of one chat command, shared by
//!   the REST response and the `response` push event
//! - **Logging**: [`logging::init_subscriber`] for one-time tracing setup

#![deny(unsafe_code)]

pub mod logging;
pub mod session;

pub use session::{
    ChatTurn, Message, MessageRole, Session, SessionSummary, Todo, TodoDraft, TodoStatus,
    ToolCall, TurnMessage,
};
