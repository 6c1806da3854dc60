//! # kestrel-sync
//!
//! Real-time session synchronization for the kestrel client.
//!
//! Three cooperating components keep one consistent, ordered view of a
//! session that is fed by three concurrent, unordered sources — a REST
//! snapshot, push events over an unreliable WebSocket, and optimistic local
//! edits:
//!
//! - [`ConnectionManager`]: zero-or-one WebSocket per active session, with
//!   transparent linear-backoff reconnection
//! - [`EventDispatcher`]: per-connection publish/subscribe registry keyed by
//!   event type
//! - [`SessionStore`]: the reconciliation engine — merges snapshots, push
//!   events, and optimistic mutations into a single ordered, duplicate-free
//!   projection

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod protocol;
pub mod store;

pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState};
pub use dispatcher::{EventDispatcher, HandlerId};
pub use errors::SyncError;
pub use protocol::ClientFrame;
pub use store::{Projection, SessionStore};
