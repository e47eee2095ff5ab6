//! Session state, persistence and live push.
//!
//! The session manager owns every in-memory session, serializes mutations
//! through per-session locks, drives the dispatch loop (join notices, call
//! history, task emission) and consumes the result stream back from the
//! agent workers. Snapshots go to the bus KV store after each mutation;
//! subscribers get `message`/`history` events through the push hub.
//!
//! # Main types
//!
//! - [`SessionManager`] — Owner of all session state and the dispatch loop.
//! - [`SessionStore`] — JSON snapshot persistence in the bus KV store.
//! - [`PushHub`] — Per-session fan-out with backpressure-drop.

/// Per-session event fan-out.
pub mod hub;
/// The session manager.
pub mod manager;
/// Snapshot persistence.
pub mod persistence;
/// Session state and serializable views.
pub mod state;

pub use hub::{PushFrame, PushHub, EVENT_HISTORY, EVENT_MESSAGE};
pub use manager::{MessageStats, SessionManager};
pub use persistence::SessionStore;
pub use state::{SessionData, SessionState, SessionSummary};
