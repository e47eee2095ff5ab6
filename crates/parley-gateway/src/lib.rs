//! HTTP and WebSocket transport.
//!
//! A thin axum layer over the session manager: REST routes for session and
//! catalogue CRUD, plus a per-session WebSocket endpoint that relays push-hub
//! frames with keep-alive pings and read/write deadlines.

/// REST routes and error mapping.
pub mod server;
/// WebSocket upgrade and pump loops.
pub mod ws;

pub use server::build_router;
