//! Dashboard surface: HTTP API, WebSocket observer channel, and server
//! assembly.

pub mod api;
pub mod server;
pub mod ws;
