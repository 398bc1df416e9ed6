//! HTTP and WebSocket surface

pub mod http;
pub mod websocket;

pub use http::{run, serve, AppState};
