//! Voice dialog server
//!
//! WebSocket and HTTP endpoints in front of the session layer.

pub mod http;
pub mod protocol;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use state::AppState;
pub use websocket::WebSocketHandler;
