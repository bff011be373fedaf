//! Request handlers for sync operations.

mod chunk;
mod events;
mod websocket;

pub use chunk::*;
pub use events::*;
pub use websocket::*;
