//! WebSocket stream of sync notifications.
//!
//! Clients connect to `/ws` and receive a message after every applied sync.
//! A client may narrow the stream to some mapped types with `subscribe`.

mod manager;
mod protocol;

pub use manager::{ConnectionManager, WsSink};
pub use protocol::*;
