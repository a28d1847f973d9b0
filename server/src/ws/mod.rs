//! Real-time private messaging over WebSocket.
//!
//! - `handler`: admission (session check, then upgrade)
//! - `actor`: one reader loop plus one writer task per connection
//! - `hub`: registry of live connections, one per identity
//! - `router`: persist, then deliver to recipient and confirm to sender
//! - `protocol`: the JSON `{type, payload}` envelope

pub mod actor;
pub mod handler;
pub mod hub;
pub mod protocol;
pub mod router;

pub use hub::{Hub, HubError, WorkerHandle};
