//! Gateway module - WebSocket server that connects agent desk clients to
//! the conversation router.

pub mod hub;
pub mod protocol;
pub mod server;
