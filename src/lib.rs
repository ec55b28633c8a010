//! Deskrelay - multi-tenant support desk relay.
//!
//! Bridges tenant Telegram bots to agent desk clients: inbound updates
//! are classified, attached to contacts and chat sessions, persisted, and
//! fanned out over the WebSocket gateway; agent replies travel back the
//! other way.

pub mod bot;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod model;
pub mod router;
pub mod store;

// Re-export Args for the binary
pub use cli::Args;
