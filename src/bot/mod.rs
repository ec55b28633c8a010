//! Bot platform boundary: inbound update envelope and outbound transport.

pub mod classifier;
pub mod registry;

use crate::model::{ChannelId, TenantId};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Tenant identity a bot connection resolves an update to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantBinding {
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
}

/// Payload of an inbound contact message, reduced to the shapes the
/// classifier understands. Anything else arrives as `Unsupported`.
#[derive(Debug, Clone)]
pub enum InboundPayload {
    Text(String),
    Photo { file_id: String },
    Document { file_id: String },
    Voice { file_id: String },
    Unsupported,
}

/// A contact message received on a tenant bot connection.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform-assigned identity of the receiving bot.
    pub bot_user_id: u64,
    /// Contact chat handle.
    pub handle: String,
    pub display_name: String,
    pub sent_at: DateTime<Utc>,
    pub payload: InboundPayload,
}

/// An inline-button callback received on a tenant bot connection.
#[derive(Debug, Clone)]
pub struct InboundCallback {
    pub bot_user_id: u64,
    /// Originating chat handle.
    pub handle: String,
    pub callback_id: String,
    /// Message carrying the inline keyboard, for clearing the buttons.
    pub menu_message_id: Option<i32>,
    pub data: Option<String>,
}

/// One raw update from the bot platform.
#[derive(Debug, Clone)]
pub enum InboundUpdate {
    Message(InboundMessage),
    Callback(InboundCallback),
}

impl InboundUpdate {
    pub fn bot_user_id(&self) -> u64 {
        match self {
            InboundUpdate::Message(m) => m.bot_user_id,
            InboundUpdate::Callback(c) => c.bot_user_id,
        }
    }

    pub fn handle(&self) -> &str {
        match self {
            InboundUpdate::Message(m) => &m.handle,
            InboundUpdate::Callback(c) => &c.handle,
        }
    }
}

/// One inline button on an outbound menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub label: String,
    /// Opaque callback data, round-tripped by the platform.
    pub data: String,
}

/// Outbound side of the bot platform, keyed by tenant. Implemented by the
/// live connection registry and mocked in router tests.
#[async_trait::async_trait]
pub trait BotTransport: Send + Sync {
    /// Look up the tenant owning a bot identity. `None` drops the update
    /// as unknown-tenant.
    fn resolve_tenant(&self, bot_user_id: u64) -> Option<TenantBinding>;

    /// Number of live bot connections, for health reporting.
    fn connection_count(&self) -> usize;

    async fn send_text(&self, tenant_id: TenantId, handle: &str, text: &str) -> Result<()>;

    async fn send_menu(
        &self,
        tenant_id: TenantId,
        handle: &str,
        text: &str,
        buttons: Vec<MenuButton>,
    ) -> Result<()>;

    async fn answer_callback(&self, tenant_id: TenantId, callback_id: &str) -> Result<()>;

    async fn clear_buttons(&self, tenant_id: TenantId, handle: &str, message_id: i32)
        -> Result<()>;

    /// Resolve a platform file reference to a durable download URL via the
    /// file API. Bounded by the configured call timeout; no internal retry.
    async fn resolve_file_url(&self, tenant_id: TenantId, file_id: &str) -> Result<String>;
}
