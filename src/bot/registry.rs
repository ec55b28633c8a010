//! Bot connection registry: one live Telegram connection per tenant.
//!
//! Owns the process-wide map of tenant bot connections. Populated at
//! startup from the store; entries are added/removed only through
//! [`BotRegistry::register`] / [`BotRegistry::remove`]. Each connection
//! runs its own dispatcher task; one tenant failing to connect never
//! blocks the others.

use super::{
    BotTransport, InboundCallback, InboundMessage, InboundPayload, InboundUpdate, MenuButton,
    TenantBinding,
};
use crate::config::{resolve_token, TelegramConfig};
use crate::model::{Channel, TenantId};
use crate::store::Store;
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    payloads::SendMessageSetters,
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, Update},
    Bot,
};
use tokio::sync::{mpsc, oneshot};

/// One live tenant bot connection.
struct BotConnection {
    channel: Channel,
    bot: Bot,
    token: String,
    bot_user_id: u64,
    shutdown_tx: oneshot::Sender<()>,
}

/// Registry of live connections, keyed by tenant id.
pub struct BotRegistry {
    api_base: String,
    call_timeout: Duration,
    connections: DashMap<TenantId, BotConnection>,
    by_bot_id: DashMap<u64, TenantId>,
    /// Inbound updates flow to the router over this bounded queue.
    update_tx: mpsc::Sender<InboundUpdate>,
}

/// Per-dispatcher tag injected into the teloxide handler tree.
#[derive(Clone)]
struct BotTag {
    bot_user_id: u64,
}

impl BotRegistry {
    pub fn new(config: &TelegramConfig, update_tx: mpsc::Sender<InboundUpdate>) -> Arc<Self> {
        Arc::new(Self {
            api_base: config.api_base.clone(),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            connections: DashMap::new(),
            by_bot_id: DashMap::new(),
            update_tx,
        })
    }

    /// Load every provisioned channel from the store and open its
    /// connection. A failure on one channel is logged and skipped.
    pub async fn start_all(&self, store: &dyn Store) -> Result<()> {
        let channels = store.list_channels().await?;
        if channels.is_empty() {
            eprintln!("[registry] No channels provisioned");
        }

        for channel in channels {
            let tenant_id = channel.tenant_id;
            if let Err(e) = self.register(channel).await {
                eprintln!("[registry] Failed to connect tenant {}: {}", tenant_id, e);
            }
        }

        Ok(())
    }

    /// Open the connection for one channel and add it to the registry.
    pub async fn register(&self, channel: Channel) -> Result<()> {
        let token = resolve_token(&channel.bot_token)
            .ok_or_else(|| anyhow!("bot token not configured for tenant {}", channel.tenant_id))?;

        let bot = Bot::new(token.clone());
        let me = tokio::time::timeout(self.call_timeout, bot.get_me())
            .await
            .map_err(|_| anyhow!("getMe timed out"))??;
        let bot_user_id = me.user.id.0;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(on_message))
            .branch(Update::filter_callback_query().endpoint(on_callback));

        let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
            .dependencies(dptree::deps![
                self.update_tx.clone(),
                BotTag { bot_user_id }
            ])
            .build();

        let shutdown_token = dispatcher.shutdown_token();
        let tenant_id = channel.tenant_id;

        tokio::spawn(async move {
            tokio::select! {
                _ = dispatcher.dispatch() => {}
                _ = &mut shutdown_rx => {
                    shutdown_token.shutdown().ok();
                }
            }
            eprintln!("[registry] Receive loop for tenant {} stopped", tenant_id);
        });

        self.by_bot_id.insert(bot_user_id, channel.tenant_id);
        self.connections.insert(
            channel.tenant_id,
            BotConnection {
                channel,
                bot,
                token,
                bot_user_id,
                shutdown_tx,
            },
        );

        eprintln!(
            "[registry] Connected tenant {} (bot id {})",
            tenant_id, bot_user_id
        );
        Ok(())
    }

    /// Drop a tenant's connection, signalling its receive loop. In-flight
    /// update processing completes; no new updates are accepted.
    pub fn remove(&self, tenant_id: TenantId) {
        if let Some((_, conn)) = self.connections.remove(&tenant_id) {
            self.by_bot_id.remove(&conn.bot_user_id);
            let _ = conn.shutdown_tx.send(());
            eprintln!("[registry] Removed tenant {}", tenant_id);
        }
    }

    /// Signal every receive loop.
    pub fn shutdown(&self) {
        let tenants: Vec<TenantId> = self.connections.iter().map(|r| *r.key()).collect();
        for tenant_id in tenants {
            self.remove(tenant_id);
        }
    }

    /// Clone out the Bot handle and token for a tenant. Cloning avoids
    /// holding a map ref across an await.
    fn bot_for(&self, tenant_id: TenantId) -> Result<(Bot, String)> {
        let conn = self
            .connections
            .get(&tenant_id)
            .ok_or_else(|| anyhow!("no bot connection for tenant {}", tenant_id))?;
        Ok((conn.bot.clone(), conn.token.clone()))
    }

    fn parse_chat(handle: &str) -> Result<ChatId> {
        Ok(ChatId(handle.parse::<i64>()?))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, teloxide::RequestError>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| anyhow!("bot API call timed out"))?
            .map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl BotTransport for BotRegistry {
    fn resolve_tenant(&self, bot_user_id: u64) -> Option<TenantBinding> {
        let tenant_id = *self.by_bot_id.get(&bot_user_id)?;
        let conn = self.connections.get(&tenant_id)?;
        Some(TenantBinding {
            tenant_id,
            channel_id: conn.channel.id,
        })
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }

    async fn send_text(&self, tenant_id: TenantId, handle: &str, text: &str) -> Result<()> {
        let (bot, _) = self.bot_for(tenant_id)?;
        let chat_id = Self::parse_chat(handle)?;
        let text = text.to_string();
        self.bounded(async move { bot.send_message(chat_id, text).await })
            .await?;
        Ok(())
    }

    async fn send_menu(
        &self,
        tenant_id: TenantId,
        handle: &str,
        text: &str,
        buttons: Vec<MenuButton>,
    ) -> Result<()> {
        let (bot, _) = self.bot_for(tenant_id)?;
        let chat_id = Self::parse_chat(handle)?;

        let rows: Vec<Vec<InlineKeyboardButton>> = buttons
            .into_iter()
            .map(|b| vec![InlineKeyboardButton::callback(b.label, b.data)])
            .collect();
        let keyboard = InlineKeyboardMarkup::new(rows);

        let text = text.to_string();
        self.bounded(async move {
            bot.send_message(chat_id, text)
                .reply_markup(keyboard)
                .await
        })
        .await?;
        Ok(())
    }

    async fn answer_callback(&self, tenant_id: TenantId, callback_id: &str) -> Result<()> {
        let (bot, _) = self.bot_for(tenant_id)?;
        let callback_id = callback_id.to_string();
        self.bounded(async move { bot.answer_callback_query(callback_id).await })
            .await?;
        Ok(())
    }

    async fn clear_buttons(
        &self,
        tenant_id: TenantId,
        handle: &str,
        message_id: i32,
    ) -> Result<()> {
        let (bot, _) = self.bot_for(tenant_id)?;
        let chat_id = Self::parse_chat(handle)?;
        self.bounded(async move {
            bot.edit_message_reply_markup(chat_id, MessageId(message_id))
                .await
        })
        .await?;
        Ok(())
    }

    async fn resolve_file_url(&self, tenant_id: TenantId, file_id: &str) -> Result<String> {
        let (bot, token) = self.bot_for(tenant_id)?;
        let file_id = file_id.to_string();
        let file = self.bounded(async move { bot.get_file(file_id).await }).await?;
        Ok(format!(
            "{}/file/bot{}/{}",
            self.api_base, token, file.path
        ))
    }
}

/// Forward one contact message into the router queue.
async fn on_message(
    msg: Message,
    tx: mpsc::Sender<InboundUpdate>,
    tag: BotTag,
) -> ResponseResult<()> {
    let display_name = msg
        .from
        .as_ref()
        .map(|u| u.first_name.clone())
        .or_else(|| msg.chat.first_name().map(|s| s.to_string()))
        .unwrap_or_default();

    let update = InboundUpdate::Message(InboundMessage {
        bot_user_id: tag.bot_user_id,
        handle: msg.chat.id.0.to_string(),
        display_name,
        sent_at: msg.date,
        payload: extract_payload(&msg),
    });

    if tx.send(update).await.is_err() {
        eprintln!("[telegram] Router queue closed; dropping update");
    }
    Ok(())
}

/// Forward one inline-button callback into the router queue.
async fn on_callback(
    q: CallbackQuery,
    tx: mpsc::Sender<InboundUpdate>,
    tag: BotTag,
) -> ResponseResult<()> {
    // Without the originating message there is no chat to reply to.
    let Some(message) = &q.message else {
        return Ok(());
    };

    let update = InboundUpdate::Callback(InboundCallback {
        bot_user_id: tag.bot_user_id,
        handle: message.chat().id.0.to_string(),
        callback_id: q.id.clone(),
        menu_message_id: Some(message.id().0),
        data: q.data.clone(),
    });

    if tx.send(update).await.is_err() {
        eprintln!("[telegram] Router queue closed; dropping callback");
    }
    Ok(())
}

/// Reduce a Telegram message to the payload shapes the classifier knows.
fn extract_payload(msg: &Message) -> InboundPayload {
    if let Some(text) = msg.text() {
        return InboundPayload::Text(text.to_string());
    }
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return InboundPayload::Photo {
            file_id: photo.file.id.clone(),
        };
    }
    if let Some(doc) = msg.document() {
        return InboundPayload::Document {
            file_id: doc.file.id.clone(),
        };
    }
    if let Some(voice) = msg.voice() {
        return InboundPayload::Voice {
            file_id: voice.file.id.clone(),
        };
    }
    // Unrecognized shapes with a caption still carry usable text.
    if let Some(caption) = msg.caption() {
        return InboundPayload::Text(caption.to_string());
    }
    InboundPayload::Unsupported
}
