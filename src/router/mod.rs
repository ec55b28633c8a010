//! Inbound update router.
//!
//! Consumes the raw update queue fed by the bot connections, pins each
//! update to its (tenant, handle) lock, and drives the conversation
//! pipeline: identity resolution, session resolution, classification,
//! persistence, then agent fan-out. Persistence always happens before any
//! agent notification.

pub mod department;
pub mod identity;
pub mod locks;
pub mod session;

use crate::bot::{
    classifier, BotTransport, InboundCallback, InboundMessage, InboundUpdate, TenantBinding,
};
use crate::gateway::hub::AgentHub;
use crate::model::StoredMessage;
use crate::store::Store;
use anyhow::Result;
use department::SelectionOutcome;
use locks::KeyedLocks;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct UpdateRouter {
    store: Arc<dyn Store>,
    transport: Arc<dyn BotTransport>,
    hub: Arc<AgentHub>,
    locks: Arc<KeyedLocks>,
}

impl UpdateRouter {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn BotTransport>,
        hub: Arc<AgentHub>,
        locks: Arc<KeyedLocks>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            hub,
            locks,
        })
    }

    /// Drain the update queue until every sender is dropped. The
    /// conversation guard is acquired here, in queue order, before the
    /// worker task is spawned; the tokio mutex hands it over FIFO, so
    /// messages from one conversation persist in arrival order while
    /// different conversations still run in parallel.
    pub async fn run(self: Arc<Self>, mut updates: mpsc::Receiver<InboundUpdate>) {
        while let Some(update) = updates.recv().await {
            let Some(binding) = self.transport.resolve_tenant(update.bot_user_id()) else {
                eprintln!(
                    "[router] Dropping update for unknown bot id {}",
                    update.bot_user_id()
                );
                continue;
            };

            let guard = self.locks.lock(binding.tenant_id, update.handle()).await;
            let router = self.clone();
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = router.dispatch(&binding, update).await {
                    eprintln!("[router] Update handling failed: {}", e);
                }
            });
        }
        eprintln!("[router] Update queue closed");
    }

    /// Resolve, lock, and dispatch a single update. Entry point for
    /// callers outside the queue loop.
    pub async fn handle_update(&self, update: InboundUpdate) -> Result<()> {
        let Some(binding) = self.transport.resolve_tenant(update.bot_user_id()) else {
            eprintln!(
                "[router] Dropping update for unknown bot id {}",
                update.bot_user_id()
            );
            return Ok(());
        };

        let _guard = self
            .locks
            .lock(binding.tenant_id, update.handle())
            .await;
        self.dispatch(&binding, update).await
    }

    async fn dispatch(&self, binding: &TenantBinding, update: InboundUpdate) -> Result<()> {
        match update {
            InboundUpdate::Message(msg) => self.handle_message(binding, msg).await,
            InboundUpdate::Callback(cb) => self.handle_callback(binding, cb).await,
        }
    }

    /// Contact message pipeline. The message is always persisted, even
    /// when media resolution degrades to a placeholder; prompt delivery
    /// failures are logged and never block persistence.
    async fn handle_message(&self, binding: &TenantBinding, msg: InboundMessage) -> Result<()> {
        let (kind, raw) = classifier::classify(&msg.payload);

        let contact = identity::resolve_or_create_contact(
            self.store.as_ref(),
            binding.tenant_id,
            &msg.handle,
            &msg.display_name,
        )
        .await?;

        let resolved = session::resolve_session(
            self.store.as_ref(),
            binding.tenant_id,
            contact.id,
            binding.channel_id,
        )
        .await?;

        if session::needs_department_prompt(&resolved.session) {
            if let Err(e) = department::prompt_selection(
                self.transport.as_ref(),
                self.store.as_ref(),
                binding.tenant_id,
                &msg.handle,
            )
            .await
            {
                eprintln!(
                    "[router] Department prompt failed for {}: {}",
                    msg.handle, e
                );
            }
        }

        let content = classifier::resolve_content(
            self.transport.as_ref(),
            binding.tenant_id,
            kind,
            raw,
        )
        .await;

        let message = StoredMessage::from_contact(
            resolved.session.id,
            contact.id,
            kind,
            content,
            msg.sent_at,
        );
        self.store.append_message(message.clone()).await?;

        self.hub
            .publish_message(&resolved.session, &message, &contact.display_name);
        Ok(())
    }

    /// Department selection callback pipeline. State is settled first;
    /// every platform acknowledgement after that is best effort.
    async fn handle_callback(&self, binding: &TenantBinding, cb: InboundCallback) -> Result<()> {
        let outcome = department::handle_selection(
            self.store.as_ref(),
            binding,
            &cb.handle,
            cb.data.as_deref(),
        )
        .await?;

        let reply = match &outcome {
            SelectionOutcome::Bound {
                session, contact, reply, ..
            } => {
                self.hub.publish_session_created(session, contact);
                reply.clone()
            }
            SelectionOutcome::AlreadyBound { reply } => reply.clone(),
            SelectionOutcome::Rejected { reply } => reply.clone(),
        };

        if let Err(e) = self
            .transport
            .answer_callback(binding.tenant_id, &cb.callback_id)
            .await
        {
            eprintln!("[router] Callback ack failed for {}: {}", cb.handle, e);
        }
        if let Err(e) = self
            .transport
            .send_text(binding.tenant_id, &cb.handle, &reply)
            .await
        {
            eprintln!("[router] Selection reply failed for {}: {}", cb.handle, e);
        }
        if let Some(message_id) = cb.menu_message_id {
            if let Err(e) = self
                .transport
                .clear_buttons(binding.tenant_id, &cb.handle, message_id)
                .await
            {
                eprintln!("[router] Clearing menu failed for {}: {}", cb.handle, e);
            }
        }
        Ok(())
    }
}
