//! Conversation resolution and the session state machine.
//!
//! pending → taken on the first agent-authored reply; pending or taken →
//! archived on explicit close; nothing leaves archived. A new session is
//! only created when none exists for the (contact, channel) pair or the
//! latest one is archived, preserving the one-active-session invariant.

use crate::model::{AgentId, ChannelId, ChatSession, ContactId, SessionStatus, TenantId};
use crate::store::Store;
use anyhow::{bail, Result};

pub struct ResolvedSession {
    pub session: ChatSession,
    pub is_new: bool,
}

/// Find the session for a (contact, channel) pair, creating a fresh
/// pending one when none exists or the latest is archived.
pub async fn resolve_session(
    store: &dyn Store,
    tenant_id: TenantId,
    contact_id: ContactId,
    channel_id: ChannelId,
) -> Result<ResolvedSession> {
    if let Some(existing) = store.find_latest_session(contact_id, channel_id).await? {
        if existing.status != SessionStatus::Archived {
            return Ok(ResolvedSession {
                session: existing,
                is_new: false,
            });
        }
    }

    let session = ChatSession::new(tenant_id, contact_id, channel_id);
    store.insert_session(session.clone()).await?;
    Ok(ResolvedSession {
        session,
        is_new: true,
    })
}

/// Whether the department selection menu must be (re)sent for this
/// session. Only an unattended session without a department prompts; once
/// an agent has engaged, department binding is settled.
pub fn needs_department_prompt(session: &ChatSession) -> bool {
    session.status == SessionStatus::Pending && session.department_id.is_none()
}

/// Drive pending → taken on an agent reply. Returns whether the status
/// actually changed; replying to an already-taken session is a no-op.
pub fn mark_taken(session: &mut ChatSession, agent_id: AgentId) -> Result<bool> {
    match session.status {
        SessionStatus::Pending => {
            session.status = SessionStatus::Taken;
            session.agent_id = Some(agent_id);
            Ok(true)
        }
        SessionStatus::Taken => {
            if session.agent_id.is_none() {
                session.agent_id = Some(agent_id);
            }
            Ok(false)
        }
        SessionStatus::Archived => bail!("session {} is archived", session.id),
    }
}

/// Archive a session. Terminal: archiving twice is an error.
pub fn archive(session: &mut ChatSession) -> Result<()> {
    if !session.status.can_transition(SessionStatus::Archived) {
        bail!(
            "session {} cannot be archived from {}",
            session.id,
            session.status
        );
    }
    session.status = SessionStatus::Archived;
    Ok(())
}
