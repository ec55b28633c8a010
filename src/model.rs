//! Domain model: tenants, contacts, chat sessions, messages, departments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TenantId = Uuid;
pub type ChannelId = Uuid;
pub type ContactId = Uuid;
pub type SessionId = Uuid;
pub type DepartmentId = Uuid;
pub type AgentId = Uuid;

/// A tenant's bot credential. Immutable once provisioned; the
/// platform-assigned bot user id is discovered at connect time and lives
/// only in the connection registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub tenant_id: TenantId,
    /// Bot token, or a `${VAR}` environment reference.
    pub bot_token: String,
}

/// Lifecycle status of an external contact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    #[default]
    InProgress,
    Closed,
}

/// An external party, unique per (tenant, handle) while not closed.
/// A closed contact re-engaging gets a fresh record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    /// Platform chat handle (the Telegram chat id as a string).
    pub handle: String,
    pub display_name: String,
    pub status: ContactStatus,
}

/// Chat session lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, no agent has replied yet.
    #[default]
    Pending,
    /// An agent has sent at least one reply.
    Taken,
    /// Explicitly closed. Terminal: further contact opens a new session.
    Archived,
}

impl SessionStatus {
    /// Whether a transition to `next` is allowed.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Taken) | (Pending, Archived) | (Taken, Archived)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Taken => write!(f, "taken"),
            SessionStatus::Archived => write!(f, "archived"),
        }
    }
}

/// The durable conversation unit linking a contact to a tenant channel.
///
/// Invariant: at most one non-archived session per (contact, channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub channel_id: ChannelId,
    /// Set by the first agent-authored outbound message.
    pub agent_id: Option<AgentId>,
    /// None until the contact picks a department from the inline menu.
    pub department_id: Option<DepartmentId>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(tenant_id: TenantId, contact_id: ContactId, channel_id: ChannelId) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            contact_id,
            channel_id,
            agent_id: None,
            department_id: None,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Classified payload kind of a stored message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Audio,
}

impl MessageKind {
    /// Placeholder content used when media resolution fails.
    pub fn placeholder(self) -> &'static str {
        match self {
            MessageKind::Text => "[message unavailable]",
            MessageKind::Image => "[image unavailable]",
            MessageKind::File => "[file unavailable]",
            MessageKind::Audio => "[audio unavailable]",
        }
    }
}

/// Immutable message record attached to exactly one session. Authored by
/// an agent or, when `author_agent_id` is absent, by the contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub author_agent_id: Option<AgentId>,
    pub author_contact_id: Option<ContactId>,
    pub kind: MessageKind,
    /// Literal text, a resolved media URL, or a kind-labeled placeholder.
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_contact(
        session_id: SessionId,
        contact_id: ContactId,
        kind: MessageKind,
        content: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            author_agent_id: None,
            author_contact_id: Some(contact_id),
            kind,
            content: content.into(),
            sent_at,
        }
    }

    pub fn from_agent(
        session_id: SessionId,
        agent_id: AgentId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            author_agent_id: Some(agent_id),
            author_contact_id: None,
            kind: MessageKind::Text,
            content: content.into(),
            sent_at: Utc::now(),
        }
    }
}

/// A routing target ("line") agents subscribe to within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}
