//! Persistence collaborator boundary.
//!
//! The router and gateway only see this trait; every method is a
//! single-row read or write, with no transaction spanning aggregates.
//! Serialization of read-then-write sequences is the caller's job
//! (see `router::locks`).

pub mod memory;

use crate::model::{
    AgentId, Channel, ChannelId, ChatSession, Contact, ContactId, Department, DepartmentId,
    SessionId, StoredMessage, TenantId,
};
use anyhow::Result;

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// All provisioned tenant bot credentials (registry startup).
    async fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Contact lookup by (tenant, handle). Returns the most recently
    /// created record when several exist across closed lineages.
    async fn find_contact(&self, tenant_id: TenantId, handle: &str) -> Result<Option<Contact>>;

    async fn find_contact_by_id(&self, contact_id: ContactId) -> Result<Option<Contact>>;

    async fn insert_contact(&self, contact: Contact) -> Result<()>;

    /// Most recently created session for (contact, channel), archived or not.
    async fn find_latest_session(
        &self,
        contact_id: ContactId,
        channel_id: ChannelId,
    ) -> Result<Option<ChatSession>>;

    async fn find_session(&self, session_id: SessionId) -> Result<Option<ChatSession>>;

    async fn insert_session(&self, session: ChatSession) -> Result<()>;

    /// Single-row replace by session id.
    async fn update_session(&self, session: ChatSession) -> Result<()>;

    async fn append_message(&self, message: StoredMessage) -> Result<()>;

    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<StoredMessage>>;

    /// Active departments for a tenant, sorted by name.
    async fn list_departments(&self, tenant_id: TenantId) -> Result<Vec<Department>>;

    async fn find_department(&self, department_id: DepartmentId) -> Result<Option<Department>>;

    /// Departments an agent is subscribed to.
    async fn agent_departments(&self, agent_id: AgentId) -> Result<Vec<DepartmentId>>;
}
