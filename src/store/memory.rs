//! In-memory store used by the binary and by tests.
//!
//! Backed by concurrent maps; every trait method is a single map read or
//! write, matching the single-row semantics the router assumes. Seedable
//! from a TOML file describing tenants, departments, and agent
//! memberships.

use super::Store;
use crate::model::{
    AgentId, Channel, ChannelId, ChatSession, Contact, ContactId, Department, DepartmentId,
    SessionId, StoredMessage, TenantId,
};
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// DashMap-backed store. Insertion sequence numbers break created-at ties
/// so "latest" lookups are deterministic.
#[derive(Default)]
pub struct MemStore {
    channels: DashMap<ChannelId, Channel>,
    contacts: DashMap<ContactId, (u64, Contact)>,
    sessions: DashMap<SessionId, (u64, ChatSession)>,
    messages: DashMap<SessionId, Vec<StoredMessage>>,
    departments: DashMap<DepartmentId, Department>,
    memberships: DashMap<AgentId, Vec<DepartmentId>>,
    seq: AtomicU64,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn add_channel(&self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn add_department(&self, department: Department) {
        self.departments.insert(department.id, department);
    }

    pub fn add_membership(&self, agent_id: AgentId, department_id: DepartmentId) {
        self.memberships
            .entry(agent_id)
            .or_default()
            .push(department_id);
    }

    /// Load tenants, channels, departments and agent memberships from a
    /// TOML seed file.
    pub fn load_seed(&self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        let seed: SeedFile =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

        for tenant in &seed.tenants {
            self.add_channel(Channel {
                id: Uuid::new_v4(),
                tenant_id: tenant.id,
                bot_token: tenant.bot_token.clone(),
            });
            for dept in &tenant.departments {
                self.add_department(Department {
                    id: dept.id,
                    tenant_id: tenant.id,
                    name: dept.name.clone(),
                    active: dept.active,
                });
            }
            for agent in &tenant.agents {
                for dept_id in &agent.departments {
                    self.add_membership(agent.id, *dept_id);
                }
            }
        }

        Ok(seed.tenants.len())
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.channels.iter().map(|r| r.value().clone()).collect())
    }

    async fn find_contact(&self, tenant_id: TenantId, handle: &str) -> Result<Option<Contact>> {
        Ok(self
            .contacts
            .iter()
            .filter(|r| {
                let (_, c) = r.value();
                c.tenant_id == tenant_id && c.handle == handle
            })
            .max_by_key(|r| r.value().0)
            .map(|r| r.value().1.clone()))
    }

    async fn find_contact_by_id(&self, contact_id: ContactId) -> Result<Option<Contact>> {
        Ok(self.contacts.get(&contact_id).map(|r| r.value().1.clone()))
    }

    async fn insert_contact(&self, contact: Contact) -> Result<()> {
        self.contacts
            .insert(contact.id, (self.next_seq(), contact));
        Ok(())
    }

    async fn find_latest_session(
        &self,
        contact_id: ContactId,
        channel_id: ChannelId,
    ) -> Result<Option<ChatSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|r| {
                let (_, s) = r.value();
                s.contact_id == contact_id && s.channel_id == channel_id
            })
            .max_by_key(|r| {
                let (seq, s) = r.value();
                (s.created_at, *seq)
            })
            .map(|r| r.value().1.clone()))
    }

    async fn find_session(&self, session_id: SessionId) -> Result<Option<ChatSession>> {
        Ok(self.sessions.get(&session_id).map(|r| r.value().1.clone()))
    }

    async fn insert_session(&self, session: ChatSession) -> Result<()> {
        self.sessions
            .insert(session.id, (self.next_seq(), session));
        Ok(())
    }

    async fn update_session(&self, session: ChatSession) -> Result<()> {
        match self.sessions.get_mut(&session.id) {
            Some(mut entry) => {
                entry.value_mut().1 = session;
                Ok(())
            }
            None => anyhow::bail!("session {} not found", session.id),
        }
    }

    async fn append_message(&self, message: StoredMessage) -> Result<()> {
        self.messages
            .entry(message.session_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list_messages(&self, session_id: SessionId) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .get(&session_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn list_departments(&self, tenant_id: TenantId) -> Result<Vec<Department>> {
        let mut departments: Vec<Department> = self
            .departments
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.active)
            .map(|r| r.value().clone())
            .collect();
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(departments)
    }

    async fn find_department(&self, department_id: DepartmentId) -> Result<Option<Department>> {
        Ok(self.departments.get(&department_id).map(|r| r.clone()))
    }

    async fn agent_departments(&self, agent_id: AgentId) -> Result<Vec<DepartmentId>> {
        Ok(self
            .memberships
            .get(&agent_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}

/// Seed file shape
#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    tenants: Vec<SeedTenant>,
}

#[derive(Debug, Deserialize)]
struct SeedTenant {
    id: TenantId,
    bot_token: String,
    #[serde(default)]
    departments: Vec<SeedDepartment>,
    #[serde(default)]
    agents: Vec<SeedAgent>,
}

#[derive(Debug, Deserialize)]
struct SeedDepartment {
    id: DepartmentId,
    name: String,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SeedAgent {
    id: AgentId,
    #[serde(default)]
    departments: Vec<DepartmentId>,
}
