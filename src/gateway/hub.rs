//! Agent hub - tracks connected agent clients and fans events out to them.
//!
//! Delivery is fire and forget: a slow or dead socket loses frames, it
//! never blocks persistence or the other recipients.

use super::protocol::{self, ClientEvent};
use crate::model::{AgentId, ChatSession, Contact, DepartmentId, StoredMessage};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Information about a connected agent client
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub client_id: String,
    pub agent_id: AgentId,
    pub display_name: String,
    /// Department memberships, loaded at handshake time.
    pub departments: Vec<DepartmentId>,
    pub connected_at: std::time::Instant,
}

/// Frame to send to an agent client
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub json: String,
}

/// Handle for sending frames to an agent client
pub type AgentSender = mpsc::UnboundedSender<OutboundFrame>;

/// Manager for all connected agent clients
pub struct AgentHub {
    agents: DashMap<String, AgentSession>,
    senders: DashMap<String, AgentSender>,
}

impl AgentHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            agents: DashMap::new(),
            senders: DashMap::new(),
        })
    }

    /// Register a newly welcomed agent connection.
    pub fn register(
        &self,
        client_id: &str,
        agent_id: AgentId,
        display_name: &str,
        departments: Vec<DepartmentId>,
        sender: AgentSender,
    ) {
        let info = AgentSession {
            client_id: client_id.to_string(),
            agent_id,
            display_name: display_name.to_string(),
            departments,
            connected_at: std::time::Instant::now(),
        };
        self.agents.insert(client_id.to_string(), info);
        self.senders.insert(client_id.to_string(), sender);
    }

    /// Unregister a closed connection.
    pub fn unregister(&self, client_id: &str) {
        self.agents.remove(client_id);
        self.senders.remove(client_id);
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Send a frame to a specific agent client.
    pub fn send_to(&self, client_id: &str, json: &str) -> bool {
        if let Some(sender) = self.senders.get(client_id) {
            sender
                .send(OutboundFrame {
                    json: json.to_string(),
                })
                .is_ok()
        } else {
            false
        }
    }

    fn broadcast_all(&self, event: &ClientEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("[hub] Failed to encode event {}: {}", event.event, e);
                return;
            }
        };
        for entry in self.senders.iter() {
            let _ = entry.value().send(OutboundFrame { json: json.clone() });
        }
    }

    fn broadcast_department(&self, department_id: DepartmentId, event: &ClientEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("[hub] Failed to encode event {}: {}", event.event, e);
                return;
            }
        };
        for entry in self.agents.iter() {
            if entry.departments.contains(&department_id) {
                self.send_to(entry.key(), &json);
            }
        }
    }

    /// Fan a stored message out to every connected agent.
    pub fn publish_message(
        &self,
        session: &ChatSession,
        message: &StoredMessage,
        contact_name: &str,
    ) {
        self.broadcast_all(&protocol::message_received(session, message, contact_name));
    }

    /// Announce a newly routed session to the chosen department's agents.
    /// Sessions without a department are not announced.
    pub fn publish_session_created(&self, session: &ChatSession, contact: &Contact) {
        let Some(department_id) = session.department_id else {
            return;
        };
        self.broadcast_department(department_id, &protocol::chat_created(session, contact));
    }

    /// Announce a lifecycle transition to every connected agent.
    pub fn publish_status_changed(&self, session: &ChatSession, contact_name: &str) {
        self.broadcast_all(&protocol::chat_status_changed(session, contact_name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContactStatus, MessageKind};
    use chrono::Utc;
    use uuid::Uuid;

    fn connect(hub: &AgentHub, departments: Vec<DepartmentId>) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(
            &Uuid::new_v4().to_string(),
            Uuid::new_v4(),
            "agent",
            departments,
            tx,
        );
        rx
    }

    fn sample_session() -> ChatSession {
        ChatSession::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_message_reaches_all_agents() {
        let hub = AgentHub::new();
        let mut a = connect(&hub, vec![]);
        let mut b = connect(&hub, vec![Uuid::new_v4()]);

        let session = sample_session();
        let message = StoredMessage::from_contact(
            session.id,
            session.contact_id,
            MessageKind::Text,
            "hola",
            Utc::now(),
        );
        hub.publish_message(&session, &message, "Ana");

        assert!(a.try_recv().unwrap().json.contains("message.received"));
        assert!(b.try_recv().unwrap().json.contains("hola"));
    }

    #[tokio::test]
    async fn test_chat_created_is_department_scoped() {
        let hub = AgentHub::new();
        let dept = Uuid::new_v4();
        let mut member = connect(&hub, vec![dept]);
        let mut outsider = connect(&hub, vec![Uuid::new_v4()]);

        let mut session = sample_session();
        session.department_id = Some(dept);
        let contact = Contact {
            id: session.contact_id,
            tenant_id: session.tenant_id,
            handle: "555".to_string(),
            display_name: "Ana".to_string(),
            status: ContactStatus::InProgress,
        };
        hub.publish_session_created(&session, &contact);

        assert!(member.try_recv().unwrap().json.contains("chat.created"));
        assert!(outsider.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unrouted_session_not_announced() {
        let hub = AgentHub::new();
        let mut rx = connect(&hub, vec![Uuid::new_v4()]);

        let session = sample_session();
        let contact = Contact {
            id: session.contact_id,
            tenant_id: session.tenant_id,
            handle: "555".to_string(),
            display_name: "Ana".to_string(),
            status: ContactStatus::InProgress,
        };
        hub.publish_session_created(&session, &contact);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let hub = AgentHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(&"c1".to_string(), Uuid::new_v4(), "agent", vec![], tx);
        hub.unregister("c1");
        assert_eq!(hub.agent_count(), 0);

        let session = sample_session();
        hub.publish_status_changed(&session, "Ana");
        assert!(rx.try_recv().is_err());
    }
}
