//! Agent protocol for WebSocket communication between agent clients and
//! the gateway.

use crate::model::{ChatSession, Contact, StoredMessage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Handshake: agent hello, the first frame on a new connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub agent_id: crate::model::AgentId,
    #[serde(default)]
    pub display_name: String,
}

/// Handshake: server welcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub client_id: String,
}

/// Agent → gateway request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(rename = "type")]
    pub frame_type: String, // Always "req"
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Gateway → agent response frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientResponse {
    #[serde(rename = "type")]
    pub frame_type: String, // Always "res"
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Error information in response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Gateway → agent event frame (server push)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEvent {
    #[serde(rename = "type")]
    pub frame_type: String, // Always "event"
    pub event: String,
    pub data: Value,
}

/// Method names for agent requests
pub mod methods {
    pub const CHAT_SEND: &str = "chat.send";
    pub const CHAT_ARCHIVE: &str = "chat.archive";
    pub const HEALTH_STATUS: &str = "health.status";
}

/// Event names for server push
pub mod events {
    pub const MESSAGE_RECEIVED: &str = "message.received";
    pub const CHAT_CREATED: &str = "chat.created";
    pub const CHAT_STATUS_CHANGED: &str = "chat.statusChanged";
}

impl ClientRequest {
    pub fn new(id: &str, method: &str, params: Value) -> Self {
        Self {
            frame_type: "req".to_string(),
            id: id.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

impl ClientResponse {
    pub fn ok(id: &str, payload: Value) -> Self {
        Self {
            frame_type: "res".to_string(),
            id: id.to_string(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: &str, code: &str, message: &str) -> Self {
        Self {
            frame_type: "res".to_string(),
            id: id.to_string(),
            ok: false,
            payload: None,
            error: Some(ErrorInfo {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

impl ClientEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            frame_type: "event".to_string(),
            event: event.to_string(),
            data,
        }
    }
}

/// A stored contact or agent message arrived on a session.
pub fn message_received(
    session: &ChatSession,
    message: &StoredMessage,
    contact_name: &str,
) -> ClientEvent {
    ClientEvent::new(
        events::MESSAGE_RECEIVED,
        json!({
            "chat_id": session.id,
            "tenant_id": session.tenant_id,
            "contact_name": contact_name,
            "message_id": message.id,
            "kind": message.kind,
            "content": message.content,
            "author_agent_id": message.author_agent_id,
            "author_contact_id": message.author_contact_id,
            "sent_at": message.sent_at,
        }),
    )
}

/// A session was bound to a department and needs an agent.
pub fn chat_created(session: &ChatSession, contact: &Contact) -> ClientEvent {
    ClientEvent::new(
        events::CHAT_CREATED,
        json!({
            "chat_id": session.id,
            "tenant_id": session.tenant_id,
            "department_id": session.department_id,
            "status": session.status,
            "contact_id": contact.id,
            "contact_name": contact.display_name,
            "contact_handle": contact.handle,
            "created_at": session.created_at,
        }),
    )
}

/// A session moved through its lifecycle (taken or archived).
pub fn chat_status_changed(session: &ChatSession, contact_name: &str) -> ClientEvent {
    ClientEvent::new(
        events::CHAT_STATUS_CHANGED,
        json!({
            "chat_id": session.id,
            "tenant_id": session.tenant_id,
            "status": session.status,
            "agent_id": session.agent_id,
            "contact_name": contact_name,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_client_request_serialization() {
        let req = ClientRequest::new("1", methods::CHAT_SEND, json!({"text": "hello"}));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("chat.send"));
        assert!(json.contains("hello"));
    }

    #[test]
    fn test_client_response_ok() {
        let res = ClientResponse::ok("1", json!({"status": "sent"}));
        assert!(res.ok);
        assert!(res.error.is_none());
    }

    #[test]
    fn test_client_response_error() {
        let res = ClientResponse::error("1", "unknown_chat", "Chat not found");
        assert!(!res.ok);
        assert!(res.error.is_some());
    }

    #[test]
    fn test_status_event_carries_lifecycle() {
        let mut session =
            ChatSession::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        session.status = crate::model::SessionStatus::Taken;

        let event = chat_status_changed(&session, "Ana");
        assert_eq!(event.event, events::CHAT_STATUS_CHANGED);
        assert_eq!(event.data["status"], "taken");
        assert_eq!(event.data["contact_name"], "Ana");
    }

    #[test]
    fn test_chat_created_names_department() {
        let mut session =
            ChatSession::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let dept_id = Uuid::new_v4();
        session.department_id = Some(dept_id);
        let contact = Contact {
            id: Uuid::new_v4(),
            tenant_id: session.tenant_id,
            handle: "555".to_string(),
            display_name: "Ana".to_string(),
            status: crate::model::ContactStatus::InProgress,
        };

        let event = chat_created(&session, &contact);
        assert_eq!(event.data["department_id"], json!(dept_id));
        assert_eq!(event.data["contact_name"], "Ana");
    }
}
