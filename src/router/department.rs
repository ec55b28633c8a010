//! Department selection: the inline menu and its callback handling.

use crate::bot::{BotTransport, MenuButton, TenantBinding};
use crate::model::{ChatSession, Contact, Department, DepartmentId, SessionStatus, TenantId};
use crate::store::Store;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Callback payload carried in each menu button. Kept under Telegram's
/// 64-byte callback data limit: the serialized form is ~58 bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionToken {
    #[serde(rename = "a")]
    pub action: String,
    #[serde(rename = "id")]
    pub department_id: DepartmentId,
}

impl SelectionToken {
    pub fn new(department_id: DepartmentId) -> Self {
        Self {
            action: "dept".to_string(),
            department_id,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(data: &str) -> Option<Self> {
        serde_json::from_str::<Self>(data)
            .ok()
            .filter(|t| t.action == "dept")
    }
}

/// Outcome of processing a selection callback.
pub enum SelectionOutcome {
    /// The session was bound to the department; notify agents.
    Bound {
        session: ChatSession,
        department: Department,
        contact: Contact,
        reply: String,
    },
    /// The session already had a department; keep it and tell the contact.
    AlreadyBound { reply: String },
    /// The callback did not apply; acknowledge without changing state.
    Rejected { reply: String },
}

/// Send the department menu to a contact, or a notice when the tenant has
/// no active departments.
pub async fn prompt_selection(
    transport: &dyn BotTransport,
    store: &dyn Store,
    tenant_id: TenantId,
    handle: &str,
) -> Result<()> {
    let departments = store.list_departments(tenant_id).await?;
    if departments.is_empty() {
        transport
            .send_text(
                tenant_id,
                handle,
                "No departments are available right now.",
            )
            .await?;
        return Ok(());
    }

    let buttons = departments
        .into_iter()
        .map(|d| MenuButton {
            label: d.name,
            data: SelectionToken::new(d.id).encode(),
        })
        .collect();

    transport
        .send_menu(
            tenant_id,
            handle,
            "Please choose the department you need:",
            buttons,
        )
        .await
}

/// Apply a selection callback to the contact's current session.
///
/// Every invalid shape lands in `Rejected`: a stale or foreign token, a
/// missing contact, an archived or absent session, an unknown or inactive
/// department. A second selection on an already-bound session keeps the
/// original binding.
pub async fn handle_selection(
    store: &dyn Store,
    binding: &TenantBinding,
    handle: &str,
    data: Option<&str>,
) -> Result<SelectionOutcome> {
    let token = match data.and_then(SelectionToken::decode) {
        Some(token) => token,
        None => {
            return Ok(SelectionOutcome::Rejected {
                reply: "That selection is no longer valid.".to_string(),
            })
        }
    };

    let Some(contact) = store.find_contact(binding.tenant_id, handle).await? else {
        return Ok(SelectionOutcome::Rejected {
            reply: "That selection is no longer valid.".to_string(),
        });
    };

    let Some(mut session) = store
        .find_latest_session(contact.id, binding.channel_id)
        .await?
    else {
        return Ok(SelectionOutcome::Rejected {
            reply: "That selection is no longer valid.".to_string(),
        });
    };
    if session.status == SessionStatus::Archived {
        return Ok(SelectionOutcome::Rejected {
            reply: "That conversation has ended.".to_string(),
        });
    }

    if let Some(bound_id) = session.department_id {
        let name = store
            .find_department(bound_id)
            .await?
            .map(|d| d.name)
            .unwrap_or_else(|| "the selected".to_string());
        return Ok(SelectionOutcome::AlreadyBound {
            reply: format!("You are already being assisted by the {} department.", name),
        });
    }

    let department = match store.find_department(token.department_id).await? {
        Some(d) if d.active && d.tenant_id == binding.tenant_id => d,
        _ => {
            return Ok(SelectionOutcome::Rejected {
                reply: "That department is not available.".to_string(),
            })
        }
    };

    session.department_id = Some(department.id);
    store.update_session(session.clone()).await?;

    let reply = format!(
        "You will be assisted by the {} department.",
        department.name
    );
    Ok(SelectionOutcome::Bound {
        session,
        department,
        contact,
        reply,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Channel;
    use crate::router::identity::resolve_or_create_contact;
    use crate::router::session::resolve_session;
    use crate::store::memory::MemStore;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemStore>,
        binding: TenantBinding,
        sales: Department,
        support: Department,
    }

    async fn fixture() -> Fixture {
        let store = MemStore::new();
        let tenant_id = Uuid::new_v4();
        let channel = Channel {
            id: Uuid::new_v4(),
            tenant_id,
            bot_token: "t".to_string(),
        };
        store.add_channel(channel.clone());

        let sales = Department {
            id: Uuid::new_v4(),
            tenant_id,
            name: "Sales".to_string(),
            active: true,
        };
        let support = Department {
            id: Uuid::new_v4(),
            tenant_id,
            name: "Support".to_string(),
            active: true,
        };
        store.add_department(sales.clone());
        store.add_department(support.clone());

        Fixture {
            store,
            binding: TenantBinding {
                tenant_id,
                channel_id: channel.id,
            },
            sales,
            support,
        }
    }

    async fn start_session(fx: &Fixture, handle: &str) -> ChatSession {
        let contact =
            resolve_or_create_contact(fx.store.as_ref(), fx.binding.tenant_id, handle, "Ana")
                .await
                .unwrap();
        resolve_session(
            fx.store.as_ref(),
            fx.binding.tenant_id,
            contact.id,
            fx.binding.channel_id,
        )
        .await
        .unwrap()
        .session
    }

    #[test]
    fn test_token_round_trip_stays_small() {
        let token = SelectionToken::new(Uuid::new_v4());
        let encoded = token.encode();
        assert!(encoded.len() <= 64, "callback data too long: {}", encoded.len());

        let decoded = SelectionToken::decode(&encoded).unwrap();
        assert_eq!(decoded.department_id, token.department_id);
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(SelectionToken::decode("LINE_abc123").is_none());
        assert!(SelectionToken::decode("{\"a\":\"other\",\"id\":\"x\"}").is_none());
        assert!(SelectionToken::decode("").is_none());
    }

    #[tokio::test]
    async fn test_selection_binds_pending_session() {
        let fx = fixture().await;
        start_session(&fx, "555").await;

        let data = SelectionToken::new(fx.sales.id).encode();
        let outcome = handle_selection(fx.store.as_ref(), &fx.binding, "555", Some(&data))
            .await
            .unwrap();

        match outcome {
            SelectionOutcome::Bound {
                session,
                department,
                reply,
                ..
            } => {
                assert_eq!(session.department_id, Some(fx.sales.id));
                assert_eq!(department.name, "Sales");
                assert!(reply.contains("Sales"));
            }
            _ => panic!("expected Bound"),
        }
    }

    #[tokio::test]
    async fn test_second_selection_keeps_original() {
        let fx = fixture().await;
        start_session(&fx, "555").await;

        let first = SelectionToken::new(fx.sales.id).encode();
        handle_selection(fx.store.as_ref(), &fx.binding, "555", Some(&first))
            .await
            .unwrap();

        let second = SelectionToken::new(fx.support.id).encode();
        let outcome = handle_selection(fx.store.as_ref(), &fx.binding, "555", Some(&second))
            .await
            .unwrap();

        match outcome {
            SelectionOutcome::AlreadyBound { reply } => assert!(reply.contains("Sales")),
            _ => panic!("expected AlreadyBound"),
        }

        let contact = fx
            .store
            .find_contact(fx.binding.tenant_id, "555")
            .await
            .unwrap()
            .unwrap();
        let session = fx
            .store
            .find_latest_session(contact.id, fx.binding.channel_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.department_id, Some(fx.sales.id));
    }

    #[tokio::test]
    async fn test_unknown_department_rejected() {
        let fx = fixture().await;
        start_session(&fx, "555").await;

        let data = SelectionToken::new(Uuid::new_v4()).encode();
        let outcome = handle_selection(fx.store.as_ref(), &fx.binding, "555", Some(&data))
            .await
            .unwrap();
        assert!(matches!(outcome, SelectionOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_foreign_tenant_department_rejected() {
        let fx = fixture().await;
        start_session(&fx, "555").await;

        let foreign = Department {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Elsewhere".to_string(),
            active: true,
        };
        fx.store.add_department(foreign.clone());

        let data = SelectionToken::new(foreign.id).encode();
        let outcome = handle_selection(fx.store.as_ref(), &fx.binding, "555", Some(&data))
            .await
            .unwrap();
        assert!(matches!(outcome, SelectionOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_callback_without_session_rejected() {
        let fx = fixture().await;

        let data = SelectionToken::new(fx.sales.id).encode();
        let outcome = handle_selection(fx.store.as_ref(), &fx.binding, "999", Some(&data))
            .await
            .unwrap();
        assert!(matches!(outcome, SelectionOutcome::Rejected { .. }));
    }
}
