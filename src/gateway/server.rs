//! Gateway WebSocket server using axum.
//!
//! Agent desk clients connect, send a hello frame naming their agent
//! identity, and then exchange request/response frames while the hub
//! pushes conversation events at them.

use crate::bot::BotTransport;
use crate::gateway::hub::{AgentHub, OutboundFrame};
use crate::gateway::protocol::{methods, ClientRequest, ClientResponse, Hello, Welcome};
use crate::model::{AgentId, SessionId, SessionStatus, StoredMessage};
use crate::router::locks::KeyedLocks;
use crate::router::session;
use crate::store::Store;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared state for the gateway
pub struct GatewayState {
    pub port: u16,
    pub hub: Arc<AgentHub>,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn BotTransport>,
    pub locks: Arc<KeyedLocks>,
}

/// Run the gateway server
pub async fn run(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let port = state.port;

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    eprintln!("[gateway] Listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "connected_agents": state.hub.agent_count(),
        "bot_connections": state.transport.connection_count(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sender, mut receiver) = socket.split();

    let client_id = uuid::Uuid::new_v4().to_string();

    // Channel for frames headed to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.json.into())).await.is_err() {
                break;
            }
        }
    });

    let hello: Hello = match wait_for_hello(&mut receiver).await {
        Some(h) => h,
        None => {
            eprintln!("[gateway] Client {} failed handshake", client_id);
            send_task.abort();
            return;
        }
    };

    // Department memberships decide which chat.created events this
    // connection sees.
    let departments = match state.store.agent_departments(hello.agent_id).await {
        Ok(departments) => departments,
        Err(e) => {
            eprintln!(
                "[gateway] Membership lookup failed for agent {}: {}",
                hello.agent_id, e
            );
            send_task.abort();
            return;
        }
    };

    state.hub.register(
        &client_id,
        hello.agent_id,
        &hello.display_name,
        departments,
        tx.clone(),
    );

    let welcome = Welcome {
        client_id: client_id.clone(),
    };
    let welcome = match serde_json::to_string(&json!({
        "type": "welcome",
        "client_id": welcome.client_id,
    })) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("[gateway] Failed to encode welcome: {}", e);
            state.hub.unregister(&client_id);
            send_task.abort();
            return;
        }
    };
    if tx.send(OutboundFrame { json: welcome }).is_err() {
        state.hub.unregister(&client_id);
        send_task.abort();
        return;
    }

    eprintln!(
        "[gateway] Agent {} connected as client {}",
        hello.agent_id, client_id
    );

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_client_message(&state, hello.agent_id, &text, &tx).await {
                    eprintln!("[gateway] Error handling message: {}", e);
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                eprintln!("[gateway] WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    state.hub.unregister(&client_id);
    send_task.abort();
    eprintln!("[gateway] Client {} disconnected", client_id);
}

async fn wait_for_hello(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<Hello> {
    // Wait up to 10 seconds for hello
    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(msg) = receiver.next().await {
            if let Ok(Message::Text(text)) = msg {
                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                    if value.get("type").and_then(|t| t.as_str()) == Some("hello") {
                        if let Ok(hello) = serde_json::from_value::<Hello>(value) {
                            return Some(hello);
                        }
                    }
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_client_message(
    state: &Arc<GatewayState>,
    agent_id: AgentId,
    text: &str,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(text)?;

    let msg_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
    if msg_type == "req" {
        let request: ClientRequest = serde_json::from_value(value)?;
        handle_request(state, agent_id, request, tx).await?;
    }

    Ok(())
}

async fn handle_request(
    state: &Arc<GatewayState>,
    agent_id: AgentId,
    request: ClientRequest,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
) -> anyhow::Result<()> {
    let req_id = request.id.clone();

    match request.method.as_str() {
        methods::HEALTH_STATUS => {
            let response = ClientResponse::ok(
                &req_id,
                json!({
                    "connected_agents": state.hub.agent_count(),
                    "bot_connections": state.transport.connection_count(),
                }),
            );
            send_response(tx, &response);
        }

        methods::CHAT_SEND => {
            handle_chat_send(state, agent_id, &req_id, request.params, tx).await?;
        }

        methods::CHAT_ARCHIVE => {
            handle_chat_archive(state, &req_id, request.params, tx).await?;
        }

        _ => {
            let response = ClientResponse::error(
                &req_id,
                "unknown_method",
                &format!("Unknown method: {}", request.method),
            );
            send_response(tx, &response);
        }
    }

    Ok(())
}

fn parse_chat_id(params: &Value) -> Option<SessionId> {
    params
        .get("chat_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Deliver an agent reply: send to the contact, then take the session if
/// it was pending, then persist the message and fan it back out.
async fn handle_chat_send(
    state: &Arc<GatewayState>,
    agent_id: AgentId,
    req_id: &str,
    params: Value,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
) -> anyhow::Result<()> {
    let Some(chat_id) = parse_chat_id(&params) else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "invalid_params", "Missing or malformed chat_id"),
        );
        return Ok(());
    };
    let text = params.get("text").and_then(|t| t.as_str()).unwrap_or("");
    if text.is_empty() {
        send_response(
            tx,
            &ClientResponse::error(req_id, "invalid_params", "Missing text parameter"),
        );
        return Ok(());
    }

    let Some(probe) = state.store.find_session(chat_id).await? else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "unknown_chat", "Chat not found"),
        );
        return Ok(());
    };
    let Some(contact) = state.store.find_contact_by_id(probe.contact_id).await? else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "unknown_chat", "Contact not found"),
        );
        return Ok(());
    };

    // Same lock as inbound updates for this conversation.
    let _guard = state.locks.lock(probe.tenant_id, &contact.handle).await;

    // Re-read under the lock; the status may have moved.
    let Some(mut chat) = state.store.find_session(chat_id).await? else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "unknown_chat", "Chat not found"),
        );
        return Ok(());
    };
    if chat.status == SessionStatus::Archived {
        send_response(
            tx,
            &ClientResponse::error(req_id, "chat_archived", "Chat is archived"),
        );
        return Ok(());
    }

    if let Err(e) = state
        .transport
        .send_text(chat.tenant_id, &contact.handle, text)
        .await
    {
        eprintln!("[gateway] Delivery to {} failed: {}", contact.handle, e);
        send_response(
            tx,
            &ClientResponse::error(req_id, "delivery_failed", &e.to_string()),
        );
        return Ok(());
    }

    let transitioned = match session::mark_taken(&mut chat, agent_id) {
        Ok(transitioned) => transitioned,
        Err(_) => {
            send_response(
                tx,
                &ClientResponse::error(req_id, "chat_archived", "Chat is archived"),
            );
            return Ok(());
        }
    };

    // The reply already reached the contact; a store failure past this
    // point must still answer the agent, not tear down the connection.
    let message = StoredMessage::from_agent(chat.id, agent_id, text);
    let persisted = async {
        state.store.update_session(chat.clone()).await?;
        state.store.append_message(message.clone()).await
    }
    .await;
    if let Err(e) = persisted {
        eprintln!("[gateway] Recording reply for chat {} failed: {}", chat.id, e);
        send_response(
            tx,
            &ClientResponse::error(
                req_id,
                "store_failed",
                "Reply was delivered but could not be recorded",
            ),
        );
        return Ok(());
    }

    if transitioned {
        state.hub.publish_status_changed(&chat, &contact.display_name);
    }
    state.hub.publish_message(&chat, &message, &contact.display_name);

    send_response(
        tx,
        &ClientResponse::ok(
            req_id,
            json!({
                "status": "sent",
                "chat_status": chat.status,
                "message_id": message.id,
            }),
        ),
    );
    Ok(())
}

async fn handle_chat_archive(
    state: &Arc<GatewayState>,
    req_id: &str,
    params: Value,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
) -> anyhow::Result<()> {
    let Some(chat_id) = parse_chat_id(&params) else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "invalid_params", "Missing or malformed chat_id"),
        );
        return Ok(());
    };

    let Some(probe) = state.store.find_session(chat_id).await? else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "unknown_chat", "Chat not found"),
        );
        return Ok(());
    };
    let Some(contact) = state.store.find_contact_by_id(probe.contact_id).await? else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "unknown_chat", "Contact not found"),
        );
        return Ok(());
    };

    let _guard = state.locks.lock(probe.tenant_id, &contact.handle).await;

    let Some(mut chat) = state.store.find_session(chat_id).await? else {
        send_response(
            tx,
            &ClientResponse::error(req_id, "unknown_chat", "Chat not found"),
        );
        return Ok(());
    };
    if session::archive(&mut chat).is_err() {
        send_response(
            tx,
            &ClientResponse::error(req_id, "chat_archived", "Chat is already archived"),
        );
        return Ok(());
    }
    if let Err(e) = state.store.update_session(chat.clone()).await {
        eprintln!("[gateway] Recording archive for chat {} failed: {}", chat.id, e);
        send_response(
            tx,
            &ClientResponse::error(req_id, "store_failed", "Archive could not be recorded"),
        );
        return Ok(());
    }

    state.hub.publish_status_changed(&chat, &contact.display_name);

    send_response(
        tx,
        &ClientResponse::ok(req_id, json!({ "status": "archived" })),
    );
    Ok(())
}

fn send_response(tx: &mpsc::UnboundedSender<OutboundFrame>, response: &ClientResponse) {
    if let Ok(json) = serde_json::to_string(response) {
        let _ = tx.send(OutboundFrame { json });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{MenuButton, TenantBinding};
    use crate::model::{
        Channel, ChannelId, ChatSession, Contact, ContactId, ContactStatus, Department,
        DepartmentId, TenantId,
    };
    use crate::store::memory::MemStore;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Store wrapper whose message persistence fails after delivery has
    /// already happened.
    struct FailingAppendStore(Arc<MemStore>);

    #[async_trait::async_trait]
    impl Store for FailingAppendStore {
        async fn list_channels(&self) -> anyhow::Result<Vec<Channel>> {
            self.0.list_channels().await
        }
        async fn find_contact(
            &self,
            tenant_id: TenantId,
            handle: &str,
        ) -> anyhow::Result<Option<Contact>> {
            self.0.find_contact(tenant_id, handle).await
        }
        async fn find_contact_by_id(
            &self,
            contact_id: ContactId,
        ) -> anyhow::Result<Option<Contact>> {
            self.0.find_contact_by_id(contact_id).await
        }
        async fn insert_contact(&self, contact: Contact) -> anyhow::Result<()> {
            self.0.insert_contact(contact).await
        }
        async fn find_latest_session(
            &self,
            contact_id: ContactId,
            channel_id: ChannelId,
        ) -> anyhow::Result<Option<ChatSession>> {
            self.0.find_latest_session(contact_id, channel_id).await
        }
        async fn find_session(&self, session_id: SessionId) -> anyhow::Result<Option<ChatSession>> {
            self.0.find_session(session_id).await
        }
        async fn insert_session(&self, session: ChatSession) -> anyhow::Result<()> {
            self.0.insert_session(session).await
        }
        async fn update_session(&self, session: ChatSession) -> anyhow::Result<()> {
            self.0.update_session(session).await
        }
        async fn append_message(&self, _message: StoredMessage) -> anyhow::Result<()> {
            anyhow::bail!("storage offline")
        }
        async fn list_messages(
            &self,
            session_id: SessionId,
        ) -> anyhow::Result<Vec<StoredMessage>> {
            self.0.list_messages(session_id).await
        }
        async fn list_departments(&self, tenant_id: TenantId) -> anyhow::Result<Vec<Department>> {
            self.0.list_departments(tenant_id).await
        }
        async fn find_department(
            &self,
            department_id: DepartmentId,
        ) -> anyhow::Result<Option<Department>> {
            self.0.find_department(department_id).await
        }
        async fn agent_departments(&self, agent_id: AgentId) -> anyhow::Result<Vec<DepartmentId>> {
            self.0.agent_departments(agent_id).await
        }
    }

    struct StubTransport {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl BotTransport for StubTransport {
        fn resolve_tenant(&self, _bot_user_id: u64) -> Option<TenantBinding> {
            None
        }

        fn connection_count(&self) -> usize {
            0
        }

        async fn send_text(&self, _tenant_id: TenantId, handle: &str, text: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("network down");
            }
            self.sent
                .lock()
                .unwrap()
                .push((handle.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_menu(
            &self,
            _tenant_id: TenantId,
            _handle: &str,
            _text: &str,
            _buttons: Vec<MenuButton>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn answer_callback(&self, _tenant_id: TenantId, _callback_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn clear_buttons(
            &self,
            _tenant_id: TenantId,
            _handle: &str,
            _message_id: i32,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn resolve_file_url(&self, _tenant_id: TenantId, file_id: &str) -> anyhow::Result<String> {
            Ok(file_id.to_string())
        }
    }

    struct Fixture {
        state: Arc<GatewayState>,
        store: Arc<MemStore>,
        chat_id: SessionId,
        contact: Contact,
    }

    async fn fixture(fail_delivery: bool) -> Fixture {
        let store = MemStore::new();
        let tenant_id = Uuid::new_v4();
        let channel = Channel {
            id: Uuid::new_v4(),
            tenant_id,
            bot_token: "t".to_string(),
        };
        store.add_channel(channel.clone());

        let contact = Contact {
            id: Uuid::new_v4(),
            tenant_id,
            handle: "555".to_string(),
            display_name: "Ana".to_string(),
            status: ContactStatus::InProgress,
        };
        store.insert_contact(contact.clone()).await.unwrap();

        let chat = crate::model::ChatSession::new(tenant_id, contact.id, channel.id);
        let chat_id = chat.id;
        store.insert_session(chat).await.unwrap();

        let state = Arc::new(GatewayState {
            port: 0,
            hub: AgentHub::new(),
            store: store.clone(),
            transport: Arc::new(StubTransport {
                sent: Mutex::new(Vec::new()),
                fail: fail_delivery,
            }),
            locks: Arc::new(KeyedLocks::new()),
        });

        Fixture {
            state,
            store,
            chat_id,
            contact,
        }
    }

    fn decode(frame: OutboundFrame) -> ClientResponse {
        serde_json::from_str(&frame.json).unwrap()
    }

    #[tokio::test]
    async fn test_chat_send_takes_pending_session() {
        let fx = fixture(false).await;
        let agent_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_chat_send(
            &fx.state,
            agent_id,
            "1",
            json!({ "chat_id": fx.chat_id.to_string(), "text": "On it" }),
            &tx,
        )
        .await
        .unwrap();

        let res = decode(rx.try_recv().unwrap());
        assert!(res.ok);

        let chat = fx.store.find_session(fx.chat_id).await.unwrap().unwrap();
        assert_eq!(chat.status, SessionStatus::Taken);
        assert_eq!(chat.agent_id, Some(agent_id));

        let messages = fx.store.list_messages(fx.chat_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].author_agent_id, Some(agent_id));
    }

    #[tokio::test]
    async fn test_chat_send_unknown_chat() {
        let fx = fixture(false).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_chat_send(
            &fx.state,
            Uuid::new_v4(),
            "1",
            json!({ "chat_id": Uuid::new_v4().to_string(), "text": "hi" }),
            &tx,
        )
        .await
        .unwrap();

        let res = decode(rx.try_recv().unwrap());
        assert!(!res.ok);
        assert_eq!(res.error.unwrap().code, "unknown_chat");
    }

    #[tokio::test]
    async fn test_chat_send_delivery_failure_persists_nothing() {
        let fx = fixture(true).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_chat_send(
            &fx.state,
            Uuid::new_v4(),
            "1",
            json!({ "chat_id": fx.chat_id.to_string(), "text": "hi" }),
            &tx,
        )
        .await
        .unwrap();

        let res = decode(rx.try_recv().unwrap());
        assert_eq!(res.error.unwrap().code, "delivery_failed");

        let chat = fx.store.find_session(fx.chat_id).await.unwrap().unwrap();
        assert_eq!(chat.status, SessionStatus::Pending);
        assert!(fx.store.list_messages(fx.chat_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_archive_then_send_rejected() {
        let fx = fixture(false).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_chat_archive(
            &fx.state,
            "1",
            json!({ "chat_id": fx.chat_id.to_string() }),
            &tx,
        )
        .await
        .unwrap();
        assert!(decode(rx.try_recv().unwrap()).ok);

        handle_chat_send(
            &fx.state,
            Uuid::new_v4(),
            "2",
            json!({ "chat_id": fx.chat_id.to_string(), "text": "hi" }),
            &tx,
        )
        .await
        .unwrap();
        let res = decode(rx.try_recv().unwrap());
        assert_eq!(res.error.unwrap().code, "chat_archived");
    }

    #[tokio::test]
    async fn test_double_archive_rejected() {
        let fx = fixture(false).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_chat_archive(
            &fx.state,
            "1",
            json!({ "chat_id": fx.chat_id.to_string() }),
            &tx,
        )
        .await
        .unwrap();
        assert!(decode(rx.try_recv().unwrap()).ok);

        handle_chat_archive(
            &fx.state,
            "2",
            json!({ "chat_id": fx.chat_id.to_string() }),
            &tx,
        )
        .await
        .unwrap();
        let res = decode(rx.try_recv().unwrap());
        assert_eq!(res.error.unwrap().code, "chat_archived");
    }

    #[tokio::test]
    async fn test_chat_send_store_failure_still_responds() {
        let fx = fixture(false).await;
        let state = Arc::new(GatewayState {
            port: 0,
            hub: fx.state.hub.clone(),
            store: Arc::new(FailingAppendStore(fx.store.clone())),
            transport: fx.state.transport.clone(),
            locks: fx.state.locks.clone(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_chat_send(
            &state,
            Uuid::new_v4(),
            "1",
            json!({ "chat_id": fx.chat_id.to_string(), "text": "On it" }),
            &tx,
        )
        .await
        .unwrap();

        // The agent must get a response frame even though the write failed
        // after delivery.
        let res = decode(rx.try_recv().unwrap());
        assert!(!res.ok);
        assert_eq!(res.error.unwrap().code, "store_failed");
        assert!(fx.store.list_messages(fx.chat_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_change_broadcast_on_first_reply() {
        let fx = fixture(false).await;
        let (agent_tx, mut agent_rx) = mpsc::unbounded_channel();
        fx.state
            .hub
            .register("c1", Uuid::new_v4(), "watcher", vec![], agent_tx);

        let (tx, _rx) = mpsc::unbounded_channel();
        handle_chat_send(
            &fx.state,
            Uuid::new_v4(),
            "1",
            json!({ "chat_id": fx.chat_id.to_string(), "text": "On it" }),
            &tx,
        )
        .await
        .unwrap();

        let first = agent_rx.try_recv().unwrap();
        assert!(first.json.contains("chat.statusChanged"));
        assert!(first.json.contains("taken"));
        assert!(first.json.contains(&fx.contact.display_name));

        let second = agent_rx.try_recv().unwrap();
        assert!(second.json.contains("message.received"));
    }
}
