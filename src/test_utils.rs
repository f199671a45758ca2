//! Test doubles for the trait seams: HTTP, the service API, the push channel
//! and the WebSocket transport.

use crate::channel::ChannelSender;
use crate::error::TransportError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::rest::DmApi;
use crate::types::events::{Event, EventHandler};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use dmcore::protocol::OutboundEvent;
use dmcore::types::{Conversation, ConversationId, Message, MessageId, MessagePage, UserBrief, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};

#[derive(Debug, Clone, Default)]
pub struct FailingMockHttpClient;

#[async_trait]
impl HttpClient for FailingMockHttpClient {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Replays queued responses and keeps every request it saw.
#[derive(Debug, Default)]
pub struct RecordingHttpClient {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status_code: u16, body: &str) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status_code,
            body: body.as_bytes().to_vec(),
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for RecordingHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted response"))
    }
}

pub const ME: UserId = UserId(1);

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + ChronoDuration::seconds(seconds)
}

pub fn peer_of(conversation: ConversationId) -> UserBrief {
    UserBrief {
        id: UserId(100 + conversation.get()),
        username: format!("peer{conversation}"),
    }
}

pub fn conversation(id: i64, unread: u32, updated: i64) -> Conversation {
    let id = ConversationId(id);
    Conversation {
        id,
        peer: peer_of(id),
        last_message: None,
        unread_count: unread,
        created_at: Some(at(0)),
        updated_at: at(updated),
    }
}

/// A message in `conversation`, from the peer unless `mine`.
pub fn message(id: i64, conversation: i64, mine: bool) -> Message {
    let conversation_id = ConversationId(conversation);
    let sender = if mine {
        UserBrief {
            id: ME,
            username: "me".into(),
        }
    } else {
        peer_of(conversation_id)
    };
    Message {
        id: MessageId(id),
        conversation_id,
        sender_id: sender.id,
        sender: Some(sender),
        body: format!("message {id}"),
        created_at: at(id),
        read_at: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListConversations,
    FetchMessages {
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    },
    SendMessage {
        conversation_id: ConversationId,
        body: String,
    },
    MarkRead(ConversationId),
    OpenConversation(UserId),
    OnlineFriends,
    UnreadTotal,
    ListFriends,
}

/// Lets a test hold a call until it decides the response may land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    Fetch(ConversationId),
    Send,
    MarkRead,
    OnlineFriends,
    ListConversations,
}

/// An in-memory messaging service with the paging rules of the real one.
#[derive(Default)]
pub struct ScriptedApi {
    conversations: Mutex<Vec<Conversation>>,
    history: Mutex<HashMap<ConversationId, Vec<Message>>>,
    online: Mutex<Vec<UserId>>,
    calls: Mutex<Vec<ApiCall>>,
    gates: Mutex<HashMap<Gate, Arc<Semaphore>>>,
    next_id: AtomicU32,
    pub fail_send: AtomicBool,
    pub fail_mark_read: AtomicBool,
    pub fail_fetch: AtomicBool,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(10_000),
            ..Self::default()
        }
    }

    pub fn with_conversations(self, conversations: Vec<Conversation>) -> Self {
        *self.conversations.lock().unwrap() = conversations;
        self
    }

    /// Stores history for a conversation; messages are kept ascending by id.
    pub fn with_history(self, conversation_id: i64, mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(|m| m.id);
        self.history
            .lock()
            .unwrap()
            .insert(ConversationId(conversation_id), messages);
        self
    }

    pub fn with_online(self, online: Vec<UserId>) -> Self {
        *self.online.lock().unwrap() = online;
        self
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    /// Subsequent calls through `gate` block until [`Self::release`].
    pub fn hold(&self, gate: Gate) {
        self.gates
            .lock()
            .unwrap()
            .insert(gate, Arc::new(Semaphore::new(0)));
    }

    /// Lets one held call through.
    pub fn release(&self, gate: Gate) {
        if let Some(sem) = self.gates.lock().unwrap().get(&gate) {
            sem.add_permits(1);
        }
    }

    async fn pass(&self, gate: Gate) {
        let sem = self.gates.lock().unwrap().get(&gate).cloned();
        if let Some(sem) = sem
            && let Ok(permit) = sem.acquire().await
        {
            permit.forget();
        }
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn refused(message: &str) -> TransportError {
        TransportError::Status {
            status: 503,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl DmApi for ScriptedApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        self.record(ApiCall::ListConversations);
        self.pass(Gate::ListConversations).await;
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<MessagePage, TransportError> {
        self.record(ApiCall::FetchMessages {
            conversation_id,
            limit,
            before,
        });
        self.pass(Gate::Fetch(conversation_id)).await;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::refused("history unavailable"));
        }

        let history = self.history.lock().unwrap();
        let all = history.get(&conversation_id).cloned().unwrap_or_default();
        let older: Vec<Message> = all
            .into_iter()
            .filter(|m| before.is_none_or(|b| m.id < b))
            .collect();
        let start = older.len().saturating_sub(limit as usize);
        Ok(MessagePage {
            has_more: start > 0,
            messages: older[start..].to_vec(),
        })
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        body: &str,
    ) -> Result<Message, TransportError> {
        self.record(ApiCall::SendMessage {
            conversation_id,
            body: body.to_string(),
        });
        self.pass(Gate::Send).await;
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Self::refused("send rejected"));
        }

        let id = i64::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut sent = message(id, conversation_id.get(), true);
        sent.body = body.to_string();
        self.history
            .lock()
            .unwrap()
            .entry(conversation_id)
            .or_default()
            .push(sent.clone());
        Ok(sent)
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        self.record(ApiCall::MarkRead(conversation_id));
        self.pass(Gate::MarkRead).await;
        if self.fail_mark_read.load(Ordering::SeqCst) {
            return Err(Self::refused("mark read rejected"));
        }
        if let Some(c) = self
            .conversations
            .lock()
            .unwrap()
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            c.unread_count = 0;
        }
        Ok(())
    }

    async fn open_conversation(&self, peer: UserId) -> Result<Conversation, TransportError> {
        self.record(ApiCall::OpenConversation(peer));
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(existing) = conversations.iter().find(|c| c.peer.id == peer) {
            return Ok(existing.clone());
        }
        let created = conversation(peer.get() - 100, 0, 3_600);
        conversations.push(created.clone());
        Ok(created)
    }

    async fn online_friends(&self) -> Result<Vec<UserId>, TransportError> {
        self.record(ApiCall::OnlineFriends);
        self.pass(Gate::OnlineFriends).await;
        Ok(self.online.lock().unwrap().clone())
    }

    async fn unread_total(&self) -> Result<u32, TransportError> {
        self.record(ApiCall::UnreadTotal);
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.unread_count)
            .sum())
    }

    async fn list_friends(&self) -> Result<Vec<UserBrief>, TransportError> {
        self.record(ApiCall::ListFriends);
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.peer.clone())
            .collect())
    }
}

/// Keeps every outbound channel event instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingSender {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<OutboundEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn count(&self, predicate: impl Fn(&OutboundEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn emit(&self, event: OutboundEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Collects every dispatched event.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventHandler for EventRecorder {
    fn handle_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// The server side of one mock connection.
pub struct MockConnection {
    pub url: String,
    sent: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<TransportEvent>,
}

impl MockConnection {
    /// Delivers a text frame to the client.
    pub async fn push(&self, text: impl Into<String>) {
        let _ = self
            .events
            .send(TransportEvent::TextReceived(text.into()))
            .await;
    }

    /// Next frame the client wrote, or `None` once the client is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Completes the Engine.IO and Socket.IO handshakes.
    pub async fn accept(&mut self, ping_interval_ms: u64, ping_timeout_ms: u64) {
        self.push(format!(
            r#"0{{"sid":"mock","upgrades":[],"pingInterval":{ping_interval_ms},"pingTimeout":{ping_timeout_ms},"maxPayload":1000000}}"#
        ))
        .await;
        assert_eq!(self.next_sent().await.as_deref(), Some("40"));
        self.push(r#"40{"sid":"mock-socket"}"#).await;
    }

    pub async fn drop_connection(&self) {
        let _ = self.events.send(TransportEvent::Disconnected).await;
    }
}

struct MockTransport {
    sent: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Socket is closed"));
        }
        self.sent
            .send(text.to_string())
            .map_err(|_| anyhow::anyhow!("peer gone"))
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands the server side of each dialled connection to the test.
pub struct MockTransportFactory {
    connections: mpsc::UnboundedSender<MockConnection>,
    refuse: AtomicU32,
    dials: AtomicU32,
}

impl MockTransportFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = Arc::new(Self {
            connections: tx,
            refuse: AtomicU32::new(0),
            dials: AtomicU32::new(0),
        });
        (factory, rx)
    }

    /// The next `n` dials fail outright.
    pub fn refuse_next(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn dials(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow::anyhow!("connection refused"));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        let _ = event_tx.send(TransportEvent::Connected).await;
        let _ = self.connections.send(MockConnection {
            url: url.to_string(),
            sent: sent_rx,
            events: event_tx,
        });
        Ok((
            Arc::new(MockTransport {
                sent: sent_tx,
                closed: AtomicBool::new(false),
            }),
            event_rx,
        ))
    }
}
