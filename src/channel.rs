//! Persistent push channel to the messaging service (Socket.IO over WebSocket).

use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use async_trait::async_trait;
use dmcore::protocol::{ChannelEvent, InboundEvent, OutboundEvent};
use dmcore::socketio::{EnginePacket, OpenHandshake, SocketPacket};
use log::{debug, info, trace, warn};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

const EVENT_BUFFER: usize = 256;

/// Where outbound channel events go. Fire-and-forget: failures are logged
/// by the implementation, never returned.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn emit(&self, event: OutboundEvent);
}

enum LoopExit {
    Shutdown,
    Lost(String),
    Rejected(String),
}

type Connection = (
    Arc<dyn Transport>,
    mpsc::Receiver<TransportEvent>,
    OpenHandshake,
);

pub struct Channel {
    factory: Arc<dyn TransportFactory>,
    url: String,
    config: ClientConfig,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    events: broadcast::Sender<ChannelEvent>,
    is_running: AtomicBool,
    is_connected: AtomicBool,
    pub enable_auto_reconnect: AtomicBool,
    pub auto_reconnect_errors: AtomicU32,
    connection_generation: AtomicU64,
    shutdown_notifier: Notify,
}

impl Channel {
    pub fn new(factory: Arc<dyn TransportFactory>, url: String, config: &ClientConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            factory,
            url,
            config: config.clone(),
            transport: Mutex::new(None),
            events,
            is_running: AtomicBool::new(false),
            is_connected: AtomicBool::new(false),
            enable_auto_reconnect: AtomicBool::new(config.enable_auto_reconnect),
            auto_reconnect_errors: AtomicU32::new(0),
            connection_generation: AtomicU64::new(0),
            shutdown_notifier: Notify::new(),
        })
    }

    /// Creates the channel, subscribes once and starts connecting, so the
    /// returned receiver observes every event from the first connect on.
    pub fn connect(
        factory: Arc<dyn TransportFactory>,
        url: String,
        config: &ClientConfig,
    ) -> (Arc<Self>, broadcast::Receiver<ChannelEvent>) {
        let channel = Self::new(factory, url, config);
        let events = channel.subscribe();
        channel.start();
        (channel, events)
    }

    /// Events in arrival order. Subscribe before [`Self::start`] to see the
    /// first connect.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move { channel.run().await })
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn connection_generation(&self) -> u64 {
        self.connection_generation.load(Ordering::SeqCst)
    }

    fn publish(&self, event: ChannelEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub async fn run(self: Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Channel", "Channel `run` called while already running.");
            return;
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_running.store(false, Ordering::Relaxed);
        });

        let mut resumed = false;
        while self.is_running.load(Ordering::Relaxed) {
            match self.connect_once().await {
                Ok((transport, events, open)) => {
                    self.auto_reconnect_errors.store(0, Ordering::Relaxed);
                    let generation = self.connection_generation.fetch_add(1, Ordering::SeqCst) + 1;
                    *self.transport.lock().await = Some(transport.clone());
                    self.is_connected.store(true, Ordering::Relaxed);
                    info!(target: "Channel", "Connected (sid {}, generation {generation})", open.sid);

                    self.send_event(&transport, OutboundEvent::JoinDm).await;
                    self.publish(ChannelEvent::Connected { resumed });
                    resumed = true;

                    let exit = self
                        .read_loop(&transport, events, open.liveness_window())
                        .await;
                    self.cleanup_connection_state().await;

                    match exit {
                        LoopExit::Shutdown => {
                            self.publish(ChannelEvent::Disconnected {
                                reason: "closed by client".to_string(),
                            });
                            break;
                        }
                        LoopExit::Lost(reason) => {
                            warn!(target: "Channel", "Connection lost: {reason}");
                            self.publish(ChannelEvent::Disconnected { reason });
                        }
                        LoopExit::Rejected(reason) => self.reject(reason),
                    }
                }
                Err(ChannelError::Rejected(reason)) => self.reject(reason),
                Err(e) => warn!(target: "Channel", "Failed to connect: {e}"),
            }

            if !self.is_running.load(Ordering::Relaxed)
                || !self.enable_auto_reconnect.load(Ordering::Relaxed)
            {
                info!(target: "Channel", "Auto-reconnect disabled, shutting down.");
                break;
            }

            let attempt = self.auto_reconnect_errors.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.config.reconnect_delay(attempt);
            info!(target: "Channel", "Will attempt to reconnect in {delay:?} (attempt {attempt})");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown_notifier.notified() => break,
            }
        }

        info!(target: "Channel", "Channel run loop has shut down.");
    }

    fn reject(&self, reason: String) {
        warn!(target: "Channel", "Server rejected the connection: {reason}");
        self.enable_auto_reconnect.store(false, Ordering::Relaxed);
        self.publish(ChannelEvent::Rejected { reason });
    }

    async fn connect_once(&self) -> Result<Connection, ChannelError> {
        let (transport, mut events) = self
            .factory
            .create_transport(&self.url)
            .await
            .map_err(ChannelError::Transport)?;

        match tokio::time::timeout(
            self.config.handshake_timeout,
            self.handshake(&transport, &mut events),
        )
        .await
        {
            Ok(Ok(open)) => Ok((transport, events, open)),
            Ok(Err(e)) => {
                transport.disconnect().await;
                Err(e)
            }
            Err(_) => {
                transport.disconnect().await;
                Err(ChannelError::HandshakeTimeout)
            }
        }
    }

    /// Engine.IO open, then the Socket.IO namespace connect.
    async fn handshake(
        &self,
        transport: &Arc<dyn Transport>,
        events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<OpenHandshake, ChannelError> {
        let mut open = None;
        loop {
            let text = match events.recv().await {
                Some(TransportEvent::TextReceived(text)) => text,
                Some(TransportEvent::Connected) => continue,
                Some(TransportEvent::Disconnected) | None => {
                    return Err(ChannelError::Disconnected);
                }
            };

            match EnginePacket::decode(&text)? {
                EnginePacket::Open(handshake) => {
                    debug!(target: "Channel", "Engine.IO open: {handshake:?}");
                    send_packet(transport, &EnginePacket::Message(SocketPacket::Connect(None)))
                        .await?;
                    open = Some(handshake);
                }
                EnginePacket::Ping => send_packet(transport, &EnginePacket::Pong).await?,
                EnginePacket::Message(SocketPacket::Connect(_)) => {
                    if let Some(handshake) = open.take() {
                        return Ok(handshake);
                    }
                    debug!(target: "Channel", "Namespace connect before open, ignoring");
                }
                EnginePacket::Message(SocketPacket::ConnectError(detail)) => {
                    return Err(ChannelError::Rejected(rejection_reason(&detail)));
                }
                EnginePacket::Close => return Err(ChannelError::Disconnected),
                other => trace!(target: "Channel", "Ignoring {other:?} during handshake"),
            }
        }
    }

    async fn read_loop(
        &self,
        transport: &Arc<dyn Transport>,
        mut events: mpsc::Receiver<TransportEvent>,
        liveness: Duration,
    ) -> LoopExit {
        let watchdog = sleep(liveness);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Channel", "Shutdown signaled, leaving read loop.");
                    return LoopExit::Shutdown;
                }
                _ = &mut watchdog => {
                    return LoopExit::Lost(format!("no traffic for {liveness:?}"));
                }
                event = events.recv() => match event {
                    Some(TransportEvent::TextReceived(text)) => {
                        watchdog.as_mut().reset(Instant::now() + liveness);
                        if let Some(exit) = self.handle_frame(transport, &text).await {
                            return exit;
                        }
                    }
                    Some(TransportEvent::Connected) => {
                        trace!(target: "Channel", "Transport connected event received");
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        return LoopExit::Lost("transport closed".to_string());
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, transport: &Arc<dyn Transport>, text: &str) -> Option<LoopExit> {
        let packet = match EnginePacket::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(target: "Channel", "Skipping undecodable frame: {e}");
                return None;
            }
        };

        match packet {
            EnginePacket::Ping => {
                if let Err(e) = send_packet(transport, &EnginePacket::Pong).await {
                    return Some(LoopExit::Lost(format!("pong failed: {e}")));
                }
            }
            EnginePacket::Close => return Some(LoopExit::Lost("server closed".to_string())),
            EnginePacket::Message(SocketPacket::Disconnect) => {
                return Some(LoopExit::Lost("server disconnected the namespace".to_string()));
            }
            EnginePacket::Message(SocketPacket::ConnectError(detail)) => {
                return Some(LoopExit::Rejected(rejection_reason(&detail)));
            }
            EnginePacket::Message(SocketPacket::Event { name, args }) => {
                match InboundEvent::decode(&name, args) {
                    Ok(Some(event)) => self.publish(ChannelEvent::Inbound(event)),
                    Ok(None) => {}
                    Err(e) => warn!(target: "Channel", "Dropping malformed '{name}': {e}"),
                }
            }
            other => trace!(target: "Channel", "Ignoring {other:?}"),
        }
        None
    }

    async fn send_event(&self, transport: &Arc<dyn Transport>, event: OutboundEvent) {
        let name = event.name();
        let result = match event.to_packet() {
            Ok(packet) => send_packet(transport, &EnginePacket::Message(packet)).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => debug!(target: "Channel", "--> {name}"),
            Err(e) => warn!(target: "Channel", "Failed to emit '{name}': {e}"),
        }
    }

    async fn cleanup_connection_state(&self) {
        self.is_connected.store(false, Ordering::Relaxed);
        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
    }

    /// Leaves the rooms, closes the connection and stops reconnecting.
    pub async fn disconnect(&self) {
        info!(target: "Channel", "Disconnecting channel intentionally.");
        self.enable_auto_reconnect.store(false, Ordering::Relaxed);
        if self.is_connected() {
            self.emit(OutboundEvent::LeaveDm).await;
        }
        self.is_running.store(false, Ordering::Relaxed);
        self.shutdown_notifier.notify_one();
        self.cleanup_connection_state().await;
    }
}

#[async_trait]
impl ChannelSender for Channel {
    async fn emit(&self, event: OutboundEvent) {
        let transport = self.transport.lock().await.clone();
        match transport.filter(|_| self.is_connected()) {
            Some(transport) => self.send_event(&transport, event).await,
            None => debug!(target: "Channel", "Not connected, dropping '{}'", event.name()),
        }
    }
}

async fn send_packet(transport: &Arc<dyn Transport>, packet: &EnginePacket) -> Result<(), ChannelError> {
    let text = packet.encode()?;
    transport
        .send_text(&text)
        .await
        .map_err(ChannelError::Transport)
}

fn rejection_reason(detail: &Value) -> String {
    detail
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| detail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockConnection, MockTransportFactory};
    use dmcore::types::UserId;
    use tokio::sync::mpsc::UnboundedReceiver;

    const URL: &str = "ws://localhost:5000/socket.io/?EIO=4&transport=websocket&token=t";

    fn start() -> (
        Arc<Channel>,
        broadcast::Receiver<ChannelEvent>,
        Arc<MockTransportFactory>,
        UnboundedReceiver<MockConnection>,
    ) {
        let (factory, conns) = MockTransportFactory::new();
        let (channel, events) =
            Channel::connect(factory.clone(), URL.to_string(), &ClientConfig::default());
        (channel, events, factory, conns)
    }

    async fn accept(conns: &mut UnboundedReceiver<MockConnection>) -> MockConnection {
        let mut conn = conns.recv().await.expect("channel should dial");
        conn.accept(25_000, 20_000).await;
        assert_eq!(conn.next_sent().await.as_deref(), Some(r#"42["join_dm"]"#));
        conn
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_joins_rooms_and_delivers_events() {
        let (channel, mut events, _factory, mut conns) = start();
        let conn = accept(&mut conns).await;
        assert_eq!(conn.url, URL);

        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Connected { resumed: false }
        );
        assert!(channel.is_connected());

        conn.push(r#"42["friend_online",{"user_id":12}]"#).await;
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Inbound(InboundEvent::FriendOnline(UserId(12)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn answers_server_pings() {
        let (_channel, _events, _factory, mut conns) = start();
        let mut conn = accept(&mut conns).await;
        conn.push("2").await;
        assert_eq!(conn.next_sent().await.as_deref(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_and_rejoins() {
        let (_channel, mut events, factory, mut conns) = start();
        let conn = accept(&mut conns).await;
        assert!(matches!(events.recv().await.unwrap(), ChannelEvent::Connected { .. }));

        let dropped_at = Instant::now();
        conn.drop_connection().await;
        assert!(matches!(
            events.recv().await.unwrap(),
            ChannelEvent::Disconnected { .. }
        ));

        let _conn = accept(&mut conns).await;
        assert!(dropped_at.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Connected { resumed: true }
        );
        assert_eq!(factory.dials(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dials_back_off_linearly() {
        let (factory, mut conns) = MockTransportFactory::new();
        factory.refuse_next(2);
        let started = Instant::now();
        let (_channel, _events) =
            Channel::connect(factory.clone(), URL.to_string(), &ClientConfig::default());

        let _conn = accept(&mut conns).await;
        // 2s after the first failure, 4s after the second.
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert_eq!(factory.dials(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_stops_reconnecting() {
        let (channel, mut events, factory, mut conns) = start();
        let mut conn = conns.recv().await.unwrap();
        conn.push(r#"0{"sid":"s","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#)
            .await;
        assert_eq!(conn.next_sent().await.as_deref(), Some("40"));
        conn.push(r#"44{"message":"Connection rejected by server"}"#).await;

        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Rejected {
                reason: "Connection rejected by server".to_string()
            }
        );
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(factory.dials(), 1);
        assert!(!channel.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_trips_the_watchdog() {
        let (_channel, mut events, factory, mut conns) = start();
        let mut conn = conns.recv().await.unwrap();
        conn.accept(1_000, 500).await;
        assert_eq!(conn.next_sent().await.as_deref(), Some(r#"42["join_dm"]"#));
        assert!(matches!(events.recv().await.unwrap(), ChannelEvent::Connected { .. }));

        let ChannelEvent::Disconnected { reason } = events.recv().await.unwrap() else {
            panic!("expected disconnect");
        };
        assert!(reason.contains("no traffic"));
        let _again = accept(&mut conns).await;
        assert_eq!(factory.dials(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_leaves_rooms_and_stops() {
        let (channel, mut events, factory, mut conns) = start();
        let mut conn = accept(&mut conns).await;
        assert!(matches!(events.recv().await.unwrap(), ChannelEvent::Connected { .. }));

        channel.disconnect().await;
        assert_eq!(conn.next_sent().await.as_deref(), Some(r#"42["leave_dm"]"#));
        assert!(matches!(
            events.recv().await.unwrap(),
            ChannelEvent::Disconnected { .. }
        ));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(factory.dials(), 1);
        assert!(!channel.is_connected());

        // Emitting after close is dropped quietly.
        channel.emit(OutboundEvent::JoinDm).await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_skipped() {
        let (_channel, mut events, _factory, mut conns) = start();
        let conn = accept(&mut conns).await;
        assert!(matches!(events.recv().await.unwrap(), ChannelEvent::Connected { .. }));

        conn.push("42not json").await;
        conn.push(r#"42["friend_offline",{"nope":1}]"#).await;
        conn.push(r#"42["friend_offline",{"user_id":3}]"#).await;
        assert_eq!(
            events.recv().await.unwrap(),
            ChannelEvent::Inbound(InboundEvent::FriendOffline(UserId(3)))
        );
    }
}
