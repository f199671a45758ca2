use crate::channel::Channel;
use crate::client::Client;
use crate::config::ClientConfig;
use crate::http::{HttpClient, UreqHttpClient};
use crate::rest::{DmApi, RestClient};
use crate::transport::{TokioWebSocketTransportFactory, TransportFactory};
use crate::types::events::{Event, EventHandler};
use anyhow::Result;
use dmcore::protocol::ChannelEvent;
use log::{info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

type EventHandlerCallback =
    Arc<dyn Fn(Event, Arc<Client>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct MessengerEventHandler {
    client: Arc<Client>,
    event_handler: Option<EventHandlerCallback>,
}

impl EventHandler for MessengerEventHandler {
    fn handle_event(&self, event: &Event) {
        if let Some(handler) = &self.event_handler {
            let handler_clone = handler.clone();
            let event_clone = event.clone();
            let client_clone = self.client.clone();

            tokio::spawn(async move {
                handler_clone(event_clone, client_clone).await;
            });
        }
    }
}

/// A wired-up messaging session: the push channel feeding a [`Client`].
pub struct Messenger {
    client: Arc<Client>,
    channel: Arc<Channel>,
    channel_events: Option<broadcast::Receiver<ChannelEvent>>,
    event_handler: Option<EventHandlerCallback>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Messenger {
    pub fn builder() -> MessengerBuilder {
        MessengerBuilder::new()
    }

    pub fn client(&self) -> Arc<Client> {
        self.client.clone()
    }

    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Starts the channel and the pump that applies its events in order, then
    /// seeds presence and lists conversations. Returns the channel's run task.
    pub async fn run(&mut self) -> Result<JoinHandle<()>> {
        let handler = Arc::new(MessengerEventHandler {
            client: self.client.clone(),
            event_handler: self.event_handler.take(),
        });
        self.client.event_bus.add_handler(handler);

        let mut events = self
            .channel_events
            .take()
            .ok_or_else(|| anyhow::anyhow!("Messenger is already running"))?;
        let pump_client = self.client.clone();
        let pump = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => pump_client.handle_channel_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "Messenger", "Pump lagged by {skipped} events, re-listing conversations");
                        if let Err(e) = pump_client.refresh_conversations().await {
                            warn!(target: "Messenger", "Directory refresh failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!(target: "Messenger", "Event pump shut down.");
        });
        *self.pump.lock().await = Some(pump);

        let channel_handle = self.channel.start();

        let (presence, directory) = tokio::join!(
            self.client.seed_presence(),
            self.client.refresh_conversations()
        );
        if let Err(e) = presence {
            warn!(target: "Messenger", "Presence seed failed: {e}");
        }
        if let Err(e) = directory {
            warn!(target: "Messenger", "Initial conversation list failed: {e}");
        }

        Ok(channel_handle)
    }

    /// Closes the session and presence, then the channel.
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
        self.channel.disconnect().await;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        info!(target: "Messenger", "Messenger shut down.");
    }
}

#[derive(Default)]
pub struct MessengerBuilder {
    event_handler: Option<EventHandlerCallback>,
    config: Option<ClientConfig>,
    credential: Option<String>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    http_client: Option<Arc<dyn HttpClient>>,
    api: Option<Arc<dyn DmApi>>,
}

impl MessengerBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Event, Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_handler = Some(Arc::new(move |event, client| {
            Box::pin(handler(event, client))
        }));
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The bearer token used for both the REST calls and the channel.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: TransportFactory + 'static,
    {
        self.transport_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_http_client<C>(mut self, client: C) -> Self
    where
        C: HttpClient + 'static,
    {
        self.http_client = Some(Arc::new(client));
        self
    }

    /// Replaces the REST client entirely. Takes precedence over
    /// [`Self::with_http_client`].
    pub fn with_api(mut self, api: Arc<dyn DmApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn build(self) -> Result<Messenger> {
        let credential = self
            .credential
            .ok_or_else(|| anyhow::anyhow!("A credential is required to build a Messenger"))?;
        let config = self.config.unwrap_or_default();

        let api = match self.api {
            Some(api) => api,
            None => {
                let http = self
                    .http_client
                    .unwrap_or_else(|| Arc::new(UreqHttpClient::new()));
                Arc::new(RestClient::new(http, config.clone(), credential.clone()))
            }
        };
        let factory = self
            .transport_factory
            .unwrap_or_else(|| Arc::new(TokioWebSocketTransportFactory::new()));

        let url = config.channel_url(&credential)?;
        let channel = Channel::new(factory, url, &config);
        let channel_events = channel.subscribe();

        info!(target: "Messenger", "Creating client for {}", config.base_url);
        let client = Client::new(config, api, channel.clone());

        Ok(Messenger {
            client,
            channel,
            channel_events: Some(channel_events),
            event_handler: self.event_handler,
            pump: Mutex::new(None),
        })
    }
}
