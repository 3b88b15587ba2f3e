// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Router client
//!
//! The component side of a channel. A client keeps one connection to the
//! router, converts inbound envelopes into [`ClientEvent`]s and listener
//! callbacks, and survives router restarts: on connection loss it arms a
//! fixed-interval reconnect timer and, once connected again, replays the
//! connect announcements it had sent.

use crate::actors::ActorHandle;
use crate::address::RoleAddress;
use crate::channel::{ChannelConfig, ChannelWriter, spawn_channel};
use crate::envelope::{Envelope, MessageType, NotifyCommand, ResultCode};
use crate::error::RouterError;
use crate::timer::{TimerEvent, TimerManager, TimerSet};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Default interval between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

const RECONNECT_TIMER: u32 = 1;

/// Data delivered to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDelivery {
    pub source: RoleAddress,
    pub target: RoleAddress,
    pub message_id: u32,
    pub result: ResultCode,
    pub payload: Bytes,
    pub sequence_nr: u32,
}

impl From<Envelope> for DataDelivery {
    fn from(envelope: Envelope) -> Self {
        Self {
            source: envelope.source,
            target: envelope.target,
            message_id: envelope.message_id,
            result: envelope.result,
            payload: envelope.payload,
            sequence_nr: envelope.sequence_nr,
        }
    }
}

/// What a client observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection to the router is up
    Connected,
    /// The connection to the router was lost
    Disconnected,
    /// Outcome of a provider registration
    Registered {
        provider: RoleAddress,
        result: ResultCode,
    },
    /// Availability of a provider as seen by one of our consumers
    ServiceStatus {
        provider: RoleAddress,
        consumer: RoleAddress,
        connected: bool,
    },
    /// A consumer connected to or left one of our providers
    ConsumerStatus {
        provider: RoleAddress,
        consumer: RoleAddress,
        connected: bool,
    },
    /// A request forwarded to one of our providers
    Request(Envelope),
    /// A response or attribute notification
    Data(DataDelivery),
}

/// Callbacks of a component using the client
pub trait ServiceListener: Send + Sync {
    fn on_service_status(&self, provider: &RoleAddress, connected: bool);
    fn on_data(&self, delivery: &DataDelivery);
}

/// Messages for the client actor
#[derive(Debug)]
pub enum ClientMessage {
    Send(Envelope),
    Inbound { generation: u64, envelope: Envelope },
    Closed { generation: u64, reason: Option<String> },
    Timer(TimerEvent),
    IsConnected { response: mpsc::Sender<bool> },
    Shutdown { response: mpsc::Sender<()> },
}

impl From<TimerEvent> for ClientMessage {
    fn from(event: TimerEvent) -> Self {
        ClientMessage::Timer(event)
    }
}

/// Settings of a router client
#[derive(Clone)]
pub struct ClientConfig {
    pub router_address: String,
    pub reconnect: Duration,
    pub listeners: Vec<Arc<dyn ServiceListener>>,
    pub channel: ChannelConfig,
}

impl ClientConfig {
    pub fn new(router_address: impl Into<String>) -> Self {
        Self {
            router_address: router_address.into(),
            reconnect: DEFAULT_RECONNECT_INTERVAL,
            listeners: Vec::new(),
            channel: ChannelConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: Duration) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ServiceListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// Client actor - owns the connection to the router
pub struct RouterClientActor {
    config: ClientConfig,
    receiver: mpsc::Receiver<ClientMessage>,
    sender: mpsc::Sender<ClientMessage>,
    timers: TimerSet<ClientMessage>,
    events: mpsc::UnboundedSender<ClientEvent>,
    writer: Option<(ChannelWriter, CancellationToken)>,
    generation: u64,
    /// Connect envelopes replayed after a reconnect
    announcements: Vec<Envelope>,
}

impl RouterClientActor {
    pub async fn run(mut self) {
        self.connect().await;

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                ClientMessage::Send(envelope) => self.send(envelope),
                ClientMessage::Inbound {
                    generation,
                    envelope,
                } => {
                    if generation == self.generation {
                        self.on_inbound(envelope);
                    }
                }
                ClientMessage::Closed { generation, reason } => {
                    if generation == self.generation && self.writer.is_some() {
                        tracing::info!(reason = ?reason, "Lost connection to router");
                        self.on_lost();
                    }
                }
                ClientMessage::Timer(event) => {
                    if self.timers.is_current(&event) && self.writer.is_none() {
                        self.connect().await;
                    }
                }
                ClientMessage::IsConnected { response } => {
                    let _ = response.send(self.writer.is_some()).await;
                }
                ClientMessage::Shutdown { response } => {
                    self.timers.stop_all();
                    if let Some((_, token)) = self.writer.take() {
                        token.cancel();
                    }
                    let _ = response.send(()).await;
                    break;
                }
            }
        }
    }

    async fn connect(&mut self) {
        match TcpStream::connect(&self.config.router_address).await {
            Ok(stream) => {
                self.generation += 1;
                let generation = self.generation;
                let token = CancellationToken::new();
                let writer = spawn_channel(
                    stream,
                    &self.config.channel,
                    self.sender.clone(),
                    move |envelope| ClientMessage::Inbound {
                        generation,
                        envelope,
                    },
                    move |reason| ClientMessage::Closed { generation, reason },
                    token.clone(),
                );

                for announcement in &self.announcements {
                    if writer.try_send(announcement.clone()).is_err() {
                        tracing::warn!(announcement = %announcement, "Announcement not queued");
                    }
                }
                self.writer = Some((writer, token));
                self.timers.stop_timer(RECONNECT_TIMER);
                tracing::info!(router = %self.config.router_address, "Connected to router");
                let _ = self.events.send(ClientEvent::Connected);
            }
            Err(e) => {
                tracing::debug!(router = %self.config.router_address, error = %e, "Router not reachable");
                self.timers
                    .start_timer(RECONNECT_TIMER, self.config.reconnect, 1);
            }
        }
    }

    fn on_lost(&mut self) {
        if let Some((_, token)) = self.writer.take() {
            token.cancel();
        }
        let _ = self.events.send(ClientEvent::Disconnected);

        for announcement in &self.announcements {
            if !announcement.is_untargeted() && announcement.target != announcement.source {
                for listener in &self.config.listeners {
                    listener.on_service_status(&announcement.target, false);
                }
            }
        }
        self.timers
            .start_timer(RECONNECT_TIMER, self.config.reconnect, 1);
    }

    fn send(&mut self, envelope: Envelope) {
        match envelope.message_type {
            MessageType::Connect => {
                self.forget(&envelope);
                self.announcements.push(envelope.clone());
            }
            MessageType::Disconnect => self.forget(&envelope),
            _ => {}
        }

        let Some((writer, _)) = &self.writer else {
            tracing::debug!(envelope = %envelope, "Not connected, envelope dropped");
            return;
        };
        match writer.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                // The router stopped reading; reconnect and replay
                tracing::warn!(envelope = %envelope, "Send queue full, dropping connection");
                self.on_lost();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Channel writer gone");
            }
        }
    }

    fn forget(&mut self, envelope: &Envelope) {
        self.announcements
            .retain(|a| !(a.source == envelope.source && a.target == envelope.target));
    }

    fn on_inbound(&mut self, envelope: Envelope) {
        let event = match envelope.message_type {
            MessageType::Connect if envelope.source == envelope.target => ClientEvent::Registered {
                provider: envelope.source,
                result: envelope.result,
            },
            MessageType::Connect
                if matches!(
                    envelope.result,
                    ResultCode::ServiceConnected | ResultCode::ServiceDisconnected
                ) =>
            {
                let connected = envelope.result == ResultCode::ServiceConnected;
                for listener in &self.config.listeners {
                    listener.on_service_status(&envelope.source, connected);
                }
                ClientEvent::ServiceStatus {
                    provider: envelope.source,
                    consumer: envelope.target,
                    connected,
                }
            }
            MessageType::Connect => ClientEvent::ConsumerStatus {
                provider: envelope.target,
                consumer: envelope.source,
                connected: true,
            },
            MessageType::Disconnect if envelope.result == ResultCode::DataOk => {
                ClientEvent::ConsumerStatus {
                    provider: envelope.target,
                    consumer: envelope.source,
                    connected: false,
                }
            }
            MessageType::Disconnect => {
                for listener in &self.config.listeners {
                    listener.on_service_status(&envelope.source, false);
                }
                ClientEvent::ServiceStatus {
                    provider: envelope.source,
                    consumer: envelope.target,
                    connected: false,
                }
            }
            MessageType::Request => ClientEvent::Request(envelope),
            MessageType::Response | MessageType::Attribute => {
                let delivery = DataDelivery::from(envelope);
                for listener in &self.config.listeners {
                    listener.on_data(&delivery);
                }
                ClientEvent::Data(delivery)
            }
        };
        let _ = self.events.send(event);
    }
}

/// Handle to a running client
#[derive(Debug, Clone)]
pub struct RouterClient {
    handle: ActorHandle<ClientMessage>,
}

impl RouterClient {
    /// Spawns a client; events arrive on the returned receiver
    pub fn start(
        config: ClientConfig,
        timer_manager: &TimerManager,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (sender, receiver) = mpsc::channel(64);
        let (events, event_rx) = mpsc::unbounded_channel();
        let actor = RouterClientActor {
            config,
            receiver,
            sender: sender.clone(),
            timers: timer_manager.timers(sender.clone()),
            events,
            writer: None,
            generation: 0,
            announcements: Vec::new(),
        };
        tokio::spawn(actor.run());
        (
            Self {
                handle: ActorHandle::new(sender),
            },
            event_rx,
        )
    }

    pub async fn send(&self, envelope: Envelope) -> Result<(), RouterError> {
        self.handle.send(ClientMessage::Send(envelope)).await
    }

    /// Registers `provider` with the router
    pub async fn register_provider(&self, provider: RoleAddress) -> Result<(), RouterError> {
        self.send(Envelope::provider_connect(provider)).await
    }

    pub async fn unregister_provider(&self, provider: RoleAddress) -> Result<(), RouterError> {
        self.send(Envelope::provider_disconnect(provider)).await
    }

    /// Announces `consumer` to `provider`
    pub async fn connect_consumer(
        &self,
        consumer: RoleAddress,
        provider: RoleAddress,
    ) -> Result<(), RouterError> {
        self.send(Envelope::consumer_connect(consumer, provider))
            .await
    }

    pub async fn request(
        &self,
        consumer: RoleAddress,
        provider: RoleAddress,
        message_id: u32,
        sequence_nr: u32,
        payload: impl Into<Bytes>,
    ) -> Result<(), RouterError> {
        self.send(Envelope::request(
            consumer,
            provider,
            message_id,
            sequence_nr,
            payload,
        ))
        .await
    }

    /// Starts or stops notifications of `message_id`
    pub async fn notify(
        &self,
        consumer: RoleAddress,
        provider: RoleAddress,
        message_id: u32,
        command: NotifyCommand,
    ) -> Result<(), RouterError> {
        self.send(Envelope::notify_request(
            consumer, provider, message_id, command,
        ))
        .await
    }

    /// Pushes a new attribute value of `provider`
    pub async fn push_attribute(
        &self,
        provider: RoleAddress,
        message_id: u32,
        payload: impl Into<Bytes>,
    ) -> Result<(), RouterError> {
        self.send(Envelope::attribute_push(provider, message_id, payload))
            .await
    }

    pub async fn invalidate_attribute(
        &self,
        provider: RoleAddress,
        message_id: u32,
    ) -> Result<(), RouterError> {
        self.send(Envelope::attribute_invalidate(provider, message_id))
            .await
    }

    pub async fn is_connected(&self) -> Result<bool, RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.handle
            .send(ClientMessage::IsConnected { response: tx })
            .await?;
        rx.recv().await.ok_or(RouterError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.handle
            .send(ClientMessage::Shutdown { response: tx })
            .await?;
        rx.recv().await.ok_or(RouterError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    use crate::codec::EnvelopeCodec;

    #[derive(Default)]
    struct Recorder {
        status: Mutex<Vec<(RoleAddress, bool)>>,
    }

    impl ServiceListener for Recorder {
        fn on_service_status(&self, provider: &RoleAddress, connected: bool) {
            self.status
                .lock()
                .unwrap()
                .push((provider.clone(), connected));
        }

        fn on_data(&self, _delivery: &DataDelivery) {}
    }

    fn calc() -> RoleAddress {
        RoleAddress::new("Calc", "Server1")
    }

    fn me() -> RoleAddress {
        RoleAddress::new("Calc", "Client")
    }

    #[tokio::test]
    async fn test_announcements_are_replayed_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorder = Arc::new(Recorder::default());

        let config = ClientConfig::new(addr.to_string())
            .with_reconnect(Duration::from_millis(20))
            .with_listener(recorder.clone());
        let timers = TimerManager::new();
        let (client, mut events) = RouterClient::start(config, &timers);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);

        let (stream, _) = listener.accept().await.unwrap();
        let mut router = Framed::new(stream, EnvelopeCodec::new());
        client.connect_consumer(me(), calc()).await.unwrap();
        let first = router.next().await.unwrap().unwrap().unwrap();
        assert_eq!(first, Envelope::consumer_connect(me(), calc()));

        // Router tells the consumer the service is up, then goes away
        router
            .send(Envelope::notice(MessageType::Connect, calc(), me(), ResultCode::ServiceConnected))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::ServiceStatus {
                provider: calc(),
                consumer: me(),
                connected: true
            }
        );
        drop(router);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Disconnected);

        let (stream, _) = listener.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);
        let mut router = Framed::new(stream, EnvelopeCodec::new());
        let replayed = router.next().await.unwrap().unwrap().unwrap();
        assert_eq!(replayed, Envelope::consumer_connect(me(), calc()));

        let status = recorder.status.lock().unwrap().clone();
        assert_eq!(status, vec![(calc(), true), (calc(), false)]);

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_retries_until_router_appears() {
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let config = ClientConfig::new(addr.to_string()).with_reconnect(Duration::from_millis(20));
        let timers = TimerManager::new();
        let (client, mut events) = RouterClient::start(config, &timers);
        assert!(!client.is_connected().await.unwrap());

        let listener = TcpListener::bind(addr).await.unwrap();
        let _accepted = listener.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);
        assert!(client.is_connected().await.unwrap());
    }
}
