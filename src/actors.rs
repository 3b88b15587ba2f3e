// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Actor-based router dispatcher using Tokio
//!
//! The dispatcher is the single owner of the dispatch core, the channel
//! table and the router state. Listener, channel tasks, service hosts and
//! the application all talk to it by posting [`RouterMessage`]s into its
//! queue, which it processes strictly in order.

use crate::address::Cookie;
use crate::channel::{ChannelConfig, ChannelWriter, DEFAULT_CHANNEL_QUEUE, spawn_channel};
use crate::descriptor::DescriptorCatalog;
use crate::envelope::{Envelope, MAX_ENVELOPE_SIZE};
use crate::error::{RouterError, TransportError};
use crate::logging::{LogSink, Severity, TracingSink, scope};
use crate::router::{Delivery, RouterCore, RouterStatus};
use crate::state::{ControlSignal, RouterState, RouterStateMachine};
use crate::transport::Listener;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Handle for sending messages to an actor
#[derive(Debug)]
pub struct ActorHandle<T> {
    pub sender: mpsc::Sender<T>,
}

impl<T> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> ActorHandle<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, msg: T) -> Result<(), RouterError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| RouterError::ChannelClosed)
    }

    /// Posts without waiting; fails when the queue is full or closed
    pub fn try_send(&self, msg: T) -> Result<(), RouterError> {
        self.sender
            .try_send(msg)
            .map_err(|_| RouterError::ChannelClosed)
    }

    /// Posts from a thread outside the runtime
    pub fn blocking_send(&self, msg: T) -> Result<(), RouterError> {
        self.sender
            .blocking_send(msg)
            .map_err(|_| RouterError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Messages for the router dispatcher
#[derive(Debug)]
pub enum RouterMessage {
    Control {
        signal: ControlSignal,
        response: Option<mpsc::Sender<bool>>,
    },
    ChannelAccepted {
        stream: TcpStream,
        peer: SocketAddr,
    },
    Envelope {
        cookie: Cookie,
        envelope: Envelope,
    },
    ChannelClosed {
        cookie: Cookie,
        reason: Option<String>,
    },
    AttachLocal {
        response: mpsc::Sender<mpsc::Receiver<Envelope>>,
    },
    GetState {
        response: mpsc::Sender<RouterState>,
    },
    GetStatus {
        response: mpsc::Sender<RouterStatus>,
    },
    GetListenAddress {
        response: mpsc::Sender<Option<SocketAddr>>,
    },
}

pub type RouterHandle = ActorHandle<RouterMessage>;

impl ActorHandle<RouterMessage> {
    /// Posts a control signal and waits for the outcome
    pub async fn control(&self, signal: ControlSignal) -> Result<bool, RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.send(RouterMessage::Control {
            signal,
            response: Some(tx),
        })
        .await?;
        rx.recv().await.ok_or(RouterError::ChannelClosed)
    }

    pub async fn state(&self) -> Result<RouterState, RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.send(RouterMessage::GetState { response: tx }).await?;
        rx.recv().await.ok_or(RouterError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<RouterStatus, RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.send(RouterMessage::GetStatus { response: tx }).await?;
        rx.recv().await.ok_or(RouterError::ChannelClosed)
    }

    /// Address the listener is bound to while running
    pub async fn listen_address(&self) -> Result<Option<SocketAddr>, RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.send(RouterMessage::GetListenAddress { response: tx })
            .await?;
        rx.recv().await.ok_or(RouterError::ChannelClosed)
    }

    /// Attaches the in-process endpoint; returns its inbound queue
    pub async fn attach_local(&self) -> Result<mpsc::Receiver<Envelope>, RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        self.send(RouterMessage::AttachLocal { response: tx }).await?;
        rx.recv().await.ok_or(RouterError::ChannelClosed)
    }

    /// Posts an envelope from the in-process endpoint
    pub async fn post_local(&self, envelope: Envelope) -> Result<(), RouterError> {
        self.send(RouterMessage::Envelope {
            cookie: Cookie::LOCAL,
            envelope,
        })
        .await
    }
}

/// Settings of the dispatcher
#[derive(Clone)]
pub struct RouterSettings {
    /// Listening address; `None` routes in-process traffic only
    pub listen_address: Option<String>,
    pub max_envelope_size: usize,
    /// Depth of the dispatcher queue
    pub queue_capacity: usize,
    /// Envelopes queued towards one peer before its channel is closed
    pub channel_queue_capacity: usize,
    pub log_sink: Arc<dyn LogSink>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            listen_address: None,
            max_envelope_size: MAX_ENVELOPE_SIZE,
            queue_capacity: 256,
            channel_queue_capacity: DEFAULT_CHANNEL_QUEUE,
            log_sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for RouterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterSettings")
            .field("listen_address", &self.listen_address)
            .field("max_envelope_size", &self.max_envelope_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("channel_queue_capacity", &self.channel_queue_capacity)
            .finish_non_exhaustive()
    }
}

struct ChannelSlot {
    writer: ChannelWriter,
    token: Option<CancellationToken>,
}

/// Router Actor - the single-threaded dispatcher
pub struct RouterActor {
    core: RouterCore,
    machine: RouterStateMachine,
    settings: RouterSettings,
    channel_config: ChannelConfig,
    log: Arc<dyn LogSink>,
    receiver: mpsc::Receiver<RouterMessage>,
    handle: RouterHandle,
    channels: HashMap<Cookie, ChannelSlot>,
    listener: Option<Listener>,
    quit: CancellationToken,
}

impl RouterActor {
    /// Creates the actor and the handle posting into it
    ///
    /// `quit` is cancelled when the router asks the process to end.
    pub fn new(
        settings: RouterSettings,
        descriptors: DescriptorCatalog,
        quit: CancellationToken,
    ) -> (Self, RouterHandle) {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let handle = ActorHandle::new(sender);
        let log = settings.log_sink.clone();
        let channel_config =
            ChannelConfig::new(settings.max_envelope_size, settings.channel_queue_capacity)
                .with_log_sink(log.clone());
        let actor = Self {
            core: RouterCore::new(descriptors).with_log_sink(log.clone()),
            machine: RouterStateMachine::new().with_log_sink(log.clone()),
            settings,
            channel_config,
            log,
            receiver,
            handle: handle.clone(),
            channels: HashMap::new(),
            listener: None,
            quit,
        };
        (actor, handle)
    }

    /// Receiver of every accepted state transition
    pub fn watch_state(&self) -> watch::Receiver<RouterState> {
        self.machine.watch()
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                RouterMessage::Control { signal, response } => {
                    let accepted = self.on_control(signal).await;
                    if let Some(response) = response {
                        let _ = response.send(accepted).await;
                    }
                    if signal == ControlSignal::Shutdown {
                        break;
                    }
                }
                RouterMessage::ChannelAccepted { stream, peer } => {
                    self.on_channel_accepted(stream, peer);
                }
                RouterMessage::Envelope { cookie, envelope } => {
                    let deliveries = self.core.dispatch(cookie, envelope);
                    self.deliver(deliveries);
                }
                RouterMessage::ChannelClosed { cookie, reason } => {
                    if let Some(reason) = reason {
                        self.log.log_message(
                            Severity::Warning,
                            scope::CHANNEL,
                            &format!("Channel {} failed: {}", cookie, reason),
                        );
                    }
                    self.close_channel(cookie);
                }
                RouterMessage::AttachLocal { response } => {
                    let (writer, queue) = mpsc::channel(self.channel_config.queue_capacity);
                    let cookie = self.core.attach_local();
                    self.channels
                        .insert(cookie, ChannelSlot { writer, token: None });
                    let _ = response.send(queue).await;
                }
                RouterMessage::GetState { response } => {
                    let _ = response.send(self.machine.state()).await;
                }
                RouterMessage::GetStatus { response } => {
                    let _ = response.send(self.core.status()).await;
                }
                RouterMessage::GetListenAddress { response } => {
                    let address = self.listener.as_ref().map(Listener::local_addr);
                    let _ = response.send(address).await;
                }
            }
        }

        self.close_listener();
        for cookie in self.core.cookies() {
            self.close_channel(cookie);
        }
        tracing::info!("Router dispatcher stopped");
    }

    async fn on_control(&mut self, signal: ControlSignal) -> bool {
        tracing::debug!(signal = %signal, state = %self.machine.state(), "Control signal");
        match signal {
            ControlSignal::Start => self.start().await,
            ControlSignal::Pause => self.pause(),
            ControlSignal::Continue => self.resume().await,
            ControlSignal::Stop => {
                let stopped = self.stop();
                if stopped {
                    self.quit.cancel();
                }
                stopped
            }
            ControlSignal::Shutdown => {
                if self.machine.state() == RouterState::Running {
                    self.stop();
                }
                self.quit.cancel();
                true
            }
        }
    }

    async fn start(&mut self) -> bool {
        if !self.machine.set_state(RouterState::Starting) {
            return false;
        }
        match self.open_transport().await {
            Ok(()) => self.machine.set_state(RouterState::Running),
            Err(e) => {
                self.log.log_message(
                    Severity::Error,
                    scope::ROUTER,
                    &format!("Failed to start message routing: {}", e),
                );
                self.quit.cancel();
                false
            }
        }
    }

    fn pause(&mut self) -> bool {
        if !self.machine.set_state(RouterState::Pausing) {
            return false;
        }
        self.close_listener();
        self.close_remote_channels();
        self.machine.set_state(RouterState::Paused)
    }

    async fn resume(&mut self) -> bool {
        if !self.machine.set_state(RouterState::Continuing) {
            return false;
        }
        match self.open_transport().await {
            Ok(()) => self.machine.set_state(RouterState::Running),
            Err(e) => {
                self.log.log_message(
                    Severity::Error,
                    scope::ROUTER,
                    &format!("Failed to resume message routing: {}", e),
                );
                self.quit.cancel();
                false
            }
        }
    }

    fn stop(&mut self) -> bool {
        if !self.machine.set_state(RouterState::Stopping) {
            return false;
        }
        self.close_listener();
        self.close_remote_channels();
        self.machine.set_state(RouterState::Stopped)
    }

    /// Opens the listener if one is configured
    async fn open_transport(&mut self) -> Result<(), TransportError> {
        let Some(address) = self.settings.listen_address.clone() else {
            tracing::info!("No listening address configured, routing in-process only");
            return Ok(());
        };
        let listener =
            Listener::bind(&address, self.handle.clone(), CancellationToken::new()).await?;
        self.listener = Some(listener);
        Ok(())
    }

    fn close_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.close();
        }
    }

    fn close_remote_channels(&mut self) {
        for cookie in self.core.cookies() {
            if cookie.is_remote() {
                self.close_channel(cookie);
            }
        }
    }

    fn on_channel_accepted(&mut self, stream: TcpStream, peer: SocketAddr) {
        if !self.machine.state().accepts_channels() {
            tracing::debug!(peer = %peer, state = %self.machine.state(), "Refusing channel");
            return;
        }

        let cookie = self.core.attach_channel(peer.to_string());
        let token = CancellationToken::new();
        let writer = spawn_channel(
            stream,
            &self.channel_config,
            self.handle.sender.clone(),
            move |envelope| RouterMessage::Envelope { cookie, envelope },
            move |reason| RouterMessage::ChannelClosed { cookie, reason },
            token.clone(),
        );
        self.channels.insert(
            cookie,
            ChannelSlot {
                writer,
                token: Some(token),
            },
        );
    }

    /// Detaches a channel and informs its former peers
    fn close_channel(&mut self, cookie: Cookie) {
        if let Some(slot) = self.channels.remove(&cookie)
            && let Some(token) = slot.token
        {
            token.cancel();
        }
        let deliveries = self.core.detach_channel(cookie);
        self.deliver(deliveries);
    }

    /// Queues deliveries; a channel whose queue is full is closed
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        let mut overflowed = Vec::new();
        for Delivery { cookie, envelope } in deliveries {
            let Some(slot) = self.channels.get(&cookie) else {
                tracing::debug!(cookie = %cookie, "Delivery to closed channel dropped");
                continue;
            };
            match slot.writer.try_send(envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    if !overflowed.contains(&cookie) {
                        overflowed.push(cookie);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(cookie = %cookie, "Channel writer gone");
                }
            }
        }

        for cookie in overflowed {
            self.log.log_message(
                Severity::Warning,
                scope::CHANNEL,
                &format!("Channel {} is not reading, closing it", cookie),
            );
            self.close_channel(cookie);
        }
    }
}

/// Spawns a dispatcher task
pub fn spawn_router(
    settings: RouterSettings,
    descriptors: DescriptorCatalog,
    quit: CancellationToken,
) -> (RouterHandle, tokio::task::JoinHandle<()>) {
    let (actor, handle) = RouterActor::new(settings, descriptors, quit);
    let task = tokio::spawn(actor.run());
    (handle, task)
}
