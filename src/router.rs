// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Router Dispatch Core
//!
//! Owns the registry and the channel table and decides, for every inbound
//! envelope, where it goes. The core is synchronous and does no I/O: it
//! turns one inbound envelope into a list of [`Delivery`] values, which the
//! dispatcher actor writes to the channels in order.

use crate::address::{Cookie, CookieGenerator, RoleAddress};
use crate::descriptor::{DescriptorCatalog, IdCheck, MessageKind};
use crate::envelope::{Envelope, MessageType, NotifyCommand, ResultCode};
use crate::error::RegistryError;
use crate::logging::{LogSink, Severity, TracingSink, scope};
use crate::registry::{AttributeUpdate, RegisterOutcome, ServiceRegistry, SubscribeOutcome};
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

pub use crate::registry::Delivery;

/// One attached channel
#[derive(Debug, Clone)]
pub struct ChannelEntry {
    /// Peer description (socket address or "local")
    pub peer: String,
    /// Roles the peer has sent from
    pub roles: BTreeSet<RoleAddress>,
    pub received: u64,
    pub sent: u64,
}

impl ChannelEntry {
    fn new(peer: String) -> Self {
        Self {
            peer,
            roles: BTreeSet::new(),
            received: 0,
            sent: 0,
        }
    }
}

/// Snapshot of one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub cookie: u64,
    pub peer: String,
    pub roles: Vec<String>,
    pub received: u64,
    pub sent: u64,
}

/// Snapshot of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub address: String,
    pub cookie: u64,
    pub subscriptions: usize,
    pub consumers: usize,
}

/// Snapshot of the dispatch core
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStatus {
    pub channels: Vec<ChannelStatus>,
    pub providers: Vec<ProviderStatus>,
    pub waiting: usize,
    pub pending: usize,
}

/// The dispatch core
pub struct RouterCore {
    registry: ServiceRegistry,
    channels: HashMap<Cookie, ChannelEntry>,
    cookies: CookieGenerator,
    log: Arc<dyn LogSink>,
}

impl fmt::Debug for RouterCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterCore")
            .field("registry", &self.registry)
            .field("channels", &self.channels)
            .field("cookies", &self.cookies)
            .finish_non_exhaustive()
    }
}

impl RouterCore {
    pub fn new(descriptors: DescriptorCatalog) -> Self {
        Self {
            registry: ServiceRegistry::new(descriptors),
            channels: HashMap::new(),
            cookies: CookieGenerator::new(),
            log: Arc::new(TracingSink),
        }
    }

    /// Sends dropped and rejected traffic to `log`
    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    fn warn(&self, text: String) {
        self.log.log_message(Severity::Warning, scope::ROUTER, &text);
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Adds a channel and hands out its cookie
    pub fn attach_channel(&mut self, peer: impl Into<String>) -> Cookie {
        let cookie = self.cookies.next_cookie();
        let peer = peer.into();
        tracing::info!(cookie = %cookie, peer = %peer, "Channel attached");
        self.channels.insert(cookie, ChannelEntry::new(peer));
        cookie
    }

    /// Adds the in-process endpoint of the router
    pub fn attach_local(&mut self) -> Cookie {
        self.channels
            .entry(Cookie::LOCAL)
            .or_insert_with(|| ChannelEntry::new("local".to_string()));
        Cookie::LOCAL
    }

    pub fn is_attached(&self, cookie: Cookie) -> bool {
        self.channels.contains_key(&cookie)
    }

    pub fn channel(&self, cookie: Cookie) -> Option<&ChannelEntry> {
        self.channels.get(&cookie)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Cookies of every attached channel
    pub fn cookies(&self) -> Vec<Cookie> {
        let mut cookies: Vec<Cookie> = self.channels.keys().copied().collect();
        cookies.sort();
        cookies
    }

    /// Removes a channel and runs the disconnect path
    ///
    /// The peer may have been a provider and a consumer at the same time,
    /// so both sides of its registry state are dropped.
    pub fn detach_channel(&mut self, cookie: Cookie) -> Vec<Delivery> {
        let Some(channel) = self.channels.remove(&cookie) else {
            return Vec::new();
        };

        let lost = self.registry.unregister_provider(cookie);
        let dropped = self.registry.unsubscribe_all(cookie);
        tracing::info!(
            cookie = %cookie,
            peer = %channel.peer,
            notified = lost.len(),
            dropped,
            "Channel detached"
        );
        self.deliverable(lost)
    }

    /// Routes one inbound envelope
    pub fn dispatch(&mut self, cookie: Cookie, envelope: Envelope) -> Vec<Delivery> {
        let Some(channel) = self.channels.get_mut(&cookie) else {
            self.warn(format!("Envelope from unknown channel {} dropped", cookie));
            return Vec::new();
        };
        channel.received += 1;
        if !envelope.source.is_empty() {
            channel.roles.insert(envelope.source.clone());
        }

        tracing::trace!(cookie = %cookie, envelope = %envelope, "Dispatching");
        let deliveries = match envelope.message_type {
            MessageType::Connect => self.on_connect(cookie, envelope),
            MessageType::Disconnect => self.on_disconnect(cookie, envelope),
            MessageType::Request => self.on_request(cookie, envelope),
            MessageType::Attribute if envelope.is_untargeted() => {
                self.on_attribute_push(cookie, envelope)
            }
            MessageType::Attribute => self.on_notify_control(cookie, envelope),
            MessageType::Response => self.on_response(cookie, envelope),
        };
        self.deliverable(deliveries)
    }

    /// Keeps deliveries to attached channels and counts them
    fn deliverable(&mut self, deliveries: Vec<Delivery>) -> Vec<Delivery> {
        deliveries
            .into_iter()
            .filter(|delivery| match self.channels.get_mut(&delivery.cookie) {
                Some(channel) => {
                    channel.sent += 1;
                    true
                }
                None => false,
            })
            .collect()
    }

    fn on_connect(&mut self, cookie: Cookie, envelope: Envelope) -> Vec<Delivery> {
        if envelope.is_untargeted() || envelope.target == envelope.source {
            self.register_provider(cookie, envelope.source)
        } else {
            self.connect_consumer(cookie, envelope)
        }
    }

    fn register_provider(&mut self, cookie: Cookie, address: RoleAddress) -> Vec<Delivery> {
        let channels = &self.channels;
        let outcome = self
            .registry
            .register_provider(address.clone(), cookie, |owner| {
                channels.contains_key(&owner)
            });

        let mut deliveries = Vec::new();
        match outcome {
            RegisterOutcome::AlreadyExists { owner } => {
                self.warn(format!(
                    "Provider {} from channel {} refused, held by live channel {}",
                    address, cookie, owner
                ));
                deliveries.push(Delivery::new(
                    cookie,
                    status_notice(&address, &address, ResultCode::RequestError),
                ));
                return deliveries;
            }
            RegisterOutcome::Replaced { stale, lost } => {
                tracing::info!(provider = %address, stale = %stale, "Replaced stale provider");
                deliveries.extend(lost);
            }
            RegisterOutcome::Added => {
                tracing::info!(provider = %address, cookie = %cookie, "Provider registered");
            }
            RegisterOutcome::Refreshed => {}
        }

        deliveries.push(Delivery::new(
            cookie,
            status_notice(&address, &address, ResultCode::ServiceConnected),
        ));

        // Queued interest replay
        for (waiting_cookie, consumer) in self.registry.take_waiting(&address) {
            if !self.channels.contains_key(&waiting_cookie) {
                continue;
            }
            self.registry
                .connect_consumer(&address, waiting_cookie, consumer.clone());
            deliveries.push(Delivery::new(
                waiting_cookie,
                status_notice(&address, &consumer, ResultCode::ServiceConnected),
            ));
        }
        deliveries
    }

    fn connect_consumer(&mut self, cookie: Cookie, envelope: Envelope) -> Vec<Delivery> {
        let provider = envelope.target.clone();
        let consumer = envelope.source.clone();
        let available = self
            .registry
            .connect_consumer(&provider, cookie, consumer.clone());

        let result = if available {
            ResultCode::ServiceConnected
        } else {
            ResultCode::ServiceDisconnected
        };
        let mut deliveries = vec![Delivery::new(
            cookie,
            status_notice(&provider, &consumer, result),
        )];

        // Let the provider know who is connected
        if let Some(provider_cookie) = self.registry.lookup_provider(&provider) {
            deliveries.push(Delivery::new(provider_cookie, envelope));
        }
        deliveries
    }

    fn on_disconnect(&mut self, cookie: Cookie, envelope: Envelope) -> Vec<Delivery> {
        if envelope.is_untargeted() || envelope.target == envelope.source {
            let address = envelope.source;
            let mut deliveries = match self.registry.unregister_address(&address, cookie) {
                Ok(lost) => {
                    tracing::info!(provider = %address, cookie = %cookie, "Provider unregistered");
                    lost
                }
                Err(e) => {
                    self.warn(format!("Ignoring provider disconnect: {}", e));
                    Vec::new()
                }
            };
            self.registry.unsubscribe_consumer(cookie, &address);
            // A role leaving its own provider must not be notified by the
            // channel it is leaving through
            deliveries.retain(|d| !(d.cookie == cookie && d.envelope.target == address));
            deliveries
        } else {
            let provider = envelope.target.clone();
            self.registry
                .disconnect_consumer(&provider, cookie, &envelope.source);
            match self.registry.lookup_provider(&provider) {
                Some(provider_cookie) => vec![Delivery::new(provider_cookie, envelope)],
                None => Vec::new(),
            }
        }
    }

    fn on_request(&mut self, cookie: Cookie, envelope: Envelope) -> Vec<Delivery> {
        if !self.accepts(&envelope.target.service, envelope.message_id, MessageKind::Request) {
            self.warn(format!("Request with unknown message id dropped: {}", envelope));
            return Vec::new();
        }

        match self.registry.lookup_provider(&envelope.target) {
            Some(provider_cookie) => {
                self.registry.track_request(cookie, &envelope);
                vec![Delivery::new(provider_cookie, envelope)]
            }
            None => {
                tracing::debug!(target = %envelope.target, "Request to unavailable service");
                self.registry
                    .add_waiting(envelope.target.clone(), cookie, envelope.source.clone());
                let reply =
                    Envelope::response_to(&envelope, ResultCode::ServiceUnavailable, Bytes::new());
                vec![Delivery::new(cookie, reply)]
            }
        }
    }

    fn on_notify_control(&mut self, cookie: Cookie, envelope: Envelope) -> Vec<Delivery> {
        let command = match NotifyCommand::from_payload(&envelope.payload) {
            Ok(command) => command,
            Err(e) => {
                self.warn(format!("Notification request {} dropped: {}", envelope, e));
                return Vec::new();
            }
        };

        let provider = envelope.target.clone();
        let consumer = envelope.source.clone();
        let message_id = envelope.message_id;

        if command == NotifyCommand::Stop {
            self.registry
                .unsubscribe(&provider, cookie, &consumer, message_id);
            return Vec::new();
        }

        let notify_always = command == NotifyCommand::StartAlways;
        match self
            .registry
            .subscribe(&provider, cookie, consumer.clone(), message_id, notify_always)
        {
            Ok(outcome) => {
                if let SubscribeOutcome::AlreadyPresent { cached: None } = outcome {
                    tracing::debug!(provider = %provider, consumer = %consumer, message_id, "Already subscribed");
                }
                match outcome.cached() {
                    Some(value) => vec![Delivery::new(
                        cookie,
                        notification(&provider, &consumer, message_id, ResultCode::DataOk, value.clone()),
                    )],
                    None => Vec::new(),
                }
            }
            Err(RegistryError::ServiceUnavailable(_)) => {
                self.registry.add_waiting(provider, cookie, consumer);
                vec![Delivery::new(
                    cookie,
                    Envelope::response_to(&envelope, ResultCode::ServiceUnavailable, Bytes::new()),
                )]
            }
            Err(e) => {
                self.warn(format!("Subscription rejected: {}", e));
                vec![Delivery::new(
                    cookie,
                    Envelope::response_to(&envelope, ResultCode::InvalidIdentifier, Bytes::new()),
                )]
            }
        }
    }

    fn on_attribute_push(&mut self, cookie: Cookie, envelope: Envelope) -> Vec<Delivery> {
        let provider = envelope.source.clone();
        let (update, result) = if envelope.result == ResultCode::DataInvalid {
            (AttributeUpdate::Invalid, ResultCode::DataInvalid)
        } else {
            (
                AttributeUpdate::Valid(envelope.payload.clone()),
                ResultCode::DataOk,
            )
        };

        match self
            .registry
            .update_attribute(cookie, &provider, envelope.message_id, update)
        {
            Ok(subscribers) => subscribers
                .into_iter()
                .map(|subscriber| {
                    let payload = match result {
                        ResultCode::DataOk => envelope.payload.clone(),
                        _ => Bytes::new(),
                    };
                    Delivery::new(
                        subscriber.cookie,
                        notification(&provider, &subscriber.consumer, envelope.message_id, result, payload),
                    )
                })
                .collect(),
            Err(e) => {
                self.warn(format!("Attribute update {} dropped: {}", envelope, e));
                Vec::new()
            }
        }
    }

    /// Routes a reply or broadcast sent by a provider
    ///
    /// Only the channel owning `envelope.source` may answer for it. A reply
    /// that still carries its request id is renumbered to the declared
    /// response id.
    fn on_response(&mut self, cookie: Cookie, mut envelope: Envelope) -> Vec<Delivery> {
        let service = envelope.source.service.clone();
        match self.registry.descriptors().check(&service, envelope.message_id) {
            IdCheck::Known(MessageKind::Attribute) => {
                if self.registry.lookup_provider(&envelope.source) != Some(cookie) {
                    self.warn(format!("Attribute from non-owner channel {} dropped: {}", cookie, envelope));
                    return Vec::new();
                }
                let push = Envelope {
                    message_type: MessageType::Attribute,
                    target: RoleAddress::empty(),
                    ..envelope
                };
                return self.on_attribute_push(cookie, push);
            }
            IdCheck::Known(MessageKind::Request) => {
                if let Some(response_id) = self
                    .registry
                    .descriptors()
                    .get(&service)
                    .and_then(|descriptor| descriptor.response_for(envelope.message_id))
                {
                    envelope.message_id = response_id;
                }
            }
            IdCheck::Invalid => {
                self.warn(format!("Response with unknown message id dropped: {}", envelope));
                return Vec::new();
            }
            IdCheck::Unchecked | IdCheck::Known(MessageKind::Response) => {}
        }

        if self.registry.lookup_provider(&envelope.source) != Some(cookie) {
            self.warn(format!("Response from non-owner channel {} dropped: {}", cookie, envelope));
            return Vec::new();
        }

        let mut deliveries = Vec::new();
        let mut answered: Option<(Cookie, RoleAddress)> = None;

        if !envelope.is_untargeted() {
            let requester_cookie = self
                .registry
                .complete_request(&envelope.target, envelope.sequence_nr)
                .map(|pending| pending.requester_cookie)
                .or_else(|| self.host_of(&envelope.target));
            match requester_cookie {
                Some(requester_cookie) => {
                    answered = Some((requester_cookie, envelope.target.clone()));
                    deliveries.push(Delivery::new(requester_cookie, envelope.clone()));
                }
                None => {
                    tracing::debug!(envelope = %envelope, "No requester for response");
                }
            }
        }

        match self
            .registry
            .record_response(cookie, &envelope.source, envelope.message_id)
        {
            Ok(subscribers) => {
                for subscriber in subscribers {
                    let key = (subscriber.cookie, subscriber.consumer.clone());
                    if answered.as_ref() == Some(&key) {
                        continue;
                    }
                    deliveries.push(Delivery::new(
                        subscriber.cookie,
                        envelope.clone_for_target(&subscriber.consumer),
                    ));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Response not broadcast");
            }
        }
        deliveries
    }

    /// Channel that has sent from `role`
    fn host_of(&self, role: &RoleAddress) -> Option<Cookie> {
        let mut hosts: Vec<Cookie> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.roles.contains(role))
            .map(|(cookie, _)| *cookie)
            .collect();
        hosts.sort();
        hosts.pop()
    }

    fn accepts(&self, service: &str, message_id: u32, kind: MessageKind) -> bool {
        match self.registry.descriptors().check(service, message_id) {
            IdCheck::Unchecked => true,
            IdCheck::Known(known) => known == kind,
            IdCheck::Invalid => false,
        }
    }

    /// Builds a serializable snapshot
    pub fn status(&self) -> RouterStatus {
        let mut channels: Vec<ChannelStatus> = self
            .channels
            .iter()
            .map(|(cookie, channel)| ChannelStatus {
                cookie: cookie.value(),
                peer: channel.peer.clone(),
                roles: channel.roles.iter().map(ToString::to_string).collect(),
                received: channel.received,
                sent: channel.sent,
            })
            .collect();
        channels.sort_by_key(|channel| channel.cookie);

        let providers = self
            .registry
            .providers()
            .into_iter()
            .map(|entry| ProviderStatus {
                address: entry.address.to_string(),
                cookie: entry.cookie.value(),
                subscriptions: entry.subscription_count(),
                consumers: entry.consumer_count(),
            })
            .collect();

        RouterStatus {
            channels,
            providers,
            waiting: self.registry.waiting_count(),
            pending: self.registry.pending_count(),
        }
    }
}

/// Service availability notice sent to `to`
fn status_notice(provider: &RoleAddress, to: &RoleAddress, result: ResultCode) -> Envelope {
    Envelope::notice(MessageType::Connect, provider.clone(), to.clone(), result)
}

/// Attribute notification delivered to one subscriber
fn notification(
    provider: &RoleAddress,
    consumer: &RoleAddress,
    message_id: u32,
    result: ResultCode,
    payload: Bytes,
) -> Envelope {
    Envelope::new(
        MessageType::Response,
        provider.clone(),
        consumer.clone(),
        message_id,
        0,
        payload,
    )
    .with_result(result)
}
