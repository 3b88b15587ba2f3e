// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Service Registry
//!
//! Authoritative map from role address to the providing channel, plus the
//! consumer side of every provider: notification subscribers, connected
//! consumers, queued interest in unavailable providers and requests still
//! waiting for their response.
//!
//! The registry never talks to channels. Operations that have to inform
//! peers return [`Delivery`] values for the dispatch core to send.

use crate::address::{Cookie, RoleAddress};
use crate::descriptor::{DescriptorCatalog, IdCheck, MessageKind};
use crate::envelope::{Envelope, MessageType, ResultCode, is_reserved_id};
use crate::error::RegistryError;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// An envelope addressed to one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub cookie: Cookie,
    pub envelope: Envelope,
}

impl Delivery {
    pub fn new(cookie: Cookie, envelope: Envelope) -> Self {
        Self { cookie, envelope }
    }
}

/// Validity of a cached attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    /// Never set by the provider
    Unavailable,
    Ok,
    Invalid,
}

/// Cached attribute value of a provider
#[derive(Debug, Clone)]
pub struct AttributeEntry {
    pub state: DataState,
    pub value: Bytes,
}

impl Default for AttributeEntry {
    fn default() -> Self {
        Self {
            state: DataState::Unavailable,
            value: Bytes::new(),
        }
    }
}

/// New attribute value pushed by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeUpdate {
    Valid(Bytes),
    Invalid,
}

/// One notification target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub cookie: Cookie,
    pub consumer: RoleAddress,
    pub notify_always: bool,
}

/// Registry entry of one provider
#[derive(Debug)]
pub struct ProviderEntry {
    pub address: RoleAddress,
    pub cookie: Cookie,
    attributes: HashMap<u32, AttributeEntry>,
    /// (message id, subscriber cookie, consumer) -> notify always
    subscribers: BTreeMap<(u32, Cookie, RoleAddress), bool>,
    consumers: BTreeSet<(Cookie, RoleAddress)>,
}

impl ProviderEntry {
    fn new(address: RoleAddress, cookie: Cookie) -> Self {
        Self {
            address,
            cookie,
            attributes: HashMap::new(),
            subscribers: BTreeMap::new(),
            consumers: BTreeSet::new(),
        }
    }

    pub fn attribute(&self, message_id: u32) -> Option<&AttributeEntry> {
        self.attributes.get(&message_id)
    }

    /// Subscribers of one message id, in a stable order
    pub fn subscribers_of(&self, message_id: u32) -> Vec<Subscriber> {
        self.subscribers
            .range((message_id, Cookie::UNKNOWN, RoleAddress::empty())..)
            .take_while(|((id, _, _), _)| *id == message_id)
            .map(|((_, cookie, consumer), notify_always)| Subscriber {
                cookie: *cookie,
                consumer: consumer.clone(),
                notify_always: *notify_always,
            })
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    fn cached_value(&self, message_id: u32) -> Option<Bytes> {
        self.attributes
            .get(&message_id)
            .filter(|entry| entry.state == DataState::Ok)
            .map(|entry| entry.value.clone())
    }

    /// Every consumer with any relationship to this provider
    fn related_consumers(&self) -> BTreeSet<(Cookie, RoleAddress)> {
        let mut related = self.consumers.clone();
        for (_, cookie, consumer) in self.subscribers.keys() {
            related.insert((*cookie, consumer.clone()));
        }
        related
    }
}

/// A request forwarded to a provider and not yet answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub requester_cookie: Cookie,
    pub requester: RoleAddress,
    pub provider: RoleAddress,
    pub message_id: u32,
    pub sequence_nr: u32,
}

/// Result of a provider registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New entry created
    Added,
    /// The same cookie registered the address again; state kept
    Refreshed,
    /// A stale entry of a dead channel was replaced
    Replaced { stale: Cookie, lost: Vec<Delivery> },
    /// The address is held by another live channel
    AlreadyExists { owner: Cookie },
}

impl RegisterOutcome {
    pub fn is_registered(&self) -> bool {
        !matches!(self, RegisterOutcome::AlreadyExists { .. })
    }
}

/// Result of a notification start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// New subscriber; carries the cached value if it is valid
    Added { cached: Option<Bytes> },
    /// Known subscriber; carries the cached value only when re-delivery
    /// was requested
    AlreadyPresent { cached: Option<Bytes> },
}

impl SubscribeOutcome {
    pub fn cached(&self) -> Option<&Bytes> {
        match self {
            SubscribeOutcome::Added { cached } | SubscribeOutcome::AlreadyPresent { cached } => {
                cached.as_ref()
            }
        }
    }
}

/// The service registry
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    descriptors: DescriptorCatalog,
    providers: HashMap<RoleAddress, ProviderEntry>,
    waiting: HashMap<RoleAddress, BTreeSet<(Cookie, RoleAddress)>>,
    pending: HashMap<(RoleAddress, u32), PendingRequest>,
}

impl ServiceRegistry {
    pub fn new(descriptors: DescriptorCatalog) -> Self {
        Self {
            descriptors,
            ..Self::default()
        }
    }

    pub fn descriptors(&self) -> &DescriptorCatalog {
        &self.descriptors
    }

    /// Binds `address` to `cookie`
    ///
    /// An address held by another cookie is only taken over when
    /// `is_live` reports that cookie's channel as gone.
    pub fn register_provider<F>(
        &mut self,
        address: RoleAddress,
        cookie: Cookie,
        is_live: F,
    ) -> RegisterOutcome
    where
        F: Fn(Cookie) -> bool,
    {
        match self.providers.get(&address).map(|entry| entry.cookie) {
            None => {
                self.providers
                    .insert(address.clone(), ProviderEntry::new(address, cookie));
                RegisterOutcome::Added
            }
            Some(owner) if owner == cookie => RegisterOutcome::Refreshed,
            Some(owner) if is_live(owner) => RegisterOutcome::AlreadyExists { owner },
            Some(stale) => {
                let lost = self.remove_provider(&address);
                self.providers
                    .insert(address.clone(), ProviderEntry::new(address, cookie));
                RegisterOutcome::Replaced { stale, lost }
            }
        }
    }

    /// Removes every provider hosted by `cookie`
    ///
    /// Returns the loss notifications for all affected consumers.
    pub fn unregister_provider(&mut self, cookie: Cookie) -> Vec<Delivery> {
        let mut addresses: Vec<RoleAddress> = self
            .providers
            .values()
            .filter(|entry| entry.cookie == cookie)
            .map(|entry| entry.address.clone())
            .collect();
        addresses.sort();

        addresses
            .iter()
            .flat_map(|address| self.remove_provider(address))
            .collect()
    }

    /// Removes one provider after checking that `cookie` owns it
    pub fn unregister_address(
        &mut self,
        address: &RoleAddress,
        cookie: Cookie,
    ) -> Result<Vec<Delivery>, RegistryError> {
        match self.providers.get(address) {
            None => Err(RegistryError::ServiceUnavailable(address.clone())),
            Some(entry) if entry.cookie != cookie => Err(RegistryError::NotProvider {
                address: address.clone(),
                cookie,
            }),
            Some(_) => Ok(self.remove_provider(address)),
        }
    }

    fn remove_provider(&mut self, address: &RoleAddress) -> Vec<Delivery> {
        let Some(entry) = self.providers.remove(address) else {
            return Vec::new();
        };

        let mut deliveries = Vec::new();

        // Cancel every request still in flight to this provider
        let mut cancelled: Vec<PendingRequest> = Vec::new();
        self.pending.retain(|_, request| {
            if request.provider == *address {
                cancelled.push(request.clone());
                false
            } else {
                true
            }
        });
        cancelled.sort_by(|a, b| {
            (a.requester_cookie, &a.requester, a.sequence_nr).cmp(&(
                b.requester_cookie,
                &b.requester,
                b.sequence_nr,
            ))
        });

        let mut in_flight = BTreeSet::new();
        for request in &cancelled {
            in_flight.insert((request.requester_cookie, request.requester.clone()));
            let response = Envelope::new(
                MessageType::Response,
                entry.address.clone(),
                request.requester.clone(),
                request.message_id,
                request.sequence_nr,
                Bytes::new(),
            )
            .with_result(ResultCode::RequestCanceled);
            deliveries.push(Delivery::new(request.requester_cookie, response));
        }

        // Exactly one disconnect notice per affected consumer
        let mut affected = entry.related_consumers();
        affected.extend(in_flight.iter().cloned());
        for (cookie, consumer) in &affected {
            let result = if in_flight.contains(&(*cookie, consumer.clone())) {
                ResultCode::RequestCanceled
            } else {
                ResultCode::DataInvalid
            };
            let notice = Envelope::notice(
                MessageType::Disconnect,
                entry.address.clone(),
                consumer.clone(),
                result,
            );
            deliveries.push(Delivery::new(*cookie, notice));
        }

        // Consumers keep their interest and hear about the next provider
        self.waiting
            .entry(address.clone())
            .or_default()
            .extend(affected);

        tracing::debug!(
            provider = %address,
            cookie = %entry.cookie,
            notified = deliveries.len(),
            "Provider removed from registry"
        );
        deliveries
    }

    /// Starts notifications of `message_id` for `consumer`
    pub fn subscribe(
        &mut self,
        provider: &RoleAddress,
        cookie: Cookie,
        consumer: RoleAddress,
        message_id: u32,
        notify_always: bool,
    ) -> Result<SubscribeOutcome, RegistryError> {
        let notifiable = match self.descriptors.get(&provider.service) {
            Some(descriptor) => descriptor.is_notifiable(message_id),
            None => !is_reserved_id(message_id),
        };
        if !notifiable {
            return Err(RegistryError::InvalidIdentifier {
                address: provider.clone(),
                message_id,
            });
        }

        let entry = self
            .providers
            .get_mut(provider)
            .ok_or_else(|| RegistryError::ServiceUnavailable(provider.clone()))?;

        let key = (message_id, cookie, consumer);
        let outcome = match entry.subscribers.get_mut(&key) {
            Some(flag) => {
                *flag = notify_always;
                let cached = if notify_always {
                    entry.cached_value(message_id)
                } else {
                    None
                };
                SubscribeOutcome::AlreadyPresent { cached }
            }
            None => {
                entry.subscribers.insert(key, notify_always);
                SubscribeOutcome::Added {
                    cached: entry.cached_value(message_id),
                }
            }
        };
        Ok(outcome)
    }

    /// Stops notifications of `message_id` for `consumer`
    pub fn unsubscribe(
        &mut self,
        provider: &RoleAddress,
        cookie: Cookie,
        consumer: &RoleAddress,
        message_id: u32,
    ) -> bool {
        self.providers
            .get_mut(provider)
            .map(|entry| {
                entry
                    .subscribers
                    .remove(&(message_id, cookie, consumer.clone()))
                    .is_some()
            })
            .unwrap_or(false)
    }

    /// Drops all consumer-side state of a channel
    pub fn unsubscribe_all(&mut self, cookie: Cookie) -> usize {
        self.drop_consumer_state(|c, _| c == cookie)
    }

    /// Drops all consumer-side state of one role hosted by `cookie`
    pub fn unsubscribe_consumer(&mut self, cookie: Cookie, consumer: &RoleAddress) -> usize {
        self.drop_consumer_state(|c, r| c == cookie && r == consumer)
    }

    fn drop_consumer_state<F>(&mut self, matches: F) -> usize
    where
        F: Fn(Cookie, &RoleAddress) -> bool,
    {
        let mut removed = 0;
        for entry in self.providers.values_mut() {
            let before = entry.subscribers.len() + entry.consumers.len();
            entry
                .subscribers
                .retain(|(_, cookie, consumer), _| !matches(*cookie, consumer));
            entry
                .consumers
                .retain(|(cookie, consumer)| !matches(*cookie, consumer));
            removed += before - entry.subscribers.len() - entry.consumers.len();
        }
        for interested in self.waiting.values_mut() {
            let before = interested.len();
            interested.retain(|(cookie, consumer)| !matches(*cookie, consumer));
            removed += before - interested.len();
        }
        self.waiting.retain(|_, interested| !interested.is_empty());

        let before = self.pending.len();
        self.pending
            .retain(|_, request| !matches(request.requester_cookie, &request.requester));
        removed += before - self.pending.len();
        removed
    }

    /// Stores a pushed attribute value
    ///
    /// Returns the subscribers to notify. A valid value is only fanned out
    /// when it differs from the cache or the cache was not valid; an
    /// invalidation only when the cache was not already invalid.
    pub fn update_attribute(
        &mut self,
        cookie: Cookie,
        provider: &RoleAddress,
        message_id: u32,
        update: AttributeUpdate,
    ) -> Result<Vec<Subscriber>, RegistryError> {
        match self.descriptors.check(&provider.service, message_id) {
            IdCheck::Unchecked | IdCheck::Known(MessageKind::Attribute) => {}
            _ => {
                return Err(RegistryError::InvalidIdentifier {
                    address: provider.clone(),
                    message_id,
                });
            }
        }

        let entry = self.owned_entry_mut(cookie, provider)?;
        let attribute = entry.attributes.entry(message_id).or_default();
        let changed = match update {
            AttributeUpdate::Valid(value) => {
                let changed = attribute.state != DataState::Ok || attribute.value != value;
                attribute.state = DataState::Ok;
                attribute.value = value;
                changed
            }
            AttributeUpdate::Invalid => {
                let changed = attribute.state != DataState::Invalid;
                attribute.state = DataState::Invalid;
                attribute.value = Bytes::new();
                changed
            }
        };

        if changed {
            Ok(entry.subscribers_of(message_id))
        } else {
            Ok(Vec::new())
        }
    }

    /// Returns the subscribers of a broadcast response
    pub fn record_response(
        &mut self,
        cookie: Cookie,
        provider: &RoleAddress,
        message_id: u32,
    ) -> Result<Vec<Subscriber>, RegistryError> {
        let entry = self.owned_entry_mut(cookie, provider)?;
        Ok(entry.subscribers_of(message_id))
    }

    fn owned_entry_mut(
        &mut self,
        cookie: Cookie,
        provider: &RoleAddress,
    ) -> Result<&mut ProviderEntry, RegistryError> {
        let entry = self
            .providers
            .get_mut(provider)
            .ok_or_else(|| RegistryError::ServiceUnavailable(provider.clone()))?;
        if entry.cookie != cookie {
            return Err(RegistryError::NotProvider {
                address: provider.clone(),
                cookie,
            });
        }
        Ok(entry)
    }

    /// Channel currently providing `address`
    pub fn lookup_provider(&self, address: &RoleAddress) -> Option<Cookie> {
        self.providers.get(address).map(|entry| entry.cookie)
    }

    pub fn provider(&self, address: &RoleAddress) -> Option<&ProviderEntry> {
        self.providers.get(address)
    }

    /// All provider entries ordered by address
    pub fn providers(&self) -> Vec<&ProviderEntry> {
        let mut entries: Vec<&ProviderEntry> = self.providers.values().collect();
        entries.sort_by(|a, b| a.address.cmp(&b.address));
        entries
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Records a consumer as connected, or queues it when unavailable
    ///
    /// Returns true when the provider is available.
    pub fn connect_consumer(
        &mut self,
        provider: &RoleAddress,
        cookie: Cookie,
        consumer: RoleAddress,
    ) -> bool {
        match self.providers.get_mut(provider) {
            Some(entry) => {
                entry.consumers.insert((cookie, consumer));
                true
            }
            None => {
                self.add_waiting(provider.clone(), cookie, consumer);
                false
            }
        }
    }

    /// Removes a consumer from one provider and its waiting list
    pub fn disconnect_consumer(
        &mut self,
        provider: &RoleAddress,
        cookie: Cookie,
        consumer: &RoleAddress,
    ) {
        if let Some(entry) = self.providers.get_mut(provider) {
            entry.consumers.remove(&(cookie, consumer.clone()));
            entry
                .subscribers
                .retain(|(_, c, r), _| !(*c == cookie && r == consumer));
        }
        if let Some(interested) = self.waiting.get_mut(provider) {
            interested.remove(&(cookie, consumer.clone()));
            if interested.is_empty() {
                self.waiting.remove(provider);
            }
        }
    }

    /// Queues interest of `consumer` in an unavailable provider
    pub fn add_waiting(&mut self, provider: RoleAddress, cookie: Cookie, consumer: RoleAddress) {
        self.waiting
            .entry(provider)
            .or_default()
            .insert((cookie, consumer));
    }

    /// Takes the queued interest of `provider`
    pub fn take_waiting(&mut self, provider: &RoleAddress) -> Vec<(Cookie, RoleAddress)> {
        self.waiting
            .remove(provider)
            .map(|interested| interested.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.values().map(BTreeSet::len).sum()
    }

    /// Remembers a request forwarded to `provider`
    pub fn track_request(&mut self, requester_cookie: Cookie, request: &Envelope) {
        let pending = PendingRequest {
            requester_cookie,
            requester: request.source.clone(),
            provider: request.target.clone(),
            message_id: request.message_id,
            sequence_nr: request.sequence_nr,
        };
        self.pending
            .insert((request.source.clone(), request.sequence_nr), pending);
    }

    /// Takes the pending request answered by a response
    pub fn complete_request(
        &mut self,
        requester: &RoleAddress,
        sequence_nr: u32,
    ) -> Option<PendingRequest> {
        self.pending.remove(&(requester.clone(), sequence_nr))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
