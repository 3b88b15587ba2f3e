// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Service descriptors
//!
//! A descriptor is the message-id table of one service interface: which
//! ids are requests (and which response answers each), which are responses
//! and which are attributes. The dispatch core stays generic and consults
//! the table instead of per-interface code.

use crate::envelope::is_reserved_id;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Role of a message id within an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Attribute,
}

/// One request entry as declared in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry {
    pub id: u32,
    #[serde(default)]
    pub response: Option<u32>,
}

/// Message-id table of one service interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service interface name
    pub name: String,
    #[serde(default)]
    pub requests: Vec<RequestEntry>,
    #[serde(default)]
    pub responses: BTreeSet<u32>,
    #[serde(default)]
    pub attributes: BTreeSet<u32>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares a request, optionally answered by `response`
    pub fn with_request(mut self, id: u32, response: Option<u32>) -> Self {
        self.requests.retain(|entry| entry.id != id);
        self.requests.push(RequestEntry { id, response });
        if let Some(response) = response {
            self.responses.insert(response);
        }
        self
    }

    /// Declares a response that is not bound to a request (a broadcast)
    pub fn with_response(mut self, id: u32) -> Self {
        self.responses.insert(id);
        self
    }

    pub fn with_attribute(mut self, id: u32) -> Self {
        self.attributes.insert(id);
        self
    }

    /// Classifies a message id; reserved and undeclared ids yield `None`
    pub fn kind_of(&self, message_id: u32) -> Option<MessageKind> {
        if is_reserved_id(message_id) {
            return None;
        }
        if self.attributes.contains(&message_id) {
            Some(MessageKind::Attribute)
        } else if self.responses.contains(&message_id)
            || self.requests.iter().any(|entry| entry.response == Some(message_id))
        {
            Some(MessageKind::Response)
        } else if self.requests.iter().any(|entry| entry.id == message_id) {
            Some(MessageKind::Request)
        } else {
            None
        }
    }

    /// Response id answering `request_id`, if the request expects one
    pub fn response_for(&self, request_id: u32) -> Option<u32> {
        self.requests
            .iter()
            .find(|entry| entry.id == request_id)
            .and_then(|entry| entry.response)
    }

    /// Ids a consumer may subscribe to: attributes and responses
    pub fn is_notifiable(&self, message_id: u32) -> bool {
        matches!(
            self.kind_of(message_id),
            Some(MessageKind::Attribute) | Some(MessageKind::Response)
        )
    }

    /// Checks that the id spaces do not overlap
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeMap::new();
        let requests = self.requests.iter().map(|entry| (entry.id, "request"));
        let responses = self.responses.iter().map(|id| (*id, "response"));
        let attributes = self.attributes.iter().map(|id| (*id, "attribute"));

        for (id, kind) in requests.chain(responses).chain(attributes) {
            if is_reserved_id(id) {
                return Err(format!("{}: id {} is reserved", self.name, id));
            }
            if let Some(previous) = seen.insert(id, kind) {
                return Err(format!(
                    "{}: id {} declared as both {} and {}",
                    self.name, id, previous, kind
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of checking an id against the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdCheck {
    /// The service has no descriptor; routed permissively
    Unchecked,
    /// The id is declared with this kind
    Known(MessageKind),
    /// The id is reserved or not part of the interface
    Invalid,
}

/// Descriptors of all known service interfaces
#[derive(Debug, Clone, Default)]
pub struct DescriptorCatalog {
    by_name: HashMap<String, Arc<ServiceDescriptor>>,
}

impl DescriptorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing one with the same name
    pub fn insert(&mut self, descriptor: ServiceDescriptor) -> Result<(), String> {
        descriptor.validate()?;
        self.by_name
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, service: &str) -> Option<Arc<ServiceDescriptor>> {
        self.by_name.get(service).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Classifies `message_id` for `service`
    pub fn check(&self, service: &str, message_id: u32) -> IdCheck {
        if is_reserved_id(message_id) {
            return IdCheck::Invalid;
        }
        match self.by_name.get(service) {
            None => IdCheck::Unchecked,
            Some(descriptor) => match descriptor.kind_of(message_id) {
                Some(kind) => IdCheck::Known(kind),
                None => IdCheck::Invalid,
            },
        }
    }
}

impl FromIterator<ServiceDescriptor> for DescriptorCatalog {
    fn from_iter<T: IntoIterator<Item = ServiceDescriptor>>(iter: T) -> Self {
        let mut catalog = DescriptorCatalog::new();
        for descriptor in iter {
            if let Err(e) = catalog.insert(descriptor) {
                tracing::warn!(error = %e, "Ignoring invalid service descriptor");
            }
        }
        catalog
    }
}
