// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Addressing and identity
//!
//! A [`RoleAddress`] names one logical service endpoint independently of
//! the process hosting it. A [`Cookie`] names one physical connection to
//! the router.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Logical address of a service endpoint
///
/// Equality, ordering and hashing only consider `service` and `role`. The
/// channel hint travels on the wire but does not change which endpoint is
/// addressed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleAddress {
    /// Name of the service interface (e.g. "Calc")
    pub service: String,
    /// Role name, unique per hosting process (e.g. "Server1")
    pub role: String,
    /// Thread or channel hint of the hosting component
    #[serde(default)]
    pub channel_hint: String,
}

impl RoleAddress {
    /// Creates an address without a channel hint
    pub fn new(service: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            role: role.into(),
            channel_hint: String::new(),
        }
    }

    /// Creates an address carrying a channel hint
    pub fn with_hint(
        service: impl Into<String>,
        role: impl Into<String>,
        channel_hint: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            role: role.into(),
            channel_hint: channel_hint.into(),
        }
    }

    /// The empty address, used as "no target"
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true when neither service nor role is set
    pub fn is_empty(&self) -> bool {
        self.service.is_empty() && self.role.is_empty()
    }
}

impl PartialEq for RoleAddress {
    fn eq(&self, other: &Self) -> bool {
        self.service == other.service && self.role == other.role
    }
}

impl Eq for RoleAddress {}

impl Hash for RoleAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service.hash(state);
        self.role.hash(state);
    }
}

impl PartialOrd for RoleAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RoleAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.service
            .cmp(&other.service)
            .then_with(|| self.role.cmp(&other.role))
    }
}

impl fmt::Display for RoleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service, self.role)
    }
}

/// Router-assigned connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cookie(pub u64);

impl Cookie {
    /// No connection
    pub const UNKNOWN: Cookie = Cookie(0);
    /// The in-process endpoint of the router
    pub const LOCAL: Cookie = Cookie(1);
    /// Any peer
    pub const ANY: Cookie = Cookie(u64::MAX);
    /// First cookie handed out to an accepted connection
    pub const FIRST_REMOTE: Cookie = Cookie(256);

    /// Returns the raw value
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns true for cookies assigned to accepted connections
    pub fn is_remote(self) -> bool {
        self.0 >= Self::FIRST_REMOTE.0 && self != Self::ANY
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Cookie::UNKNOWN => write!(f, "unknown"),
            Cookie::LOCAL => write!(f, "local"),
            Cookie::ANY => write!(f, "any"),
            Cookie(value) => write!(f, "#{}", value),
        }
    }
}

/// Monotonic cookie generator
///
/// Cookies are never reused during one router run, so a stale reference
/// can never address a newer connection.
#[derive(Debug)]
pub struct CookieGenerator {
    next: u64,
}

impl CookieGenerator {
    pub fn new() -> Self {
        Self {
            next: Cookie::FIRST_REMOTE.0,
        }
    }

    /// Hands out the next cookie
    pub fn next_cookie(&mut self) -> Cookie {
        let cookie = Cookie(self.next);
        self.next += 1;
        cookie
    }
}

impl Default for CookieGenerator {
    fn default() -> Self {
        Self::new()
    }
}
