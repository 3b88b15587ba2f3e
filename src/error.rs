// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Error types for the router
//!
//! Errors that only concern one peer relationship are converted into
//! error-carrying response envelopes at the registry/channel boundary.
//! The types below are what remains for the code paths that report
//! failures to their callers.

use crate::address::{Cookie, RoleAddress};
use thiserror::Error;

/// Main error type for router operations
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service host error: {0}")]
    Host(#[from] HostError),

    #[error("Application error: {0}")]
    Application(#[from] ApplicationError),

    #[error("Logging error: {0}")]
    Log(#[from] LogError),

    #[error("Actor channel closed")]
    ChannelClosed,
}

/// Envelope framing and decoding errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame length {length} outside of [{min}, {max}]")]
    FrameLength { length: usize, min: usize, max: usize },

    #[error("Truncated envelope: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Length mismatch: header declares {declared} bytes, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Unknown result code: {0}")]
    UnknownResultCode(u8),

    #[error("Address field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Address field too long: {0} bytes")]
    FieldTooLong(usize),

    #[error("Invalid notification command payload")]
    InvalidNotifyCommand,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Service registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Service not available: {0}")]
    ServiceUnavailable(RoleAddress),

    #[error("Invalid message identifier {message_id} for {address}")]
    InvalidIdentifier {
        address: RoleAddress,
        message_id: u32,
    },

    #[error("Cookie {cookie} is not the provider of {address}")]
    NotProvider { address: RoleAddress, cookie: Cookie },
}

/// Listening transport and channel errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Failed to bind listener: {0}")]
    BindFailed(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse TOML config: {0}")]
    Parse(String),

    #[error("Failed to write config file: {0}")]
    Write(String),

    #[error("Invalid value for [{section}] {key}: {value}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// Service host (console, daemon, OS service) errors
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Service host '{0}' is not supported on this platform")]
    Unsupported(String),

    #[error("Failed to install service: {0}")]
    InstallFailed(String),

    #[error("Failed to uninstall service: {0}")]
    UninstallFailed(String),

    #[error("Failed to register control handler: {0}")]
    RegistrationFailed(String),
}

/// Application bootstrap errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("Invalid application state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Message routing failed to start: {0}")]
    RoutingStartFailed(String),
}

/// Remote logging errors
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Failed to encode log record: {0}")]
    Encode(#[from] postcard::Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RouterError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RouterError::ChannelClosed
    }
}
