// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! The core library of the multicast message router.
//!
//! Providers register services under role names, consumers connect to
//! them, and the router forwards requests, responses and attribute
//! notifications between the two over framed TCP channels.

// Public module declarations
pub mod actors;
pub mod address;
pub mod application;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod host;
pub mod logging;
pub mod process;
pub mod registry;
pub mod router;
pub mod state;
pub mod timer;
pub mod transport;

// Re-export commonly used types
pub use actors::{
    ActorHandle, RouterActor, RouterHandle, RouterMessage, RouterSettings, spawn_router,
};
pub use address::{Cookie, CookieGenerator, RoleAddress};
pub use application::{Application, ApplicationState};
pub use client::{ClientConfig, ClientEvent, DataDelivery, RouterClient, ServiceListener};
pub use channel::{ChannelConfig, DEFAULT_CHANNEL_QUEUE};
pub use codec::EnvelopeCodec;
pub use config::{
    CliArgs, ConfigProvider, HostCommand, RouterConfiguration, TomlConfigStore,
};
pub use descriptor::{DescriptorCatalog, MessageKind, ServiceDescriptor};
pub use envelope::{Envelope, MessageType, NotifyCommand, ResultCode};
pub use error::{
    ApplicationError, ConfigError, HostError, LogError, ProtocolError, RegistryError,
    RouterError, TransportError,
};
pub use host::{HostKind, InstallSpec, ServiceHost, host_for};
pub use logging::{CompositeSink, LogSink, RemoteLogSink, Severity, TracingSink, init_tracing};
pub use process::{CurrentProcess, ProcessIdentity, StaticIdentity};
pub use registry::ServiceRegistry;
pub use router::{Delivery, RouterCore, RouterStatus};
pub use state::{ControlSignal, RouterState, RouterStateMachine};
pub use timer::{TimerManager, TimerSet};
