// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Application bootstrap
//!
//! The [`Application`] is the context object built at process entry. It
//! starts the subsystems in a fixed order (timers, logging, routing) and
//! releases them in reverse. It also carries a small key/value store that
//! components use to share objects by role name.

use crate::actors::{RouterHandle, RouterSettings, spawn_router};
use crate::config::RouterConfiguration;
use crate::descriptor::DescriptorCatalog;
use crate::error::ApplicationError;
use crate::logging::{
    CompositeSink, LogHandle, LogManagerActor, LogManagerConfig, LogMessage, LogSink,
    RemoteLogSink, Severity, TracingSink, scope,
};
use crate::process::ProcessIdentity;
use crate::state::ControlSignal;
use crate::timer::TimerManager;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Queue depth of the log manager
const LOG_QUEUE_CAPACITY: usize = 1024;

/// Value kept in the application storage
pub type StorageValue = Arc<dyn Any + Send + Sync>;

/// Outer lifecycle of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    Stopped,
    Initializing,
    Ready,
    Releasing,
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub struct Application {
    config: RouterConfiguration,
    identity: Arc<dyn ProcessIdentity>,
    state: ApplicationState,
    timers: TimerManager,
    quit: CancellationToken,
    log_sink: Arc<dyn LogSink>,
    log_manager: Option<(LogHandle, JoinHandle<()>)>,
    router: Option<(RouterHandle, JoinHandle<()>)>,
    storage: Mutex<HashMap<String, StorageValue>>,
}

impl Application {
    pub fn new(config: RouterConfiguration, identity: Arc<dyn ProcessIdentity>) -> Self {
        Self {
            config,
            identity,
            state: ApplicationState::Stopped,
            timers: TimerManager::new(),
            quit: CancellationToken::new(),
            log_sink: Arc::new(TracingSink),
            log_manager: None,
            router: None,
            storage: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    pub fn config(&self) -> &RouterConfiguration {
        &self.config
    }

    pub fn identity(&self) -> &dyn ProcessIdentity {
        self.identity.as_ref()
    }

    /// Dispatcher handle while the application is ready
    pub fn router(&self) -> Option<&RouterHandle> {
        self.router.as_ref().map(|(handle, _)| handle)
    }

    /// Cancelled when the router asks the process to end
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    pub fn log_sink(&self) -> Arc<dyn LogSink> {
        self.log_sink.clone()
    }

    pub fn timer_manager(&self) -> &TimerManager {
        &self.timers
    }

    /// Starts timers, logging and routing
    ///
    /// On failure everything started so far is released again and the
    /// application is back in `Stopped`.
    pub async fn initialize(&mut self) -> Result<(), ApplicationError> {
        self.expect_state(ApplicationState::Stopped)?;
        self.state = ApplicationState::Initializing;

        // A previous release shut these down
        if self.timers.is_shut_down() {
            self.timers = TimerManager::new();
        }
        self.quit = CancellationToken::new();

        self.start_logging();

        let descriptors: DescriptorCatalog = self.config.services.iter().cloned().collect();
        let settings = RouterSettings {
            listen_address: Some(self.config.listen_address.clone()),
            max_envelope_size: self.config.max_envelope_size,
            queue_capacity: self.config.queue_capacity,
            channel_queue_capacity: self.config.channel_queue_capacity,
            log_sink: self.log_sink.clone(),
        };
        let (handle, task) = spawn_router(settings, descriptors, self.quit.clone());

        match handle.control(ControlSignal::Start).await {
            Ok(true) => {
                self.router = Some((handle, task));
                self.state = ApplicationState::Ready;
                self.log_sink.log_message(
                    Severity::Info,
                    scope::APPLICATION,
                    &format!("Router ready on {}", self.config.listen_address),
                );
                Ok(())
            }
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    _ => format!("cannot listen on {}", self.config.listen_address),
                };
                self.log_sink
                    .log_message(Severity::Fatal, scope::APPLICATION, &reason);
                let _ = handle.control(ControlSignal::Shutdown).await;
                let _ = task.await;
                self.stop_logging().await;
                self.timers.shutdown();
                self.quit.cancel();
                self.state = ApplicationState::Stopped;
                Err(ApplicationError::RoutingStartFailed(reason))
            }
        }
    }

    /// Stops routing, logging and timers, in that order
    pub async fn release(&mut self) -> Result<(), ApplicationError> {
        self.expect_state(ApplicationState::Ready)?;
        self.state = ApplicationState::Releasing;

        if let Some((handle, task)) = self.router.take() {
            if let Err(e) = handle.control(ControlSignal::Shutdown).await {
                tracing::debug!(error = %e, "Router already gone");
            }
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Router task failed");
            }
        }

        self.stop_logging().await;
        self.timers.shutdown();
        self.quit.cancel();
        self.state = ApplicationState::Stopped;
        tracing::info!("Application released");
        Ok(())
    }

    /// Waits until the router asks the process to end
    pub async fn wait_for_quit(&self) {
        self.quit.cancelled().await;
    }

    fn expect_state(&self, expected: ApplicationState) -> Result<(), ApplicationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ApplicationError::InvalidState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            })
        }
    }

    fn start_logging(&mut self) {
        if !self.config.log_enabled {
            self.log_sink = Arc::new(TracingSink);
            return;
        }

        let config = LogManagerConfig {
            collector: Some(self.config.log_collector.clone()),
            reconnect: Duration::from_millis(self.config.log_reconnect_ms),
            buffer_capacity: self.config.log_buffer_capacity,
        };
        let (actor, handle) = LogManagerActor::new(config, &self.timers, LOG_QUEUE_CAPACITY);
        let task = tokio::spawn(actor.run());

        let remote = RemoteLogSink::new(handle.clone(), self.identity.as_ref());
        self.log_sink = Arc::new(
            CompositeSink::new()
                .with(Arc::new(TracingSink))
                .with(Arc::new(remote)),
        );
        self.log_manager = Some((handle, task));
    }

    async fn stop_logging(&mut self) {
        self.log_sink = Arc::new(TracingSink);
        let Some((handle, task)) = self.log_manager.take() else {
            return;
        };

        let (tx, mut rx) = mpsc::channel(1);
        if handle.send(LogMessage::Shutdown { response: tx }).await.is_ok()
            && let Some(status) = rx.recv().await
        {
            tracing::debug!(sent = status.sent, dropped = status.dropped, "Log manager stopped");
        }
        let _ = task.await;
    }

    fn storage_map(&self) -> MutexGuard<'_, HashMap<String, StorageValue>> {
        self.storage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores `value` under `key`, returning what was there before
    pub fn set_storage(&self, key: impl Into<String>, value: StorageValue) -> Option<StorageValue> {
        self.storage_map().insert(key.into(), value)
    }

    pub fn storage(&self, key: &str) -> Option<StorageValue> {
        self.storage_map().get(key).cloned()
    }

    /// Typed lookup; `None` when missing or of another type
    pub fn storage_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.storage(key)?.downcast::<T>().ok()
    }

    pub fn remove_storage(&self, key: &str) -> Option<StorageValue> {
        self.storage_map().remove(key)
    }
}
