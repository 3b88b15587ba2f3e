// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Router lifecycle state machine

use crate::logging::{LogSink, Severity, TracingSink, scope};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle state of the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RouterState {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Continuing,
    Stopping,
}

impl RouterState {
    pub const ALL: [RouterState; 7] = [
        RouterState::Stopped,
        RouterState::Starting,
        RouterState::Running,
        RouterState::Pausing,
        RouterState::Paused,
        RouterState::Continuing,
        RouterState::Stopping,
    ];

    /// Returns true when `self -> to` is a legal edge
    pub fn can_transition_to(self, to: RouterState) -> bool {
        use RouterState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Running, Pausing)
                | (Running, Stopping)
                | (Pausing, Paused)
                | (Paused, Continuing)
                | (Continuing, Running)
                | (Stopping, Stopped)
        )
    }

    /// Returns true while new channels are accepted
    pub fn accepts_channels(self) -> bool {
        self == RouterState::Running
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouterState::Stopped => "stopped",
            RouterState::Starting => "starting",
            RouterState::Running => "running",
            RouterState::Pausing => "pausing",
            RouterState::Paused => "paused",
            RouterState::Continuing => "continuing",
            RouterState::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}

/// External lifecycle triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Start,
    Stop,
    Pause,
    Continue,
    /// Stop, then quit the process
    Shutdown,
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Holds the router state and publishes every accepted transition
pub struct RouterStateMachine {
    state: RouterState,
    publisher: watch::Sender<RouterState>,
    log: Arc<dyn LogSink>,
}

impl fmt::Debug for RouterStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterStateMachine")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RouterStateMachine {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(RouterState::Stopped);
        Self {
            state: RouterState::Stopped,
            publisher,
            log: Arc::new(TracingSink),
        }
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Subscribes to state changes
    pub fn watch(&self) -> watch::Receiver<RouterState> {
        self.publisher.subscribe()
    }

    /// Moves to `to` if the edge is legal
    ///
    /// An illegal request is logged and leaves the state unchanged.
    pub fn set_state(&mut self, to: RouterState) -> bool {
        if !self.state.can_transition_to(to) {
            self.log.log_message(
                Severity::Warning,
                scope::ROUTER,
                &format!("Rejected router state transition {} -> {}", self.state, to),
            );
            return false;
        }
        self.log.log_message(
            Severity::Info,
            scope::ROUTER,
            &format!("Router state changed {} -> {}", self.state, to),
        );
        self.state = to;
        self.publisher.send_replace(to);
        true
    }
}

impl Default for RouterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut machine = RouterStateMachine::new();
        for to in [
            RouterState::Starting,
            RouterState::Running,
            RouterState::Pausing,
            RouterState::Paused,
            RouterState::Continuing,
            RouterState::Running,
            RouterState::Stopping,
            RouterState::Stopped,
            RouterState::Starting,
        ] {
            assert!(machine.set_state(to), "edge to {} rejected", to);
        }
    }

    #[test]
    fn test_stop_from_paused_is_rejected() {
        let mut machine = RouterStateMachine::new();
        machine.set_state(RouterState::Starting);
        machine.set_state(RouterState::Running);
        machine.set_state(RouterState::Pausing);
        machine.set_state(RouterState::Paused);
        assert!(!machine.set_state(RouterState::Stopping));
        assert_eq!(machine.state(), RouterState::Paused);
    }

    #[test]
    fn test_watch_sees_accepted_transitions_only() {
        let mut machine = RouterStateMachine::new();
        let watcher = machine.watch();
        assert!(!machine.set_state(RouterState::Running));
        assert_eq!(*watcher.borrow(), RouterState::Stopped);
        machine.set_state(RouterState::Starting);
        assert_eq!(*watcher.borrow(), RouterState::Starting);
    }

    #[test]
    fn test_rejected_transition_is_logged_to_sink() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recorded(Mutex<Vec<(Severity, u32, String)>>);

        impl LogSink for Recorded {
            fn log_message(&self, severity: Severity, scope_id: u32, text: &str) {
                self.0.lock().unwrap().push((severity, scope_id, text.to_string()));
            }
        }

        let log = Arc::new(Recorded::default());
        let mut machine = RouterStateMachine::new().with_log_sink(log.clone());
        assert!(!machine.set_state(RouterState::Paused));
        assert!(machine.set_state(RouterState::Starting));

        let lines = log.0.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, Severity::Warning);
        assert_eq!(lines[0].1, scope::ROUTER);
        assert!(lines[0].2.contains("Rejected"));
        assert_eq!(lines[1].0, Severity::Info);
    }
}
