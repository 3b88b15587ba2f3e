// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Timer manager
//!
//! Timers never run owner code. A firing timer posts a [`TimerEvent`] into
//! the owner's own actor queue, so it is handled in line with every other
//! message of that actor.
//!
//! Every timer token is a child of the manager's root token. Shutting the
//! manager down cancels all timers of the application.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Repeat until stopped
pub const CONTINUOUS: u32 = u32::MAX;

/// Timer identifier, unique per owner
pub type TimerId = u32;

/// Posted into the owner's queue each time a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub id: TimerId,
    /// Number of times this arming has fired, starting at 1
    pub fired: u32,
    generation: u64,
}

/// Application-wide timer root
#[derive(Debug, Clone, Default)]
pub struct TimerManager {
    root: CancellationToken,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a timer set posting into `sender`
    pub fn timers<E>(&self, sender: mpsc::Sender<E>) -> TimerSet<E>
    where
        E: From<TimerEvent> + Send + 'static,
    {
        TimerSet {
            root: self.root.clone(),
            sender,
            active: HashMap::new(),
            generation: 0,
        }
    }

    /// Cancels every timer created from this manager
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[derive(Debug)]
struct ArmedTimer {
    token: CancellationToken,
    generation: u64,
}

/// The timers of one owner
#[derive(Debug)]
pub struct TimerSet<E> {
    root: CancellationToken,
    sender: mpsc::Sender<E>,
    active: HashMap<TimerId, ArmedTimer>,
    generation: u64,
}

impl<E> TimerSet<E>
where
    E: From<TimerEvent> + Send + 'static,
{
    /// Arms timer `id`, replacing a previous arming of the same id
    ///
    /// The timer fires `fires` times, or forever with [`CONTINUOUS`].
    pub fn start_timer(&mut self, id: TimerId, duration: Duration, fires: u32) {
        self.stop_timer(id);
        if fires == 0 || self.root.is_cancelled() {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let token = self.root.child_token();
        self.active.insert(
            id,
            ArmedTimer {
                token: token.clone(),
                generation,
            },
        );

        let sender = self.sender.clone();
        tokio::spawn(async move {
            let mut fired: u32 = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(duration) => {}
                }
                fired = fired.saturating_add(1);
                let event = TimerEvent {
                    id,
                    fired,
                    generation,
                };
                if sender.send(E::from(event)).await.is_err() {
                    break;
                }
                if fires != CONTINUOUS && fired >= fires {
                    break;
                }
            }
            token.cancel();
        });
    }

    /// Stops timer `id`; returns true if it was armed
    pub fn stop_timer(&mut self, id: TimerId) -> bool {
        match self.active.remove(&id) {
            Some(armed) => {
                let was_running = !armed.token.is_cancelled();
                armed.token.cancel();
                was_running
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.active
            .get(&id)
            .is_some_and(|armed| !armed.token.is_cancelled())
    }

    /// Returns false for events of a stopped or re-armed timer that were
    /// already queued
    pub fn is_current(&self, event: &TimerEvent) -> bool {
        self.active
            .get(&event.id)
            .is_some_and(|armed| armed.generation == event.generation)
    }

    pub fn stop_all(&mut self) {
        for (_, armed) in self.active.drain() {
            armed.token.cancel();
        }
    }
}

impl<E> Drop for TimerSet<E> {
    fn drop(&mut self) {
        for armed in self.active.values() {
            armed.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestMessage {
        Timer(TimerEvent),
    }

    impl From<TimerEvent> for TestMessage {
        fn from(event: TimerEvent) -> Self {
            TestMessage::Timer(event)
        }
    }

    #[tokio::test]
    async fn test_one_shot_timer_fires_once() {
        let manager = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = manager.timers::<TestMessage>(tx);

        timers.start_timer(1, Duration::from_millis(10), 1);
        let TestMessage::Timer(event) = rx.recv().await.unwrap();
        assert_eq!(event.id, 1);
        assert_eq!(event.fired, 1);
        assert!(timers.is_current(&event));

        let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(extra.is_err());
        assert!(!timers.is_active(1));
    }

    #[tokio::test]
    async fn test_continuous_timer_repeats_until_stopped() {
        let manager = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = manager.timers::<TestMessage>(tx);

        timers.start_timer(7, Duration::from_millis(5), CONTINUOUS);
        for expected in 1..=3 {
            let TestMessage::Timer(event) = rx.recv().await.unwrap();
            assert_eq!(event.fired, expected);
        }
        assert!(timers.stop_timer(7));
        assert!(!timers.is_active(7));
    }

    #[tokio::test]
    async fn test_rearm_invalidates_queued_events() {
        let manager = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = manager.timers::<TestMessage>(tx);

        timers.start_timer(1, Duration::from_millis(5), 1);
        let TestMessage::Timer(old) = rx.recv().await.unwrap();
        timers.start_timer(1, Duration::from_secs(60), 1);
        assert!(!timers.is_current(&old));
        assert!(timers.is_active(1));
    }

    #[tokio::test]
    async fn test_manager_shutdown_cancels_all_timers() {
        let manager = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut timers = manager.timers::<TestMessage>(tx);

        timers.start_timer(1, Duration::from_millis(20), CONTINUOUS);
        timers.start_timer(2, Duration::from_millis(20), CONTINUOUS);
        manager.shutdown();
        assert!(!timers.is_active(1));
        assert!(!timers.is_active(2));

        let fired = tokio::time::timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(fired.is_err());

        timers.start_timer(3, Duration::from_millis(1), 1);
        assert!(!timers.is_active(3));
    }
}
