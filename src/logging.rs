// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Logging
//!
//! Console output goes through `tracing`. Components that log through the
//! [`LogSink`] contract can additionally feed a remote log collector: the
//! [`LogManagerActor`] owns that connection, buffers records while it is
//! down and retries on a fixed interval. Logging never blocks the caller.

use crate::actors::ActorHandle;
use crate::error::LogError;
use crate::process::ProcessIdentity;
use crate::timer::{TimerEvent, TimerManager, TimerSet};
use bytes::Bytes;
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tracing_subscriber::EnvFilter;

/// Interval between attempts to reach the log collector
pub const LOG_RECONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Scope ids used by the router
pub mod scope {
    pub const ROUTER: u32 = 1;
    pub const CHANNEL: u32 = 2;
    pub const APPLICATION: u32 = 3;
    pub const HOST: u32 = 4;
}

/// Sets up the global `tracing` subscriber
pub fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Destination of log messages
pub trait LogSink: Send + Sync {
    /// Records one message; must return without waiting on I/O
    fn log_message(&self, severity: Severity, scope_id: u32, text: &str);
}

/// Forwards messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log_message(&self, severity: Severity, scope_id: u32, text: &str) {
        match severity {
            Severity::Debug => tracing::debug!(scope = scope_id, "{}", text),
            Severity::Info => tracing::info!(scope = scope_id, "{}", text),
            Severity::Warning => tracing::warn!(scope = scope_id, "{}", text),
            Severity::Error | Severity::Fatal => tracing::error!(scope = scope_id, "{}", text),
        }
    }
}

/// Fans messages out to several sinks
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl LogSink for CompositeSink {
    fn log_message(&self, severity: Severity, scope_id: u32, text: &str) {
        for sink in &self.sinks {
            sink.log_message(severity, scope_id, text);
        }
    }
}

/// One record shipped to the log collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    pub severity: Severity,
    pub scope_id: u32,
    pub process_id: u32,
    pub application: String,
    pub text: String,
}

impl LogRecord {
    /// Encodes the record body; framing is added by the writer
    pub fn encode(&self) -> Result<Bytes, LogError> {
        Ok(Bytes::from(postcard::to_allocvec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LogError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Snapshot of the log manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogStatus {
    pub connected: bool,
    pub buffered: usize,
    pub dropped: u64,
    pub sent: u64,
}

/// Messages for the log manager actor
#[derive(Debug)]
pub enum LogMessage {
    Record(LogRecord),
    Timer(TimerEvent),
    GetStatus {
        response: mpsc::Sender<LogStatus>,
    },
    Shutdown {
        response: mpsc::Sender<LogStatus>,
    },
}

impl From<TimerEvent> for LogMessage {
    fn from(event: TimerEvent) -> Self {
        LogMessage::Timer(event)
    }
}

pub type LogHandle = ActorHandle<LogMessage>;

const RECONNECT_TIMER: u32 = 1;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings of the remote log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Collector address; `None` keeps records local
    pub collector: Option<String>,
    pub reconnect: Duration,
    pub buffer_capacity: usize,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            collector: None,
            reconnect: LOG_RECONNECT_TIMEOUT,
            buffer_capacity: 1024,
        }
    }
}

/// Log manager actor - owns the connection to the log collector
pub struct LogManagerActor {
    config: LogManagerConfig,
    receiver: mpsc::Receiver<LogMessage>,
    timers: TimerSet<LogMessage>,
    writer: Option<FramedWrite<TcpStream, LengthDelimitedCodec>>,
    buffer: VecDeque<LogRecord>,
    dropped: u64,
    sent: u64,
}

impl LogManagerActor {
    /// Creates the actor and the handle posting into it
    pub fn new(config: LogManagerConfig, timer_manager: &TimerManager, capacity: usize) -> (Self, LogHandle) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let timers = timer_manager.timers(sender.clone());
        let actor = Self {
            config,
            receiver,
            timers,
            writer: None,
            buffer: VecDeque::new(),
            dropped: 0,
            sent: 0,
        };
        (actor, ActorHandle::new(sender))
    }

    pub async fn run(mut self) {
        self.open_logger().await;

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LogMessage::Record(record) => self.write(record).await,
                LogMessage::Timer(event) => {
                    if self.timers.is_current(&event) && self.writer.is_none() {
                        self.open_logger().await;
                    }
                }
                LogMessage::GetStatus { response } => {
                    let _ = response.send(self.status()).await;
                }
                LogMessage::Shutdown { response } => {
                    self.timers.stop_all();
                    if let Some(mut writer) = self.writer.take() {
                        let _ = SinkExt::<Bytes>::close(&mut writer).await;
                    }
                    let _ = response.send(self.status()).await;
                    break;
                }
            }
        }
        tracing::debug!("Log manager stopped");
    }

    fn status(&self) -> LogStatus {
        LogStatus {
            connected: self.writer.is_some(),
            buffered: self.buffer.len(),
            dropped: self.dropped,
            sent: self.sent,
        }
    }

    /// Connects to the collector and flushes the buffer
    ///
    /// On failure the reconnect timer is armed once; there is no backoff.
    async fn open_logger(&mut self) {
        let Some(collector) = self.config.collector.clone() else {
            return;
        };

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&collector)).await;
        match connected {
            Ok(Ok(stream)) => {
                tracing::info!(collector = %collector, "Connected to log collector");
                self.writer = Some(FramedWrite::new(stream, LengthDelimitedCodec::new()));
                self.timers.stop_timer(RECONNECT_TIMER);
                while let Some(record) = self.buffer.pop_front() {
                    if !self.send(record).await {
                        break;
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(collector = %collector, error = %e, "Log collector not reachable");
                self.schedule_reconnect();
            }
            Err(_) => {
                tracing::debug!(collector = %collector, "Log collector connect timed out");
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        self.timers
            .start_timer(RECONNECT_TIMER, self.config.reconnect, 1);
    }

    async fn write(&mut self, record: LogRecord) {
        if self.writer.is_some() {
            self.send(record).await;
        } else {
            self.buffer_record(record);
        }
    }

    /// Sends one record; on failure the record is buffered again and the
    /// connection is dropped
    async fn send(&mut self, record: LogRecord) -> bool {
        let frame = match record.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unencodable log record");
                self.dropped += 1;
                return true;
            }
        };

        let Some(writer) = self.writer.as_mut() else {
            self.buffer_record(record);
            return false;
        };

        match writer.send(frame).await {
            Ok(()) => {
                self.sent += 1;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Lost connection to log collector");
                self.writer = None;
                self.buffer.push_front(record);
                self.trim_buffer();
                self.schedule_reconnect();
                false
            }
        }
    }

    fn buffer_record(&mut self, record: LogRecord) {
        self.buffer.push_back(record);
        self.trim_buffer();
    }

    /// Drops the oldest records beyond the capacity
    fn trim_buffer(&mut self) {
        while self.buffer.len() > self.config.buffer_capacity {
            self.buffer.pop_front();
            self.dropped += 1;
        }
    }
}

/// Sink posting into the log manager without waiting
pub struct RemoteLogSink {
    handle: LogHandle,
    application: String,
    process_id: u32,
    min_severity: Severity,
    dropped: AtomicU64,
}

impl RemoteLogSink {
    pub fn new(handle: LogHandle, identity: &dyn ProcessIdentity) -> Self {
        Self {
            handle,
            application: identity.app_name(),
            process_id: identity.id(),
            min_severity: Severity::Info,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Records rejected because the manager queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl LogSink for RemoteLogSink {
    fn log_message(&self, severity: Severity, scope_id: u32, text: &str) {
        if severity < self.min_severity {
            return;
        }
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let record = LogRecord {
            timestamp_ms,
            severity,
            scope_id,
            process_id: self.process_id,
            application: self.application.clone(),
            text: text.to_string(),
        };
        if self.handle.try_send(LogMessage::Record(record)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StaticIdentity;
    use futures::StreamExt;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_util::codec::FramedRead;

    #[derive(Default)]
    struct MemorySink {
        lines: Mutex<Vec<(Severity, u32, String)>>,
    }

    impl LogSink for MemorySink {
        fn log_message(&self, severity: Severity, scope_id: u32, text: &str) {
            self.lines
                .lock()
                .unwrap()
                .push((severity, scope_id, text.to_string()));
        }
    }

    fn identity() -> StaticIdentity {
        StaticIdentity::new(42, "mcrouter-test", "/usr/bin/mcrouter-test")
    }

    #[test]
    fn test_composite_sink_fans_out() {
        let a = Arc::new(MemorySink::default());
        let b = Arc::new(MemorySink::default());
        let composite = CompositeSink::new().with(a.clone()).with(b.clone());
        composite.log_message(Severity::Warning, scope::ROUTER, "channel closed");
        assert_eq!(a.lines.lock().unwrap().len(), 1);
        assert_eq!(b.lines.lock().unwrap()[0].2, "channel closed");
    }

    #[test]
    fn test_log_record_encoding() {
        let record = LogRecord {
            timestamp_ms: 1,
            severity: Severity::Error,
            scope_id: scope::CHANNEL,
            process_id: 7,
            application: "mcrouter".to_string(),
            text: "boom".to_string(),
        };
        let bytes = record.encode().unwrap();
        assert_eq!(LogRecord::decode(&bytes).unwrap(), record);
    }

    #[tokio::test]
    async fn test_records_are_buffered_and_oldest_dropped_without_collector() {
        let config = LogManagerConfig {
            collector: None,
            reconnect: Duration::from_millis(10),
            buffer_capacity: 2,
        };
        let manager = TimerManager::new();
        let (actor, handle) = LogManagerActor::new(config, &manager, 16);
        tokio::spawn(actor.run());

        let sink = RemoteLogSink::new(handle.clone(), &identity());
        for i in 0..3 {
            sink.log_message(Severity::Info, scope::ROUTER, &format!("line {}", i));
        }
        sink.log_message(Severity::Debug, scope::ROUTER, "filtered");

        let (tx, mut rx) = mpsc::channel(1);
        handle.send(LogMessage::GetStatus { response: tx }).await.unwrap();
        let status = rx.recv().await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.buffered, 2);
        assert_eq!(status.dropped, 1);
    }

    #[tokio::test]
    async fn test_records_reach_collector_after_reconnect() {
        // Reserve a port, then release it so the first attempt fails
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let config = LogManagerConfig {
            collector: Some(addr.to_string()),
            reconnect: Duration::from_millis(50),
            buffer_capacity: 16,
        };
        let manager = TimerManager::new();
        let (actor, handle) = LogManagerActor::new(config, &manager, 16);
        tokio::spawn(actor.run());

        let sink = RemoteLogSink::new(handle.clone(), &identity());
        sink.log_message(Severity::Warning, scope::APPLICATION, "before collector");

        let listener = TcpListener::bind(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = FramedRead::new(stream, LengthDelimitedCodec::new());

        let frame = frames.next().await.unwrap().unwrap();
        let record = LogRecord::decode(&frame).unwrap();
        assert_eq!(record.text, "before collector");
        assert_eq!(record.process_id, 42);
        assert_eq!(record.application, "mcrouter-test");

        let (tx, mut rx) = mpsc::channel(1);
        handle.send(LogMessage::Shutdown { response: tx }).await.unwrap();
        let status = rx.recv().await.unwrap();
        assert_eq!(status.sent, 1);
        assert_eq!(status.buffered, 0);
    }
}
