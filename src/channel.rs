// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Connection / Channel
//!
//! One TCP connection served by a reader task and a writer task. The
//! reader only posts whole envelopes to its owner; the writer drains a
//! bounded queue, so the owner never waits on a slow peer and a stalled
//! peer cannot grow the owner's memory without limit.
//!
//! Whichever task notices the connection failing first cancels the
//! channel token and reports the closure once. A channel closed by its
//! owner (token cancelled from outside) is not reported.

use crate::codec::EnvelopeCodec;
use crate::envelope::{Envelope, MAX_ENVELOPE_SIZE};
use crate::logging::{LogSink, Severity, TracingSink, scope};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

/// Default number of envelopes queued towards one peer
pub const DEFAULT_CHANNEL_QUEUE: usize = 1024;

/// Sending side of a channel
///
/// Bounded: a peer that stops reading fills it, and the owner decides
/// what to do with a full queue.
pub type ChannelWriter = mpsc::Sender<Envelope>;

/// Settings shared by every channel of an owner
#[derive(Clone)]
pub struct ChannelConfig {
    pub max_length: usize,
    pub queue_capacity: usize,
    pub log: Arc<dyn LogSink>,
}

impl ChannelConfig {
    pub fn new(max_length: usize, queue_capacity: usize) -> Self {
        Self {
            max_length,
            queue_capacity: queue_capacity.max(1),
            log: Arc::new(TracingSink),
        }
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(MAX_ENVELOPE_SIZE, DEFAULT_CHANNEL_QUEUE)
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("max_length", &self.max_length)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Spawns the reader and writer tasks of `stream`
///
/// Inbound envelopes are turned into owner messages with `on_envelope`;
/// an I/O failure or end of stream is reported with `on_closed`.
pub fn spawn_channel<M, F, C>(
    stream: TcpStream,
    config: &ChannelConfig,
    owner: mpsc::Sender<M>,
    on_envelope: F,
    on_closed: C,
    token: CancellationToken,
) -> ChannelWriter
where
    M: Send + 'static,
    F: Fn(Envelope) -> M + Send + 'static,
    C: Fn(Option<String>) -> M + Send + Sync + 'static,
{
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let (writer, queue) = mpsc::channel(config.queue_capacity.max(1));
    let on_closed = Arc::new(on_closed);

    let reader = FramedRead::new(read_half, EnvelopeCodec::with_max_length(config.max_length));
    tokio::spawn(read_loop(
        reader,
        owner.clone(),
        on_envelope,
        on_closed.clone(),
        config.log.clone(),
        token.clone(),
    ));

    let sink = FramedWrite::new(write_half, EnvelopeCodec::with_max_length(config.max_length));
    tokio::spawn(write_loop(sink, queue, owner, on_closed, token));

    writer
}

async fn read_loop<M, F, C>(
    mut frames: FramedRead<OwnedReadHalf, EnvelopeCodec>,
    owner: mpsc::Sender<M>,
    on_envelope: F,
    on_closed: Arc<C>,
    log: Arc<dyn LogSink>,
    token: CancellationToken,
) where
    F: Fn(Envelope) -> M,
    C: Fn(Option<String>) -> M,
{
    let reason = loop {
        tokio::select! {
            _ = token.cancelled() => return,
            frame = frames.next() => match frame {
                Some(Ok(Ok(envelope))) => {
                    if owner.send(on_envelope(envelope)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Err(e))) => {
                    log.log_message(
                        Severity::Warning,
                        scope::CHANNEL,
                        &format!("Malformed envelope dropped: {}", e),
                    );
                }
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        }
    };

    if !token.is_cancelled() {
        token.cancel();
        let _ = owner.send(on_closed(reason)).await;
    }
}

async fn write_loop<M, C>(
    mut sink: FramedWrite<OwnedWriteHalf, EnvelopeCodec>,
    mut queue: mpsc::Receiver<Envelope>,
    owner: mpsc::Sender<M>,
    on_closed: Arc<C>,
    token: CancellationToken,
) where
    C: Fn(Option<String>) -> M,
{
    loop {
        tokio::select! {
            biased;
            envelope = queue.recv() => match envelope {
                Some(envelope) => {
                    if let Err(e) = sink.send(envelope).await {
                        if !token.is_cancelled() {
                            token.cancel();
                            let _ = owner.send(on_closed(Some(e.to_string()))).await;
                        }
                        return;
                    }
                }
                None => break,
            },
            _ = token.cancelled() => break,
        }
    }

    // Flush what was queued before the close
    while let Ok(envelope) = queue.try_recv() {
        if sink.feed(envelope).await.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::RoleAddress;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Warnings {
        lines: Mutex<Vec<(u32, String)>>,
    }

    impl LogSink for Warnings {
        fn log_message(&self, severity: Severity, scope_id: u32, text: &str) {
            if severity >= Severity::Warning {
                self.lines.lock().unwrap().push((scope_id, text.to_string()));
            }
        }
    }

    #[derive(Debug)]
    enum Event {
        Envelope(Envelope),
        Closed(Option<String>),
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn spawn(stream: TcpStream, token: CancellationToken) -> (ChannelWriter, mpsc::Receiver<Event>) {
        spawn_with(stream, &ChannelConfig::default(), token)
    }

    fn spawn_with(
        stream: TcpStream,
        config: &ChannelConfig,
        token: CancellationToken,
    ) -> (ChannelWriter, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(16);
        let writer = spawn_channel(
            stream,
            config,
            tx,
            Event::Envelope,
            Event::Closed,
            token,
        );
        (writer, rx)
    }

    #[tokio::test]
    async fn test_envelopes_cross_the_channel_in_order() {
        let (a, b) = pair().await;
        let (writer_a, _events_a) = spawn(a, CancellationToken::new());
        let (_writer_b, mut events_b) = spawn(b, CancellationToken::new());

        for seq in 1..=3 {
            writer_a
                .send(Envelope::request(
                    RoleAddress::new("Calc", "Client"),
                    RoleAddress::new("Calc", "Server1"),
                    5,
                    seq,
                    vec![seq as u8],
                ))
                .await
                .unwrap();
        }

        for seq in 1..=3 {
            match events_b.recv().await.unwrap() {
                Event::Envelope(env) => assert_eq!(env.sequence_nr, seq),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_channel_open() {
        let (mut raw, b) = pair().await;
        let warnings = Arc::new(Warnings::default());
        let config = ChannelConfig::default().with_log_sink(warnings.clone());
        let (_writer_b, mut events_b) = spawn_with(b, &config, CancellationToken::new());

        let good = Envelope::provider_connect(RoleAddress::new("Calc", "Server1"));
        let mut bad = good.to_bytes().unwrap().to_vec();
        bad[4] = 200;
        raw.write_all(&bad).await.unwrap();
        raw.write_all(&good.to_bytes().unwrap()).await.unwrap();

        match events_b.recv().await.unwrap() {
            Event::Envelope(env) => assert_eq!(env, good),
            other => panic!("unexpected event {:?}", other),
        }
        let lines = warnings.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, scope::CHANNEL);
    }

    #[test]
    fn test_queue_capacity_is_at_least_one() {
        let config = ChannelConfig::new(MAX_ENVELOPE_SIZE, 0);
        assert_eq!(config.queue_capacity, 1);
    }

    #[tokio::test]
    async fn test_peer_close_is_reported_once() {
        let (a, b) = pair().await;
        let (_writer_b, mut events_b) = spawn(b, CancellationToken::new());
        drop(a);

        match events_b.recv().await.unwrap() {
            Event::Closed(_) => {}
            other => panic!("unexpected event {:?}", other),
        }
        let again = tokio::time::timeout(std::time::Duration::from_millis(50), events_b.recv()).await;
        assert!(matches!(again, Ok(None) | Err(_)));
    }
}
