//! Transport session. Owns the duplex channel to the server.
//!
//! A session moves `Idle → Connecting → Open → Closed`. It runs one reader
//! task and one writer task over the frame channel produced by a
//! [`Connector`]. Inbound frames and the single terminal event (closed or
//! errored) are delivered in order on the receiver returned by
//! [`TransportSession::open`].

mod tcp;
mod websocket;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::types::{ClientConfig, Error, Result, TransportKind};

pub use tcp::TcpConnector;
pub use websocket::WebSocketConnector;

/// How long the writer waits for the close handshake to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Outbound half of a connected channel: one text frame per item.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a connected channel. `Err(MalformedFrame)` items are
/// dropped by the session; any other error terminates it.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A freshly connected duplex channel.
pub struct FrameChannel {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl fmt::Debug for FrameChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameChannel").finish_non_exhaustive()
    }
}

/// Establishes the physical channel for a session.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Make a single connection attempt to `address`.
    async fn connect(&self, address: &str) -> Result<FrameChannel>;
}

/// Build the connector selected by `config`.
pub fn connector_for(config: &ClientConfig) -> Arc<dyn Connector> {
    match config.transport {
        TransportKind::WebSocket => Arc::new(WebSocketConnector::new(config.protocol.clone())),
        TransportKind::Tcp => Arc::new(TcpConnector::new(config.max_frame_bytes)),
    }
}

/// Lifecycle state of a [`TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Delivered to the session owner, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Frame(String),
    /// The channel closed, by the peer or locally. Terminal.
    Closed { reason: String },
    /// The channel failed. Terminal.
    Error(String),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Frame(_))
    }
}

#[derive(Debug)]
struct Shared {
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    outbound: OnceLock<mpsc::UnboundedSender<String>>,
    events: OnceLock<mpsc::UnboundedSender<TransportEvent>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `Closed` and emit `event`. Only the first caller wins, so the
    /// terminal event fires at most once.
    fn finish(&self, event: TransportEvent) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });

        if transitioned {
            self.cancel.cancel();
            if let Some(events) = self.events.get() {
                let _ = events.send(event);
            }
        }
        transitioned
    }

    fn deliver(&self, frame: String) {
        if self.state() != SessionState::Open {
            return;
        }
        if let Some(events) = self.events.get() {
            let _ = events.send(TransportEvent::Frame(frame));
        }
    }
}

/// Exclusive owner of one physical channel.
#[derive(Debug)]
pub struct TransportSession {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl TransportSession {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            connector,
            shared: Arc::new(Shared {
                state,
                cancel: CancellationToken::new(),
                outbound: OnceLock::new(),
                events: OnceLock::new(),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Make the single connection attempt.
    ///
    /// Resolves once the channel is ready or has failed; `connect_timeout`
    /// bounds the attempt. On success, returns the receiver carrying inbound
    /// frames followed by exactly one terminal event.
    pub async fn open(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::invalid_state(format!(
                "transport session is {:?}, expected Idle",
                self.state()
            )));
        }

        tracing::debug!("Connecting to {}", address);
        let attempt = tokio::select! {
            _ = self.shared.cancel.cancelled() => {
                return Err(Error::connect(format!("{}: closed while connecting", address)));
            }
            attempt = tokio::time::timeout(connect_timeout, self.connector.connect(address)) => attempt,
        };

        let channel = match attempt {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                self.shared.finish(TransportEvent::Error(e.to_string()));
                return Err(Error::connect(format!("{}: {}", address, e)));
            }
            Err(_elapsed) => {
                self.shared.finish(TransportEvent::Error("connect timed out".to_string()));
                return Err(Error::connect(format!(
                    "{}: timed out after {}ms",
                    address,
                    connect_timeout.as_millis()
                )));
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        // Only the task that claimed Idle gets here, so both cells are empty.
        let _ = self.shared.events.set(events_tx);
        let _ = self.shared.outbound.set(outbound_tx);

        let opened = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Open;
                true
            } else {
                false
            }
        });
        if !opened {
            return Err(Error::connect(format!("{}: closed while connecting", address)));
        }

        let FrameChannel { sink, stream } = channel;
        tokio::spawn(read_loop(stream, self.shared.clone()).in_current_span());
        tokio::spawn(write_loop(sink, outbound_rx, self.shared.clone()).in_current_span());
        tracing::info!("Transport session open to {}", address);

        Ok(events_rx)
    }

    /// Queue one frame for transmission. Fails with `NotOpen` outside `Open`.
    pub fn send(&self, frame: String) -> Result<()> {
        let state = self.state();
        if state != SessionState::Open {
            return Err(Error::not_open(format!("transport session is {:?}", state)));
        }
        let outbound = self
            .shared
            .outbound
            .get()
            .ok_or_else(|| Error::not_open("transport writer not started"))?;
        outbound
            .send(frame)
            .map_err(|_| Error::not_open("transport writer has shut down"))
    }

    /// Close the channel. Returns `false` if the session was already closed.
    pub fn close(&self) -> bool {
        self.shared.finish(TransportEvent::Closed {
            reason: "closed locally".to_string(),
        })
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn read_loop(mut stream: FrameStream, shared: Arc<Shared>) {
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(frame)) => shared.deliver(frame),
            Some(Err(Error::MalformedFrame(reason))) => {
                tracing::warn!("Dropping undecodable inbound frame: {}", reason);
            }
            Some(Err(e)) => {
                tracing::warn!("Transport read failed: {}", e);
                shared.finish(TransportEvent::Error(e.to_string()));
                return;
            }
            None => {
                tracing::info!("Peer closed the connection");
                shared.finish(TransportEvent::Closed {
                    reason: "closed by peer".to_string(),
                });
                return;
            }
        }
    }
}

async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!("Transport write failed: {}", e);
                    shared.finish(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }

    if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
        tracing::debug!("Close handshake did not finish within {:?}", CLOSE_GRACE);
    }
}
