//! In-memory connector for exercising sessions and the dispatcher in tests.

use async_trait::async_trait;
use futures::channel::mpsc as frame_channel;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Connector, FrameChannel};
use crate::types::{Error, Result};

#[derive(Debug)]
enum Behavior {
    Accept {
        peers: mpsc::UnboundedSender<MemoryPeer>,
        /// Per-attempt handshake latency, consumed in order.
        delays: Mutex<VecDeque<Duration>>,
    },
    Refuse,
    Hang,
}

/// Connector whose "server" side is driven by the test through [`MemoryPeer`].
#[derive(Debug)]
pub(crate) struct MemoryConnector {
    behavior: Behavior,
}

impl MemoryConnector {
    /// Accepts every attempt; each connection's server end arrives on the receiver.
    pub(crate) fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::accepting_after(Vec::new())
    }

    /// Like [`accepting`](Self::accepting), but the n-th attempt completes
    /// only after `delays[n]`. Attempts past the list connect at once.
    pub(crate) fn accepting_after(
        delays: Vec<Duration>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                behavior: Behavior::Accept {
                    peers: tx,
                    delays: Mutex::new(delays.into()),
                },
            }),
            rx,
        )
    }

    pub(crate) fn refusing() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Refuse,
        })
    }

    /// Never completes a connection attempt.
    pub(crate) fn hanging() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Hang,
        })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<FrameChannel> {
        match &self.behavior {
            Behavior::Refuse => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            Behavior::Hang => futures::future::pending().await,
            Behavior::Accept { peers, delays } => {
                let delay = delays.lock().unwrap().pop_front();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                let (client_tx, server_rx) = frame_channel::unbounded::<String>();
                let (server_tx, client_rx) = frame_channel::unbounded::<Result<String>>();
                peers
                    .send(MemoryPeer {
                        address: address.to_string(),
                        outbound: server_rx,
                        inbound: server_tx,
                    })
                    .map_err(|_| Error::connect("test dropped the peer receiver"))?;

                let sink = client_tx.sink_map_err(|e| Error::connection_lost(e.to_string()));
                Ok(FrameChannel {
                    sink: Box::pin(sink),
                    stream: Box::pin(client_rx),
                })
            }
        }
    }
}

/// Server end of an in-memory connection.
#[derive(Debug)]
pub(crate) struct MemoryPeer {
    /// Address the client dialled.
    pub(crate) address: String,
    outbound: frame_channel::UnboundedReceiver<String>,
    inbound: frame_channel::UnboundedSender<Result<String>>,
}

impl MemoryPeer {
    /// Next frame written by the client.
    pub(crate) async fn recv_frame(&mut self) -> String {
        self.outbound.next().await.expect("client closed its sink")
    }

    /// Next frame, or `None` once the client has closed its sink.
    pub(crate) async fn try_recv_frame(&mut self) -> Option<String> {
        self.outbound.next().await
    }

    pub(crate) async fn recv_envelope(&mut self) -> Value {
        let frame = self.recv_frame().await;
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    pub(crate) fn send_raw(&self, frame: &str) {
        let _ = self.inbound.unbounded_send(Ok(frame.to_string()));
    }

    pub(crate) fn reply(&self, id: u64, payload: Value) {
        self.send_raw(&json!({ "i": id, "m": payload }).to_string());
    }

    /// Simulate a frame the transport could not decode to text.
    pub(crate) fn send_undecodable(&self, reason: &str) {
        let _ = self.inbound.unbounded_send(Err(Error::malformed(reason)));
    }

    /// Simulate a channel failure.
    pub(crate) fn fail(&self, reason: &str) {
        let _ = self
            .inbound
            .unbounded_send(Err(Error::connection_lost(reason)));
    }

    /// Close the server end; the client sees end of stream.
    pub(crate) fn hang_up(self) {
        drop(self);
    }
}
