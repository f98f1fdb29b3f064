//! Dispatcher: the public request/response API.
//!
//! Composes a [`TransportSession`], a [`PendingTable`] and an [`IdAllocator`]
//! into `call(payload) -> result`. Each successful `connect` builds a fresh
//! trio (a "link"); nothing carries over from a previous connection.
//!
//! ```text
//!   call ──► allocate id ──► register ──► send {i, m} ──► await settlement
//!                                                               ▲
//!   transport frames ──► pump_inbound ──► decode ──► settle ────┘
//! ```
//!
//! A single inbound task per link decodes frames in arrival order, so
//! settlements happen in the order their replies arrived.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::Instrument;

use crate::rpc::codec::{self, Envelope};
use crate::rpc::ids::IdAllocator;
use crate::rpc::pending::PendingTable;
use crate::rpc::transport::{connector_for, Connector, TransportEvent, TransportSession};
use crate::types::{ClientConfig, Error, ErrorKind, Result};

/// Longest slice of an unparsable frame echoed into the logs.
const FRAME_PREVIEW_CHARS: usize = 120;

/// Lifecycle state of an [`RpcClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connecting,
    Ready,
    Closed,
}

/// Connection lifecycle notifications, for presentation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { address: String },
    OpenFailed { address: String, reason: String },
    Closed { reason: String },
}

/// Per-connection state: one session, its pending table and id space.
#[derive(Debug)]
struct Link {
    session: TransportSession,
    pending: PendingTable,
    ids: IdAllocator,
}

#[derive(Debug)]
struct Inner {
    state: ClientState,
    link: Option<Arc<Link>>,
}

/// Correlating RPC client over a single duplex channel.
#[derive(Debug)]
pub struct RpcClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    inner: Arc<Mutex<Inner>>,
    lifecycle: broadcast::Sender<ConnectionEvent>,
}

impl RpcClient {
    /// Client using the transport selected by `config`.
    pub fn new(config: ClientConfig) -> Self {
        let connector = connector_for(&config);
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (lifecycle, _) = broadcast::channel(16);
        Self {
            config,
            connector,
            inner: Arc::new(Mutex::new(Inner {
                state: ClientState::Unconnected,
                link: None,
            })),
            lifecycle,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn state(&self) -> ClientState {
        self.inner.lock().await.state
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.lifecycle.subscribe()
    }

    /// Number of requests awaiting a reply on the current connection.
    pub async fn pending_count(&self) -> usize {
        let link = self.inner.lock().await.link.clone();
        match link {
            Some(link) => link.pending.len().await,
            None => 0,
        }
    }

    /// Connect to the configured address.
    pub async fn connect(&self) -> Result<()> {
        let address = self.config.address.clone();
        self.connect_to(&address).await
    }

    /// Make a single connection attempt to `address`.
    ///
    /// Allowed from `Unconnected` or `Closed`; a successful attempt moves the
    /// client to `Ready` with a brand-new pending table and id allocator.
    /// The attempt's link is installed while `Connecting`, so a `close` in
    /// the meantime cancels it and a later `connect` replaces it; a finished
    /// attempt only takes effect if its link is still the current one.
    pub async fn connect_to(&self, address: &str) -> Result<()> {
        let link = Arc::new(Link {
            session: TransportSession::new(self.connector.clone()),
            pending: PendingTable::new(),
            ids: IdAllocator::new(),
        });

        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ClientState::Unconnected | ClientState::Closed => {}
                state => {
                    return Err(Error::invalid_state(format!(
                        "cannot connect while {:?}",
                        state
                    )))
                }
            }
            inner.state = ClientState::Connecting;
            inner.link = Some(link.clone());
        }

        let opened = link.session.open(address, self.config.connect_timeout).await;

        let mut inner = self.inner.lock().await;
        let current = inner
            .link
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &link));
        let events = match opened {
            Ok(events) if current => events,
            Ok(_) => {
                drop(inner);
                link.session.close();
                return Err(self.open_failed(address, Error::connect("client closed while connecting")));
            }
            Err(e) => {
                if current {
                    inner.state = ClientState::Closed;
                    inner.link = None;
                }
                drop(inner);
                return Err(self.open_failed(address, e));
            }
        };

        inner.state = ClientState::Ready;
        drop(inner);

        tracing::info!("Connected to {}", address);
        let _ = self.lifecycle.send(ConnectionEvent::Opened {
            address: address.to_string(),
        });
        tokio::spawn(
            pump_inbound(self.inner.clone(), link, events, self.lifecycle.clone())
                .in_current_span(),
        );
        Ok(())
    }

    fn open_failed(&self, address: &str, err: Error) -> Error {
        tracing::warn!("Connection to {} failed: {}", address, err);
        let _ = self.lifecycle.send(ConnectionEvent::OpenFailed {
            address: address.to_string(),
            reason: err.to_string(),
        });
        err
    }

    /// Send `payload` and wait for the correlated reply, using the configured
    /// default timeout.
    pub async fn call(&self, payload: Value) -> Result<Value> {
        self.call_with_timeout(payload, self.config.call_timeout).await
    }

    /// Send `payload` and wait up to `timeout` for the correlated reply.
    ///
    /// Fails with `NotOpen` if the request never reached the pending table:
    /// the client is not `Ready`, or its connection was torn down before the
    /// request could be registered. Once registered, resolves with the reply
    /// payload or fails with `Timeout`, `ApplicationError` (error sentinel) or
    /// `ConnectionLost`; a transport that dies before the frame is queued
    /// counts as `ConnectionLost`.
    pub async fn call_with_timeout(&self, payload: Value, timeout: Duration) -> Result<Value> {
        let link = self.ready_link().await?;
        let id = link.ids.next();
        let frame = codec::encode_envelope(&Envelope::new(id, payload))?;

        let settlement = link.pending.register(id, timeout).await.map_err(|e| match e.kind() {
            ErrorKind::ConnectionLost => Error::not_open(format!("connection torn down: {}", e)),
            _ => e,
        })?;
        tracing::debug!(request_id = %id, "Sending request");
        if let Err(e) = link.session.send(frame) {
            let lost = Error::connection_lost(format!("send failed: {}", e));
            link.pending.settle(id, Err(lost)).await;
        }

        let outcome = settlement
            .await
            .unwrap_or_else(|_| Err(Error::connection_lost("pending table dropped")));
        if let Err(e) = &outcome {
            tracing::warn!(request_id = %id, code = e.kind().code(), "Call failed: {}", e);
        }
        outcome
    }

    async fn ready_link(&self) -> Result<Arc<Link>> {
        let inner = self.inner.lock().await;
        match (&inner.state, &inner.link) {
            (ClientState::Ready, Some(link)) => Ok(link.clone()),
            (state, _) => Err(Error::not_open(format!("client is {:?}", state))),
        }
    }

    /// Close the connection and reject every pending call with
    /// `ConnectionLost`. Closing an unconnected or closed client is a no-op.
    ///
    /// Closing while `Connecting` abandons that attempt: its `connect` fails
    /// and no `Closed` event is emitted for it.
    pub async fn close(&self) {
        let (was, link) = {
            let mut inner = self.inner.lock().await;
            let was = inner.state;
            if matches!(was, ClientState::Unconnected | ClientState::Closed) {
                return;
            }
            inner.state = ClientState::Closed;
            (was, inner.link.take())
        };

        match (was, link) {
            (ClientState::Ready, Some(link)) => {
                shut_down(&link, "closed by client", &self.lifecycle).await
            }
            (_, Some(link)) => {
                link.session.close();
                link.pending.cancel_all("closed by client").await;
            }
            (_, None) => {}
        }
    }
}

/// Drive one link's inbound events until the transport terminates.
async fn pump_inbound(
    inner: Arc<Mutex<Inner>>,
    link: Arc<Link>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    lifecycle: broadcast::Sender<ConnectionEvent>,
) {
    let reason = loop {
        match events.recv().await {
            Some(TransportEvent::Frame(frame)) => handle_frame(&link.pending, &frame).await,
            Some(TransportEvent::Closed { reason }) => break reason,
            Some(TransportEvent::Error(e)) => break format!("transport error: {}", e),
            None => break "transport session dropped".to_string(),
        }
    };

    let detached = {
        let mut inner = inner.lock().await;
        let current = inner
            .link
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &link));
        if current {
            inner.state = ClientState::Closed;
            inner.link = None;
        }
        current
    };

    // An explicit close already detached and drained this link.
    if detached {
        tracing::warn!("Connection lost: {}", reason);
        shut_down(&link, &reason, &lifecycle).await;
    }
}

/// Tear down a detached link: close the session and broadcast-cancel.
async fn shut_down(link: &Link, reason: &str, lifecycle: &broadcast::Sender<ConnectionEvent>) {
    link.session.close();
    let cancelled = link.pending.cancel_all(reason).await;
    tracing::info!(cancelled, "Connection closed: {}", reason);
    let _ = lifecycle.send(ConnectionEvent::Closed {
        reason: reason.to_string(),
    });
}

async fn handle_frame(pending: &PendingTable, frame: &str) {
    let envelope = match codec::decode_envelope(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            let preview: String = frame.chars().take(FRAME_PREVIEW_CHARS).collect();
            tracing::warn!("Dropping inbound frame: {} ({:?})", e, preview);
            return;
        }
    };

    let id = envelope.id;
    if pending.settle(id, envelope.into_settlement()).await {
        tracing::debug!(request_id = %id, "Settled request");
    } else {
        // Replies may legitimately arrive after local expiry.
        tracing::warn!(request_id = %id, "Dropping reply for unknown request id");
    }
}
