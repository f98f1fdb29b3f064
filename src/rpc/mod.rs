//! Message correlation layer.
//!
//! Turns one duplex channel into any number of concurrent, independently
//! awaitable request/response exchanges. Payloads are opaque JSON; the wire
//! unit is the `{ "i": id, "m": payload }` envelope.

pub mod client;
pub mod codec;
pub mod global;
pub mod ids;
pub mod pending;
pub mod transport;

pub use client::{ClientState, ConnectionEvent, RpcClient};
pub use codec::Envelope;
pub use ids::IdAllocator;
pub use pending::PendingTable;
pub use transport::{Connector, TcpConnector, TransportSession, WebSocketConnector};
