//! # Vetclix Client - Request/Response Correlation Layer
//!
//! Client side of the Vetclix clinic records protocol providing:
//! - A single persistent duplex channel (WebSocket or length-delimited TCP)
//! - Any number of concurrent `call`s multiplexed over that channel
//! - Per-call timeouts and broadcast cancellation when the channel is lost
//! - Typed helpers for the clinic commands (search, save, login, ...)
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────────┐
//!   call(payload) →  │            RpcClient             │
//!                    │  ┌───────────┐ ┌──────────────┐  │
//!                    │  │IdAllocator│ │ PendingTable │  │
//!                    │  └───────────┘ └──────────────┘  │
//!                    │  ┌────────────────────────────┐  │
//!                    │  │      TransportSession      │  │ ⇄ server
//!                    │  └────────────────────────────┘  │
//!                    └──────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod commands;
pub mod rpc;
pub mod types;

// Internal utilities
pub mod observability;

pub use rpc::{ClientState, ConnectionEvent, RpcClient};
pub use types::{ClientConfig, Error, ErrorKind, Result};
