//! Core types for the correlation client.
//!
//! This module provides foundational types used throughout the crate:
//! - **IDs**: Strongly-typed identifiers (RequestId, RecordId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Client configuration loaded from files and environment

mod config;
mod errors;
mod ids;

pub use config::{ClientConfig, TransportKind};
pub use errors::{Error, ErrorKind, Result};
pub use ids::{RecordId, RequestId};
