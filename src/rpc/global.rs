//! Process-wide client handle.
//!
//! The process keeps exactly one [`RpcClient`]: built once at startup,
//! connected, used for the life of the process and closed at shutdown.
//! Reconnecting the same handle after a close starts from a clean link.

use std::sync::{Arc, OnceLock};

use crate::rpc::RpcClient;
use crate::types::{ClientConfig, Error, Result};

static CONNECTION: OnceLock<Arc<RpcClient>> = OnceLock::new();

/// Install the process-wide client. Fails if one is already installed.
pub fn init(config: ClientConfig) -> Result<Arc<RpcClient>> {
    install(Arc::new(RpcClient::new(config)))
}

/// Install a prebuilt client (e.g. with a custom connector).
pub fn install(client: Arc<RpcClient>) -> Result<Arc<RpcClient>> {
    CONNECTION
        .set(client.clone())
        .map_err(|_| Error::invalid_state("process-wide client already initialized"))?;
    Ok(client)
}

/// The process-wide client, if initialized.
pub fn get() -> Option<Arc<RpcClient>> {
    CONNECTION.get().cloned()
}

/// Initialize the process-wide client and connect it.
pub async fn connect(config: ClientConfig) -> Result<Arc<RpcClient>> {
    let client = init(config)?;
    client.connect().await?;
    Ok(client)
}
