//! vetclix-call - issue one command against a Vetclix server.
//!
//! Connects, sends `[command, args...]`, prints the JSON result on stdout and
//! closes. Each positional argument is parsed as JSON, falling back to a
//! plain string, so `vetclix-call search rex` and
//! `vetclix-call get-clients '["a1","b2"]'` both work.

use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use vetclix_client::rpc::global;
use vetclix_client::types::TransportKind;
use vetclix_client::ClientConfig;

#[derive(Debug, Parser)]
#[command(name = "vetclix-call", version, about = "Send one command to a Vetclix server")]
struct Args {
    /// JSON config file; environment variables override it.
    #[arg(long, env = "VETCLIX_CONFIG")]
    config: Option<PathBuf>,

    /// Server address.
    #[arg(long)]
    address: Option<String>,

    /// Transport: websocket or tcp.
    #[arg(long)]
    transport: Option<TransportKind>,

    /// Per-call timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log connection and request activity to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Command name, e.g. `search` or `show-upcoming`.
    command: String,

    /// Command arguments (JSON or plain strings).
    args: Vec<String>,
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn load_config(args: &Args) -> vetclix_client::Result<ClientConfig> {
    let base = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    let mut config = base.apply_env()?;
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(ms) = args.timeout_ms {
        config.call_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize observability
    let default_filter = if args.verbose { "vetclix_client=debug,info" } else { "warn" };
    vetclix_client::observability::init_tracing(default_filter);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::debug!("Connecting to {} over {:?}", config.address, config.transport);
    let client = match global::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let call_args = args.args.iter().map(|raw| parse_arg(raw)).collect();
    let outcome = client.command(&args.command, call_args).await;
    client.close().await;

    match outcome {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    tracing::error!("{}", e);
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(code = e.kind().code(), "{}", e);
            ExitCode::FAILURE
        }
    }
}
