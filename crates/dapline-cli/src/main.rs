//! dapline CLI
//!
//! Reads one JSON invocation per line from stdin
//! (`{"operation": "...", "arguments": {...}}`), runs it against the relay,
//! and prints one JSON result per line. On Ctrl-C or stdin EOF the relay
//! runs its shutdown contract (tool session first, then every connection)
//! before the process exits.

use anyhow::Result;
use clap::Parser;
use dapline_core::invoke::{error_to_value, invoke};
use dapline_core::{Endpoint, FixedResolver, RelayContext};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "dapline", version, about = "Debug Adapter Protocol relay")]
struct Cli {
    /// Default backend host when an invocation names none
    #[arg(long, default_value = "127.0.0.1", env = "DAPLINE_DEFAULT_HOST")]
    host: String,

    /// Default backend port when an invocation names none
    #[arg(long, default_value_t = 4711, env = "DAPLINE_DEFAULT_PORT")]
    port: u16,
}

#[derive(Debug, Deserialize)]
struct Invocation {
    operation: String,
    #[serde(default)]
    arguments: Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = RelayContext::from_env()?;
    let resolver = FixedResolver::new(Endpoint::new(cli.host.clone(), cli.port));
    info!(host = %cli.host, port = cli.port, "dapline relay started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        println!("{}", run_invocation(&ctx, &resolver, line).await);
                    }
                    None => {
                        debug!("stdin closed");
                        break;
                    }
                }
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}

async fn run_invocation(ctx: &RelayContext, resolver: &FixedResolver, line: &str) -> Value {
    let invocation: Invocation = match serde_json::from_str(line) {
        Ok(invocation) => invocation,
        Err(e) => {
            warn!(error = %e, "unparsable invocation line");
            return error_to_value(&dapline_core::RelayError::invalid_request(format!(
                "unparsable invocation: {}",
                e
            )));
        }
    };

    match invoke(ctx, resolver, &invocation.operation, invocation.arguments).await {
        Ok(result) => result,
        Err(e) => error_to_value(&e),
    }
}
