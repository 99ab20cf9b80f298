//! Stdio endpoint for running the privileged bridge as its own process.

use super::{stream, Endpoint};

/// Attach an endpoint to this process's stdin and stdout.
///
/// Stdout carries protocol lines only; logs must go to stderr.
pub fn stdio_endpoint() -> Endpoint {
    tracing::info!("Stdio transport started");
    stream::attach(tokio::io::stdin(), tokio::io::stdout())
}
