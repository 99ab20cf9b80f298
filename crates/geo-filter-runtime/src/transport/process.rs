//! Child-process endpoint: the consuming side spawns the bridge binary.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::{stream, Endpoint};
use crate::types::{RuntimeError, RuntimeResult};

/// A running bridge child process.
pub struct BridgeProcess {
    child: Child,
}

impl BridgeProcess {
    /// Spawn `program args…` with piped stdin/stdout and attach an endpoint.
    pub fn spawn(program: &Path, args: &[String]) -> RuntimeResult<(Self, Endpoint)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::InternalError("Bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::InternalError("Bridge stdout unavailable".to_string()))?;

        tracing::info!("Spawned bridge process: {}", program.display());
        Ok((Self { child }, stream::attach(stdout, stdin)))
    }

    /// Stop the child and wait for it to exit.
    pub async fn shutdown(mut self) -> RuntimeResult<()> {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Bridge process already exited: {e}");
        }
        self.child.wait().await?;
        Ok(())
    }
}
