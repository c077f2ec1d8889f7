use std::process::Stdio;

use futures::future::BoxFuture;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use framewalk_core::error::{FramewalkError, Result};
use framewalk_core::traits::ExecHost;
use framewalk_core::types::RunId;

/// Per-run [`ExecHost`]. Children are spawned with `kill_on_drop`, and
/// command completion is raced against the run's cancellation token, so
/// cancelling the run never leaves an external process behind.
pub struct RunExecHost {
    run_id: RunId,
    cancel: CancellationToken,
}

impl RunExecHost {
    pub fn new(run_id: RunId, cancel: CancellationToken) -> Self {
        Self { run_id, cancel }
    }
}

impl ExecHost for RunExecHost {
    fn run_command(&self, program: String, args: Vec<String>) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            debug!(run_id = %self.run_id, program = %program, "Spawning external command");

            let child = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;

            // Dropping the wait future on the cancelled branch kills the
            // child via kill_on_drop.
            let output = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(run_id = %self.run_id, program = %program, "Command killed by cancellation");
                    return Err(FramewalkError::Cancelled);
                }
                output = child.wait_with_output() => output?,
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(FramewalkError::Exec(format!(
                    "{} exited with {}: {}",
                    program,
                    output.status,
                    stderr.trim()
                )));
            }

            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }
}
