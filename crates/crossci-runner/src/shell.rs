//! Shell-based step execution on the host.

use crate::actions;
use crate::process::{self, ProcessGroup};
use crate::runner::{OutputLine, OutputStream, StepContext, StepResult, StepRunner};
use async_trait::async_trait;
use crossci_core::workflow::StepAction;
use crossci_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

/// How long output readers may linger once the command has exited.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Shell runner for executing commands on the host.
///
/// Commands never get retried: a non-zero exit is reported as is. Dropping
/// an in-flight `execute` future tears down the command's whole process group.
#[derive(Debug, Default)]
pub struct ShellRunner {
    max_timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every step's run time, whatever its `timeout_minutes` says.
    pub fn with_max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = Some(max_timeout);
        self
    }

    fn step_timeout(&self, ctx: &StepContext) -> Option<Duration> {
        let declared = match ctx.step.timeout_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(u64::from(minutes) * 60)),
        };
        match (declared, self.max_timeout) {
            (Some(declared), Some(max)) => Some(declared.min(max)),
            (declared, max) => declared.or(max),
        }
    }

    fn build_command(&self, script: &str, ctx: &StepContext) -> Command {
        let mut command = match &ctx.elevation {
            Some(elevation) => {
                let argv = elevation.argv(&ctx.step.shell, script);
                let mut command = Command::new(&argv[0]);
                command.args(&argv[1..]);
                command
            }
            None => {
                let mut command = Command::new(&ctx.step.shell);
                command.arg("-c").arg(script);
                command
            }
        };

        command
            .current_dir(&ctx.workspace)
            .env_clear()
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::isolate(&mut command);
        command
    }

    async fn execute_command(
        &self,
        script: &str,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let start = std::time::Instant::now();

        info!(
            platform = %ctx.platform,
            step = %ctx.step.name,
            elevated = ctx.elevation.is_some(),
            workspace = %ctx.workspace.display(),
            "Executing shell command"
        );

        let mut child = self
            .build_command(script, ctx)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn process: {}", e)))?;
        let mut group = ProcessGroup::new(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not captured".to_string()))?;

        let mut stdout_handle = stream_lines(stdout, OutputStream::Stdout, output_tx.clone());
        let mut stderr_handle = stream_lines(stderr, OutputStream::Stderr, output_tx);

        let wait_result = match self.step_timeout(ctx) {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(limit = ?limit, step = %ctx.step.name, "Command timed out, terminating process group");
                    group.terminate();
                    stdout_handle.abort();
                    stderr_handle.abort();
                    return Err(Error::StepTimeout { limit });
                }
            },
            None => child.wait().await,
        };

        // Background processes left behind may still hold the pipes open.
        let drained = timeout(OUTPUT_DRAIN, async {
            let _ = (&mut stdout_handle).await;
            let _ = (&mut stderr_handle).await;
        })
        .await
        .is_ok();
        if drained {
            group.release();
        } else {
            warn!(step = %ctx.step.name, "Output still open after exit, terminating leftovers");
            stdout_handle.abort();
            stderr_handle.abort();
        }

        let status =
            wait_result.map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Command completed");

        Ok(StepResult::from_exit_code(exit_code, duration_ms))
    }
}

fn stream_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_number = 0u32;

        while let Ok(Some(line)) = lines.next_line().await {
            line_number += 1;
            let output = OutputLine {
                stream,
                content: line,
                line_number,
                timestamp: chrono::Utc::now(),
            };
            if tx.send(output).await.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        match ctx.step.action()? {
            StepAction::Run(script) => self.execute_command(script, ctx, output_tx).await,
            StepAction::Builtin(action) => actions::run_builtin(action, ctx).await,
        }
    }
}
