use crate::bus::EventBus;
use crate::error::{EngineError, Result};
use crate::inventory::decode::ERROR_MARKER;
use crate::models::{CommandResult, StreamOutput};
use async_trait::async_trait;
use itertools::Itertools;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The seam between the engine and the package manager.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a query to completion and returns its decoded output.
    ///
    /// A command that ran but failed resolves to the `[["Error", msg]]`
    /// sentinel. `Err` is reserved for commands that could not run.
    async fn invoke(&self, subcommand: &str, args: &[String]) -> Result<Value>;

    /// Runs a mutating command, emitting one `StreamOutput` on
    /// `progress_event` per output line and exactly one `CommandResult` on
    /// `completion_event` after the last line. Resolves once that completion
    /// has been emitted. Every payload carries `run_id`.
    async fn invoke_streaming(
        &self,
        run_id: u64,
        args: &[String],
        operation_name: &str,
        progress_event: &str,
        completion_event: &str,
    ) -> Result<CommandResult>;
}

/// Builds the `[["Error", msg]]` value used for failed queries.
pub fn sentinel(message: &str) -> Value {
    json!([[ERROR_MARKER, message]])
}

/// Splits tabular command output into rows of whitespace separated cells.
pub fn rows_from_text(stdout: &str) -> Value {
    let rows = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split_whitespace().map(Value::from).collect::<Vec<_>>())
        .map(Value::Array)
        .collect::<Vec<_>>();
    Value::Array(rows)
}

/// Builds the final result of a streamed command from its exit status and
/// the stderr lines it produced.
pub fn completion_result(
    run_id: u64,
    operation_name: &str,
    success: bool,
    exit_code: Option<i32>,
    stderr_lines: &[String],
) -> CommandResult {
    if success {
        return CommandResult {
            success: true,
            message: format!("{} completed successfully", operation_name),
            run_id,
        };
    }

    let status = exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string());
    let mut message = stderr_lines
        .iter()
        .map(|line| line.trim_end())
        .filter(|line| !line.is_empty())
        .join("\n");
    if !message.is_empty() {
        message.push('\n');
    }
    message.push_str(&format!("{} failed with exit status {}", operation_name, status));
    CommandResult {
        success: false,
        message,
        run_id,
    }
}

/// Runs the real `brew` executable.
pub struct BrewRunner {
    brew: PathBuf,
    bus: Arc<dyn EventBus>,
}

impl BrewRunner {
    pub fn new(brew: PathBuf, bus: Arc<dyn EventBus>) -> Self {
        Self { brew, bus }
    }

    pub fn brew_path(&self) -> &Path {
        &self.brew
    }

    /// Creates a non-interactive `brew` command with both streams piped.
    fn create_brew_command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.brew);
        cmd.args(args)
            .env("HOMEBREW_NO_COLOR", "1")
            .env("HOMEBREW_NO_ENV_HINTS", "1")
            .env("HOMEBREW_NO_AUTO_UPDATE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        cmd
    }
}

/// Reads lines from one output stream and republishes each one on the bus.
/// Stderr lines are also forwarded to `stderr_tx` for the final message.
fn spawn_output_stream_handler(
    stream: impl AsyncRead + Unpin + Send + 'static,
    source: &'static str,
    bus: Arc<dyn EventBus>,
    output_event: String,
    run_id: u64,
    stderr_tx: Option<mpsc::UnboundedSender<String>>,
) -> JoinHandle<()> {
    let mut reader = BufReader::new(stream).lines();

    tokio::spawn(async move {
        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Stopped reading brew {}: {}", source, e);
                    break;
                }
            };

            if let Some(tx) = &stderr_tx {
                if tx.send(line.clone()).is_err() {
                    log::debug!("stderr collector closed before the stream ended");
                }
            }

            let payload = StreamOutput {
                line,
                source: source.to_string(),
                run_id,
            };
            match serde_json::to_value(&payload) {
                Ok(value) => bus.emit(&output_event, value),
                Err(e) => log::error!("Failed to encode output line '{}': {}", payload.line, e),
            }
        }
    })
}

#[async_trait]
impl CommandRunner for BrewRunner {
    async fn invoke(&self, subcommand: &str, args: &[String]) -> Result<Value> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(subcommand.to_string());
        full.extend_from_slice(args);
        log::debug!("Running brew {}", full.join(" "));

        let output = self
            .create_brew_command(&full)
            .output()
            .await
            .map_err(|e| EngineError::Transport(format!("brew {}: {}", full.join(" "), e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut message = stderr
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .join(" ");
            if message.is_empty() {
                message = format!("brew {} exited with {}", subcommand, output.status);
            }
            log::warn!("brew {} failed: {}", subcommand, message);
            return Ok(sentinel(&message));
        }

        if args.iter().any(|arg| arg.starts_with("--json")) {
            return serde_json::from_str(&stdout).map_err(|e| {
                EngineError::Decode(format!("brew {} returned invalid JSON: {}", subcommand, e))
            });
        }
        Ok(rows_from_text(&stdout))
    }

    async fn invoke_streaming(
        &self,
        run_id: u64,
        args: &[String],
        operation_name: &str,
        progress_event: &str,
        completion_event: &str,
    ) -> Result<CommandResult> {
        let command_line = args.join(" ");
        log::info!("Executing streaming command: brew {}", command_line);

        let mut child = self.create_brew_command(args).spawn().map_err(|e| {
            EngineError::Transport(format!("Failed to spawn 'brew {}': {}", command_line, e))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::Transport("brew process did not expose stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            EngineError::Transport("brew process did not expose stderr".to_string())
        })?;

        let (stderr_tx, mut stderr_rx) = mpsc::unbounded_channel::<String>();
        let readers = [
            spawn_output_stream_handler(
                stdout,
                "stdout",
                Arc::clone(&self.bus),
                progress_event.to_string(),
                run_id,
                None,
            ),
            spawn_output_stream_handler(
                stderr,
                "stderr",
                Arc::clone(&self.bus),
                progress_event.to_string(),
                run_id,
                Some(stderr_tx),
            ),
        ];

        let status = child.wait().await.map_err(|e| {
            EngineError::Transport(format!(
                "Failed to wait on child process for {}: {}",
                operation_name, e
            ))
        })?;

        // Every progress line goes out before the completion event.
        for reader in readers {
            if let Err(e) = reader.await {
                log::error!("Output reader for {} stopped abnormally: {}", operation_name, e);
            }
        }
        log::info!("{} finished with status: {}", operation_name, status);

        let mut stderr_lines = Vec::new();
        while let Ok(line) = stderr_rx.try_recv() {
            stderr_lines.push(line);
        }

        let result = completion_result(
            run_id,
            operation_name,
            status.success(),
            status.code(),
            &stderr_lines,
        );
        match serde_json::to_value(&result) {
            Ok(payload) => self.bus.emit(completion_event, payload),
            Err(e) => log::error!("Failed to emit finished event: {}", e),
        }
        Ok(result)
    }
}
