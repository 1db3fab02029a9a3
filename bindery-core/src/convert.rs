//! External format-converter gateway.
//!
//! Wraps a CLI converter invoked as `<command> <input> <output>` with a
//! wall-clock deadline attached to the child process, so one cancel path
//! both kills the subprocess and unblocks the waiter. The byte-copy
//! fallback on failure belongs to the pipeline, not this gateway.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_CONVERT_COMMAND: &str = "ebook-convert";
pub const CONVERT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const STDERR_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),

    #[error("converter exited with failure: {stderr}")]
    Failed { stderr: String },

    #[error("failed to run converter: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Converter {
    command: String,
    timeout: Duration,
}

impl Default for Converter {
    fn default() -> Self {
        Self {
            command: DEFAULT_CONVERT_COMMAND.to_string(),
            timeout: CONVERT_TIMEOUT,
        }
    }
}

impl Converter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: CONVERT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the converter. On success the output file exists at
    /// `output_path`.
    pub async fn convert(&self, input_path: &Path, output_path: &Path) -> Result<(), ConvertError> {
        debug!(
            command = %self.command,
            input = %input_path.display(),
            output = %output_path.display(),
            "starting conversion"
        );

        let mut child = Command::new(&self.command)
            .arg(input_path)
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Drain stderr concurrently so a chatty converter never fills the
        // pipe and stalls.
        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %self.command, "conversion deadline hit, killing subprocess");
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(ConvertError::Timeout(self.timeout));
            }
        };

        if status.success() {
            return Ok(());
        }

        let stderr_bytes = stderr_task.await.unwrap_or_default();
        let stderr = truncate_stderr(&stderr_bytes);
        if !stderr.is_empty() {
            warn!(command = %self.command, %stderr, "converter stderr");
        }
        Err(ConvertError::Failed { stderr })
    }
}

fn truncate_stderr(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() > STDERR_LIMIT {
        let mut end = STDERR_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}
