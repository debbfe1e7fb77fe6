use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Outcome of one formatter pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatResult {
    /// Formatted text on success, the input unchanged otherwise
    pub output: String,
    pub success: bool,
    pub diagnostics: Option<String>,
}

impl FormatResult {
    fn failed(input: &str, diagnostics: impl Into<String>) -> Self {
        Self {
            output: input.to_string(),
            success: false,
            diagnostics: Some(diagnostics.into()),
        }
    }
}

/// Formats / lints generated source
#[async_trait]
pub trait Formatter: Send + Sync {
    async fn format(&self, source: &str) -> FormatResult;
}

/// Pipes source through an external command (`black -q -` by default)
#[derive(Debug, Clone)]
pub struct CommandFormatter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandFormatter {
    /// `None` when `command` is empty
    pub fn new(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    async fn run(&self, source: &str) -> std::io::Result<std::process::Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes()).await?;
        }
        child.wait_with_output().await
    }
}

#[async_trait]
impl Formatter for CommandFormatter {
    async fn format(&self, source: &str) -> FormatResult {
        let output = match tokio::time::timeout(self.timeout, self.run(source)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                log::debug!("Formatter `{}` failed to run: {e}", self.program);
                return FormatResult::failed(source, format!("{}: {e}", self.program));
            }
            Err(_) => {
                return FormatResult::failed(
                    source,
                    format!("{} timed out after {:?}", self.program, self.timeout),
                )
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return FormatResult::failed(
                source,
                format!("{} exited with {}: {stderr}", self.program, output.status),
            );
        }

        match String::from_utf8(output.stdout) {
            Ok(formatted) => FormatResult {
                output: formatted,
                success: true,
                diagnostics: None,
            },
            Err(_) => FormatResult::failed(source, format!("{} wrote invalid UTF-8", self.program)),
        }
    }
}

/// Formatter used when none is configured; never reports success
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFormatter;

#[async_trait]
impl Formatter for NoopFormatter {
    async fn format(&self, source: &str) -> FormatResult {
        FormatResult::failed(source, "no formatter configured")
    }
}
