//! Remote command execution.
//!
//! Every probe and power command goes through a [`CommandRunner`]. The shell
//! implementation runs the command line with `bash -c`, either on this machine
//! or on a proxy host reached over `ssh`. A command that overruns its timeout
//! is killed and reported as [`RunError::Timeout`]; callers treat that exactly
//! like a non-zero exit.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("exit code {code:?}: {output}")]
    Exit { code: Option<i32>, output: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command_line`, returning its captured output on a zero exit.
    async fn run(&self, command_line: &str, timeout: Duration) -> Result<String, RunError>;
}

/// Runs commands through `bash -c`, optionally hopping through `ssh <proxy>`.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    proxy_host: Option<String>,
}

impl ShellRunner {
    pub fn new(proxy_host: Option<String>) -> Self {
        Self { proxy_host }
    }

    fn build(&self, command_line: &str) -> AsyncCommand {
        match &self.proxy_host {
            Some(proxy) => {
                let mut cmd = AsyncCommand::new("ssh");
                cmd.args(["-o", "BatchMode=yes", proxy.as_str(), "--", command_line]);
                cmd
            }
            None => {
                let mut cmd = AsyncCommand::new("bash");
                cmd.arg("-c").arg(command_line);
                cmd
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command_line: &str, timeout: Duration) -> Result<String, RunError> {
        let start_time = Instant::now();
        let child = self
            .build(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(RunError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined_output = if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{}\nSTDERR:\n{}", stdout, stderr)
        };
        debug!(
            "command finished in {}ms with {:?}",
            start_time.elapsed().as_millis(),
            output.status.code()
        );

        if output.status.success() {
            Ok(combined_output)
        } else {
            Err(RunError::Exit {
                code: output.status.code(),
                output: combined_output,
            })
        }
    }
}

/// Replace every `{name}` placeholder in `template` with the shell-quoted value.
/// Unknown placeholders are left untouched.
pub fn render_command(template: &str, vars: &[(&str, &str)]) -> String {
    let mut line = template.to_string();
    for (name, value) in vars {
        let quoted = shell_words::quote(value);
        line = line.replace(&format!("{{{}}}", name), &quoted);
    }
    line
}
