//! External command handler.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::JobHandler;
use crate::models::Payload;

/// How much of stderr ends up in `last_error`.
const STDERR_TAIL_CHARS: usize = 500;

/// Runs `program [args..] <url>` with the payload JSON on stdin.
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    resolved: Option<PathBuf>,
}

impl CommandHandler {
    pub fn new(program: String, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program,
            args,
            timeout,
            resolved: None,
        }
    }

    async fn run(&self, program: &Path, payload: &Payload) -> anyhow::Result<()> {
        let mut child = Command::new(program)
            .args(&self.args)
            .arg(&payload.url)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that ignores stdin may close it early; not an error.
            let _ = stdin.write_all(payload.to_json().as_bytes()).await;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr_tail(&stderr)
            );
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed;
    }
    let skip = count - STDERR_TAIL_CHARS;
    match trimmed.char_indices().nth(skip) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    async fn setup(&mut self) -> anyhow::Result<()> {
        let path = which::which(&self.program)
            .with_context(|| format!("Command not found: {}", self.program))?;
        self.resolved = Some(path);
        Ok(())
    }

    async fn process(&self, payload: &Payload) -> anyhow::Result<()> {
        let program = self
            .resolved
            .as_ref()
            .context("Command handler used before setup")?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(program, payload))
                .await
                .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", self.program, limit))?,
            None => self.run(program, payload).await,
        }
    }
}
