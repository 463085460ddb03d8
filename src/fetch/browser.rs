use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use url::Url;

use crate::config::BrowserConfig;
use crate::error::TransportError;

/// Rendered output shorter than this is treated as a failed render.
const MIN_RENDERED_BYTES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserMode {
    Scripted,
    /// Scripted plus human-behaviour simulation (scrolling, pauses).
    Full,
}

impl BrowserMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scripted => "scripted",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserRequest {
    pub url: Url,
    pub mode: BrowserMode,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// Delegated browser automation. Returns the rendered document.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn render(&self, request: &BrowserRequest) -> Result<Vec<u8>, TransportError>;
}

/// Runs an external program per page. The program reads
/// `BOOKFETCH_URL`, `BOOKFETCH_MODE`, `BOOKFETCH_PROXY` and
/// `BOOKFETCH_TIMEOUT_SECS` and prints the rendered HTML on stdout.
#[derive(Debug, Clone)]
pub struct CommandBrowser {
    command: String,
    args: Vec<String>,
}

impl CommandBrowser {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Option<Self> {
        let command = config.command.as_deref()?.trim();
        if command.is_empty() {
            return None;
        }
        Some(Self::new(command, config.args.clone()))
    }
}

#[async_trait]
impl BrowserBackend for CommandBrowser {
    async fn render(&self, request: &BrowserRequest) -> Result<Vec<u8>, TransportError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .env("BOOKFETCH_URL", request.url.as_str())
            .env("BOOKFETCH_MODE", request.mode.as_str())
            .env("BOOKFETCH_PROXY", request.proxy.as_deref().unwrap_or_default())
            .env(
                "BOOKFETCH_TIMEOUT_SECS",
                request.timeout.as_secs().max(1).to_string(),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            command = %self.command,
            url = %request.url,
            mode = request.mode.as_str(),
            "browser render"
        );

        let child = cmd
            .spawn()
            .map_err(|err| TransportError::Browser(format!("spawn {}: {err}", self.command)))?;
        let output = tokio::time::timeout(request.timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|err| TransportError::Browser(format!("wait {}: {err}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let tail = stderr
                .char_indices()
                .rev()
                .nth(300)
                .map_or(stderr, |(idx, _)| &stderr[idx..]);
            return Err(TransportError::Browser(format!(
                "{} exited with {}: {tail}",
                self.command, output.status
            )));
        }
        if output.stdout.len() < MIN_RENDERED_BYTES {
            return Err(TransportError::Browser(format!(
                "{} returned {} bytes",
                self.command,
                output.stdout.len()
            )));
        }
        Ok(output.stdout)
    }
}
