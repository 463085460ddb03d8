mod browser;
mod http;
mod tactic;

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

pub use browser::{BrowserBackend, BrowserMode, BrowserRequest, CommandBrowser};
pub use http::{HttpTransport, TacticTimeouts};
pub use tactic::{FetchRequest, RawPage, Tactic, Transport};

use crate::antibot;
use crate::cli::FetchArgs;
use crate::config::CrawlConfig;
use crate::encoding::{self, Script};
use crate::error::{AttemptOutcome, FetchError, TacticHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_cap: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    /// `2^attempt` seconds, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.backoff_cap)
    }
}

/// Per-source knobs for one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub headers: Vec<(String, String)>,
    /// Charset to assume when neither the response nor the page declares one.
    pub encoding: Option<String>,
    pub script: Script,
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub text: String,
    pub tactic: Tactic,
    /// Physical requests issued, including the successful one.
    pub attempts: u32,
    pub encoding: &'static str,
    pub garbled: bool,
}

/// Fetches one URL with escalating tactics, bounded retries and backoff.
pub struct FetchOrchestrator {
    transport: Arc<dyn Transport>,
    tactics: Vec<Tactic>,
    policy: RetryPolicy,
    proxy: Option<String>,
}

impl FetchOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let mut tactics = transport.tactics();
        tactics.sort();
        tactics.dedup();
        Self {
            transport,
            tactics,
            policy,
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn from_config(config: &CrawlConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::from_config(config).context("build http transport")?;
        Ok(Self::new(Arc::new(transport), config.retry_policy())
            .with_proxy(config.proxy.active_url().map(str::to_owned)))
    }

    pub fn tactics(&self) -> &[Tactic] {
        &self.tactics
    }

    pub async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<Fetched, FetchError> {
        let max_attempts = options.max_attempts.unwrap_or(self.policy.max_attempts);
        let mut history = TacticHistory::default();
        let Some(last) = self.tactics.len().checked_sub(1) else {
            return Err(FetchError::Exhausted {
                url: url.to_string(),
                history,
            });
        };

        let mut level = 0usize;
        let mut transport_errors = 0u32;

        for attempt in 0..max_attempts {
            let idx = level.max((attempt as usize).min(last));
            level = idx;
            let tactic = self.tactics[idx];
            let request = FetchRequest {
                url: url.clone(),
                headers: options.headers.clone(),
                proxy: self.proxy.clone(),
                attempt,
                tactic_index: idx,
                tactic,
                timeout: options.timeout,
            };

            tracing::debug!(url = %url, tactic = %tactic, attempt, "fetch");
            match self.transport.send(&request).await {
                Ok(page) if (200..300).contains(&page.status) => {
                    let declared = page
                        .charset
                        .or_else(|| encoding::sniff_meta_charset(&page.body))
                        .or_else(|| options.encoding.clone());
                    let resolved =
                        encoding::resolve(&page.body, declared.as_deref(), options.script);

                    if tactic == Tactic::FullBrowser || !antibot::is_challenge(&resolved.text) {
                        if attempt > 0 {
                            tracing::info!(url = %url, tactic = %tactic, attempt, "fetched after escalation");
                        }
                        return Ok(Fetched {
                            text: resolved.text,
                            tactic,
                            attempts: attempt + 1,
                            encoding: resolved.encoding.name(),
                            garbled: resolved.garbled,
                        });
                    }

                    tracing::warn!(
                        url = %url,
                        tactic = %tactic,
                        signatures = ?antibot::matched_signatures(&resolved.text),
                        "challenge page detected; escalating to browser automation"
                    );
                    history.push(attempt, tactic, AttemptOutcome::Challenge);
                    level = last;
                }
                Ok(page) if page.status == 404 => {
                    tracing::warn!(url = %url, tactic = %tactic, "page not found");
                    return Err(FetchError::NotFound {
                        url: url.to_string(),
                    });
                }
                Ok(page) if matches!(page.status, 403 | 429 | 503) => {
                    tracing::warn!(
                        url = %url,
                        tactic = %tactic,
                        status = page.status,
                        "blocked; escalating tactic"
                    );
                    history.push(attempt, tactic, AttemptOutcome::Status(page.status));
                    level = (idx + 1).min(last);
                }
                Ok(page) => {
                    tracing::warn!(url = %url, tactic = %tactic, status = page.status, "unexpected status");
                    history.push(attempt, tactic, AttemptOutcome::Status(page.status));
                    self.sleep_before_retry(url, attempt, max_attempts).await;
                }
                Err(err) => {
                    tracing::warn!(url = %url, tactic = %tactic, attempt, error = %err, "request failed");
                    history.push(attempt, tactic, AttemptOutcome::Transport(err.to_string()));
                    level = if transport_errors < 2 {
                        (idx + 1).min(last)
                    } else {
                        last
                    };
                    transport_errors += 1;
                    self.sleep_before_retry(url, attempt, max_attempts).await;
                }
            }
        }

        tracing::error!(url = %url, attempts = history.len(), history = %history, "all fetch tactics exhausted");
        Err(FetchError::Exhausted {
            url: url.to_string(),
            history,
        })
    }

    async fn sleep_before_retry(&self, url: &Url, attempt: u32, max_attempts: u32) {
        if attempt + 1 >= max_attempts {
            return;
        }
        let delay = self.policy.backoff(attempt);
        tracing::debug!(url = %url, delay_ms = delay.as_millis() as u64, "backoff");
        tokio::time::sleep(delay).await;
    }
}

pub async fn run(args: FetchArgs) -> anyhow::Result<()> {
    let url = Url::parse(&args.url).context("parse --url")?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("--url must be http/https: {url}");
    }
    let config = CrawlConfig::from_args(&args.settings)?;

    let orchestrator = FetchOrchestrator::from_config(&config)?;
    let options = FetchOptions {
        encoding: args.encoding,
        script: args.script,
        ..FetchOptions::default()
    };
    let fetched = orchestrator
        .fetch(&url, &options)
        .await
        .with_context(|| format!("fetch {url}"))?;
    tracing::info!(
        url = %url,
        tactic = %fetched.tactic,
        attempts = fetched.attempts,
        encoding = fetched.encoding,
        garbled = fetched.garbled,
        "fetched"
    );

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(fetched.text.as_bytes())
        .context("write page to stdout")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}
