use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::ConfigArgs;
use crate::fetch::RetryPolicy;
use crate::traverse::TraversalConfig;

pub const PROXY_URL_ENV: &str = "BOOKFETCH_PROXY_URL";
pub const BROWSER_COMMAND_ENV: &str = "BOOKFETCH_BROWSER_COMMAND";

/// Bounds for one crawl. Immutable once a crawl starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    pub max_attempts: u32,
    pub backoff_cap_secs: u64,
    pub request_timeout_secs: u64,
    pub bypass_timeout_secs: u64,
    pub browser_timeout_secs: u64,
    /// Politeness delay between sequential requests.
    pub request_delay_ms: u64,
    /// Indexed works with more chapters than this are fetched in parallel.
    pub parallel_threshold: usize,
    pub max_workers: usize,
    pub retry_workers: usize,
    pub retry_timeout_secs: u64,
    pub max_chain_pages: usize,
    pub proxy: ProxyConfig,
    pub browser: BrowserConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_cap_secs: 16,
            request_timeout_secs: 10,
            bypass_timeout_secs: 30,
            browser_timeout_secs: 60,
            request_delay_ms: 1000,
            parallel_threshold: 30,
            max_workers: 8,
            retry_workers: 2,
            retry_timeout_secs: 45,
            max_chain_pages: 2000,
            proxy: ProxyConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub proxy_url: Option<String>,
}

impl ProxyConfig {
    /// The proxy to route through, if any. Disabled or blank means direct.
    pub fn active_url(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// External program that renders pages for the browser tactics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl CrawlConfig {
    /// Reads the optional YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read config: {}", path.display()))?;
                Self::from_yaml_str(&raw)
                    .with_context(|| format!("parse config: {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Config file, then environment, then command-line flags.
    pub fn from_args(args: &ConfigArgs) -> anyhow::Result<Self> {
        let mut config = Self::load(args.config.as_deref()).context("load crawl config")?;
        config.apply_flags(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_flags(&mut self, args: &ConfigArgs) {
        if let Some(max_attempts) = args.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(proxy) = args.proxy.as_deref().filter(|v| !v.trim().is_empty()) {
            self.proxy = ProxyConfig {
                enabled: true,
                proxy_url: Some(proxy.trim().to_owned()),
            };
        }
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("parse crawl config yaml")
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(proxy_url) = lookup(PROXY_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.proxy = ProxyConfig {
                enabled: true,
                proxy_url: Some(proxy_url.trim().to_owned()),
            };
        }
        if let Some(command) = lookup(BROWSER_COMMAND_ENV).filter(|v| !v.trim().is_empty()) {
            self.browser.command = Some(command.trim().to_owned());
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.max_workers == 0 || self.retry_workers == 0 {
            anyhow::bail!("max_workers and retry_workers must be at least 1");
        }
        if let Some(proxy_url) = self.proxy.active_url() {
            Url::parse(proxy_url).with_context(|| format!("invalid proxy url: {proxy_url}"))?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
        }
    }

    /// The retry pool never outgrows the main pool.
    pub fn traversal(&self) -> TraversalConfig {
        TraversalConfig {
            request_delay: Duration::from_millis(self.request_delay_ms),
            parallel_threshold: self.parallel_threshold,
            max_workers: self.max_workers,
            retry_workers: self.retry_workers.min(self.max_workers),
            retry_timeout: Duration::from_secs(self.retry_timeout_secs),
            max_chain_pages: self.max_chain_pages,
        }
    }
}
