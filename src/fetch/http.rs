use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::seq::IndexedRandom as _;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};

use super::browser::{BrowserBackend, BrowserMode, BrowserRequest, CommandBrowser};
use super::tactic::{FetchRequest, RawPage, Tactic, Transport};
use crate::config::CrawlConfig;
use crate::encoding::charset_from_content_type;
use crate::error::TransportError;

const PLAIN_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Rotated per request by the bypass tactic.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

#[derive(Debug, Clone, Copy)]
pub struct TacticTimeouts {
    pub plain: Duration,
    pub bypass: Duration,
    pub browser: Duration,
}

impl TacticTimeouts {
    fn for_tactic(&self, tactic: Tactic) -> Duration {
        match tactic {
            Tactic::Plain => self.plain,
            Tactic::ChallengeBypass => self.bypass,
            Tactic::ScriptedBrowser | Tactic::FullBrowser => self.browser,
        }
    }
}

/// `reqwest` clients for the HTTP tactics plus an optional browser backend
/// for the rest. Each client keeps its own cookie jar for the whole crawl.
pub struct HttpTransport {
    plain: reqwest::Client,
    bypass: reqwest::Client,
    browser: Option<Arc<dyn BrowserBackend>>,
    timeouts: TacticTimeouts,
}

impl HttpTransport {
    pub fn new(
        proxy: Option<&str>,
        timeouts: TacticTimeouts,
        browser: Option<Arc<dyn BrowserBackend>>,
    ) -> anyhow::Result<Self> {
        let mut plain = reqwest::Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(timeouts.plain)
            .user_agent(PLAIN_USER_AGENT);
        let mut bypass = reqwest::Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(timeouts.bypass)
            .danger_accept_invalid_certs(true)
            .default_headers(browser_headers())
            .tcp_keepalive(Some(Duration::from_secs(60)));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy).with_context(|| format!("parse proxy: {proxy}"))?;
            plain = plain.proxy(proxy.clone());
            bypass = bypass.proxy(proxy);
        } else {
            // Ignore HTTP_PROXY and friends; the crawl config is the only source.
            plain = plain.no_proxy();
            bypass = bypass.no_proxy();
        }

        Ok(Self {
            plain: plain.build().context("build plain http client")?,
            bypass: bypass.build().context("build bypass http client")?,
            browser,
            timeouts,
        })
    }

    pub fn from_config(config: &CrawlConfig) -> anyhow::Result<Self> {
        let timeouts = TacticTimeouts {
            plain: Duration::from_secs(config.request_timeout_secs),
            bypass: Duration::from_secs(config.bypass_timeout_secs),
            browser: Duration::from_secs(config.browser_timeout_secs),
        };
        let browser = CommandBrowser::from_config(&config.browser)
            .map(|browser| Arc::new(browser) as Arc<dyn BrowserBackend>);
        Self::new(config.proxy.active_url(), timeouts, browser)
    }

    async fn send_http(
        &self,
        client: &reqwest::Client,
        request: &FetchRequest,
    ) -> Result<RawPage, TransportError> {
        let mut builder = client.get(request.url.clone());
        if request.tactic == Tactic::ChallengeBypass {
            let user_agent = USER_AGENTS
                .choose(&mut rand::rng())
                .copied()
                .unwrap_or(PLAIN_USER_AGENT);
            builder = builder.header(USER_AGENT, user_agent);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(charset_from_content_type);
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(RawPage {
            status,
            body: body.to_vec(),
            charset,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn tactics(&self) -> Vec<Tactic> {
        let mut tactics = vec![Tactic::Plain, Tactic::ChallengeBypass];
        if self.browser.is_some() {
            tactics.extend([Tactic::ScriptedBrowser, Tactic::FullBrowser]);
        }
        tactics
    }

    async fn send(&self, request: &FetchRequest) -> Result<RawPage, TransportError> {
        match request.tactic {
            Tactic::Plain => self.send_http(&self.plain, request).await,
            Tactic::ChallengeBypass => self.send_http(&self.bypass, request).await,
            tactic @ (Tactic::ScriptedBrowser | Tactic::FullBrowser) => {
                let browser = self
                    .browser
                    .as_ref()
                    .ok_or(TransportError::Unavailable(tactic))?;
                let mode = if tactic == Tactic::FullBrowser {
                    BrowserMode::Full
                } else {
                    BrowserMode::Scripted
                };
                let body = browser
                    .render(&BrowserRequest {
                        url: request.url.clone(),
                        mode,
                        proxy: request.proxy.clone(),
                        timeout: request
                            .timeout
                            .unwrap_or_else(|| self.timeouts.for_tactic(tactic)),
                    })
                    .await?;
                Ok(RawPage {
                    status: 200,
                    body,
                    charset: None,
                })
            }
        }
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    for (name, value) in [
        ("dnt", "1"),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "none"),
        ("sec-fetch-user", "?1"),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    headers
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.to_string())
    }
}
