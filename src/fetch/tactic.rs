use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// One way of retrieving a page, in fixed escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tactic {
    Plain,
    /// Browser-like headers, rotated user agent, cookie jar, lenient TLS.
    ChallengeBypass,
    ScriptedBrowser,
    /// Browser automation that also simulates a human visitor.
    FullBrowser,
}

impl Tactic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::ChallengeBypass => "challenge-bypass",
            Self::ScriptedBrowser => "scripted-browser",
            Self::FullBrowser => "full-browser",
        }
    }
}

impl fmt::Display for Tactic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical request. Built per attempt and dropped once it resolves.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
    pub attempt: u32,
    pub tactic_index: usize,
    pub tactic: Tactic,
    /// Overrides the tactic's own timeout.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RawPage {
    pub status: u16,
    pub body: Vec<u8>,
    /// Charset from the response's `Content-Type`, if any.
    pub charset: Option<String>,
}

/// Performs physical requests for the orchestrator. Shared by every worker
/// of a crawl, so implementations must tolerate concurrent use.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Tactics this transport can execute, in escalation order.
    fn tactics(&self) -> Vec<Tactic>;

    async fn send(&self, request: &FetchRequest) -> Result<RawPage, TransportError>;
}
