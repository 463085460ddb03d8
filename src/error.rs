use std::fmt;

use crate::fetch::Tactic;

/// Failure of a single physical request issued by one tactic.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("browser backend failed: {0}")]
    Browser(String),
    #[error("tactic {0} is not configured")]
    Unavailable(Tactic),
}

/// What one attempt against a URL ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Status(u16),
    Challenge,
    Transport(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "HTTP {status}"),
            Self::Challenge => f.write_str("challenge page"),
            Self::Transport(err) => f.write_str(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub tactic: Tactic,
    pub outcome: AttemptOutcome,
}

/// Ordered record of every physical request made for one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TacticHistory(pub Vec<AttemptRecord>);

impl TacticHistory {
    pub fn push(&mut self, attempt: u32, tactic: Tactic, outcome: AttemptOutcome) {
        self.0.push(AttemptRecord {
            attempt,
            tactic,
            outcome,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tactics(&self) -> impl Iterator<Item = Tactic> + '_ {
        self.0.iter().map(|record| record.tactic)
    }
}

impl fmt::Display for TacticHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, record) in self.0.iter().enumerate() {
            if idx != 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "#{} {}: {}",
                record.attempt + 1,
                record.tactic,
                record.outcome
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// HTTP 404. Permanent, never retried.
    #[error("page not found: {url}")]
    NotFound { url: String },
    #[error("all fetch attempts failed for {url} [{history}]")]
    Exhausted { url: String, history: TacticHistory },
}

impl FetchError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no {field} matched on {url}")]
    ExtractionEmpty { field: &'static str, url: String },
    #[error("no entry link for paginated content on {url}")]
    MissingEntryLink { url: String },
    #[error("no extractable chapters for {url}")]
    NoChapters { url: String },
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("crawl cancelled")]
    Cancelled,
}
