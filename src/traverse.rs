use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::adapter::{NextLink, SourceAdapter};
use crate::crawl::canonical_url;
use crate::error::{CrawlError, FetchError};
use crate::fetch::{FetchOptions, FetchOrchestrator};
use crate::formats::{Chapter, ChapterFailure, ChapterRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalConfig {
    /// Politeness delay between sequential requests.
    pub request_delay: Duration,
    pub parallel_threshold: usize,
    pub max_workers: usize,
    pub retry_workers: usize,
    pub retry_timeout: Duration,
    pub max_chain_pages: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(1000),
            parallel_threshold: 30,
            max_workers: 8,
            retry_workers: 2,
            retry_timeout: Duration::from_secs(45),
            max_chain_pages: 2000,
        }
    }
}

/// Chapters in sequence order plus the sequences that came back empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traversal {
    pub chapters: Vec<Chapter>,
    pub failures: Vec<ChapterFailure>,
}

impl Traversal {
    pub fn all_failed(&self) -> bool {
        self.failures.len() >= self.chapters.len()
    }
}

#[derive(Debug)]
enum ChapterError {
    InvalidUrl(String),
    Fetch(FetchError),
    /// The page loaded but no content rule produced text.
    Empty,
}

impl ChapterError {
    /// Rule mismatches and missing pages are not worth another request.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(err) if !err.is_permanent())
    }
}

impl fmt::Display for ChapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(url) => write!(f, "invalid chapter url: {url}"),
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Empty => f.write_str("no content matched"),
        }
    }
}

type Slot = Option<Result<String, ChapterError>>;

/// Walks a work's chapters for one crawl. Holds no per-work mutable state;
/// each traversal owns its result slots.
pub struct TraversalEngine {
    fetcher: Arc<FetchOrchestrator>,
    adapter: Arc<SourceAdapter>,
    config: TraversalConfig,
    cancel: CancellationToken,
}

impl TraversalEngine {
    pub fn new(
        fetcher: Arc<FetchOrchestrator>,
        adapter: Arc<SourceAdapter>,
        config: TraversalConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            adapter,
            config,
            cancel,
        }
    }

    pub async fn traverse_indexed(&self, refs: &[ChapterRef]) -> Result<Traversal, CrawlError> {
        let mut slots: Vec<Slot> = std::iter::repeat_with(|| None).take(refs.len()).collect();
        let options = self.adapter.fetch_options();

        if refs.len() > self.config.parallel_threshold {
            tracing::info!(
                chapters = refs.len(),
                workers = self.config.max_workers,
                "indexed traversal: parallel"
            );
            let all = (0..refs.len()).collect::<Vec<_>>();
            self.run_pool(refs, &all, self.config.max_workers, &options, &mut slots)
                .await?;

            let retry = slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| matches!(slot, Some(Err(err)) if err.is_retryable()))
                .map(|(idx, _)| idx)
                .collect::<Vec<_>>();
            if !retry.is_empty() {
                tracing::info!(
                    failed = retry.len(),
                    workers = self.config.retry_workers,
                    timeout_secs = self.config.retry_timeout.as_secs(),
                    "retrying failed chapters"
                );
                let retry_options = FetchOptions {
                    timeout: Some(self.config.retry_timeout),
                    ..options.clone()
                };
                self.run_pool(refs, &retry, self.config.retry_workers, &retry_options, &mut slots)
                    .await?;
            }
        } else {
            tracing::info!(chapters = refs.len(), "indexed traversal: sequential");
            for (idx, chapter) in refs.iter().enumerate() {
                if idx > 0 {
                    self.politeness_delay().await?;
                } else if self.cancel.is_cancelled() {
                    return Err(CrawlError::Cancelled);
                }
                let result = load_chapter(&self.fetcher, &self.adapter, &chapter.url, &options).await;
                log_chapter(idx + 1, &chapter.url, &result);
                slots[idx] = Some(result);
            }
        }

        Ok(assemble(refs, slots))
    }

    /// Bounded worker pool over `indices`; results land in their own slot.
    async fn run_pool(
        &self,
        refs: &[ChapterRef],
        indices: &[usize],
        workers: usize,
        options: &FetchOptions,
        slots: &mut [Slot],
    ) -> Result<(), CrawlError> {
        let workers = workers.max(1).min(indices.len().max(1));
        let mut join_set = tokio::task::JoinSet::new();
        let mut next = 0usize;
        let mut cancelled = false;

        while next < indices.len() || !join_set.is_empty() {
            while !cancelled && next < indices.len() && join_set.len() < workers {
                if self.cancel.is_cancelled() {
                    tracing::warn!(submitted = next, total = indices.len(), "cancelled; draining in-flight chapters");
                    cancelled = true;
                    break;
                }
                let idx = indices[next];
                let url = refs[idx].url.clone();
                let fetcher = Arc::clone(&self.fetcher);
                let adapter = Arc::clone(&self.adapter);
                let options = options.clone();
                join_set.spawn(async move {
                    let result = load_chapter(&fetcher, &adapter, &url, &options).await;
                    log_chapter(idx + 1, &url, &result);
                    (idx, result)
                });
                next += 1;
            }
            if cancelled && join_set.is_empty() {
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(err) => tracing::error!(error = %err, "chapter task failed"),
            }
        }

        if cancelled {
            return Err(CrawlError::Cancelled);
        }
        Ok(())
    }

    /// Follows next links from `start` until the chain ends, wraps around to
    /// `detail_url`, revisits a page or hits the page limit.
    pub async fn traverse_chain(&self, start: Url, detail_url: &Url) -> Result<Traversal, CrawlError> {
        let options = self.adapter.fetch_options();
        let detail = canonical_url(detail_url);
        let mut visited = HashSet::from([detail.clone()]);
        let mut traversal = Traversal::default();
        let mut current = start;

        loop {
            if traversal.chapters.len() >= self.config.max_chain_pages {
                tracing::warn!(pages = traversal.chapters.len(), "chain page limit reached");
                break;
            }
            if traversal.chapters.is_empty() {
                if self.cancel.is_cancelled() {
                    return Err(CrawlError::Cancelled);
                }
            } else {
                self.politeness_delay().await?;
            }

            visited.insert(canonical_url(&current));
            let sequence = traversal.chapters.len() + 1;
            let fetched = match self.fetcher.fetch(&current, &options).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    tracing::warn!(sequence, url = %current, error = %err, "chain page failed; stopping");
                    traversal.chapters.push(Chapter {
                        sequence,
                        title: page_title(sequence),
                        content: String::new(),
                        url: current.to_string(),
                    });
                    traversal.failures.push(ChapterFailure {
                        sequence,
                        url: current.to_string(),
                        reason: err.to_string(),
                    });
                    break;
                }
            };

            let title = self
                .adapter
                .extract_page_title(&fetched.text)
                .unwrap_or_else(|| page_title(sequence));
            let content = match self.adapter.extract_processed_content(&fetched.text) {
                Some(content) => {
                    tracing::debug!(sequence, url = %current, "chain page extracted");
                    content
                }
                None => {
                    tracing::warn!(sequence, url = %current, "no content matched");
                    traversal.failures.push(ChapterFailure {
                        sequence,
                        url: current.to_string(),
                        reason: ChapterError::Empty.to_string(),
                    });
                    String::new()
                }
            };
            traversal.chapters.push(Chapter {
                sequence,
                title,
                content,
                url: current.to_string(),
            });

            match self.adapter.next_link(&fetched.text, &current) {
                NextLink::End => {
                    tracing::debug!(pages = sequence, "chain ended");
                    break;
                }
                NextLink::Page(next) => {
                    let key = canonical_url(&next);
                    if key == detail {
                        tracing::info!(pages = sequence, "chain wrapped around to the detail page");
                        break;
                    }
                    if visited.contains(&key) {
                        tracing::warn!(pages = sequence, url = %next, "chain revisits a page; stopping");
                        break;
                    }
                    current = next;
                }
            }
        }

        Ok(traversal)
    }

    async fn politeness_delay(&self) -> Result<(), CrawlError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CrawlError::Cancelled),
            _ = tokio::time::sleep(self.config.request_delay) => Ok(()),
        }
    }
}

async fn load_chapter(
    fetcher: &FetchOrchestrator,
    adapter: &SourceAdapter,
    url: &str,
    options: &FetchOptions,
) -> Result<String, ChapterError> {
    let url = Url::parse(url).map_err(|_| ChapterError::InvalidUrl(url.to_owned()))?;
    let fetched = fetcher
        .fetch(&url, options)
        .await
        .map_err(ChapterError::Fetch)?;
    adapter
        .extract_processed_content(&fetched.text)
        .ok_or(ChapterError::Empty)
}

fn log_chapter(sequence: usize, url: &str, result: &Result<String, ChapterError>) {
    match result {
        Ok(content) => tracing::debug!(sequence, url, chars = content.chars().count(), "chapter extracted"),
        Err(err) => tracing::warn!(sequence, url, error = %err, "chapter failed"),
    }
}

fn assemble(refs: &[ChapterRef], slots: Vec<Slot>) -> Traversal {
    let mut traversal = Traversal::default();
    for (idx, (chapter, slot)) in refs.iter().zip(slots).enumerate() {
        let sequence = idx + 1;
        let content = match slot {
            Some(Ok(content)) => content,
            Some(Err(err)) => {
                traversal.failures.push(ChapterFailure {
                    sequence,
                    url: chapter.url.clone(),
                    reason: err.to_string(),
                });
                String::new()
            }
            None => {
                traversal.failures.push(ChapterFailure {
                    sequence,
                    url: chapter.url.clone(),
                    reason: "not fetched".to_owned(),
                });
                String::new()
            }
        };
        traversal.chapters.push(Chapter {
            sequence,
            title: chapter.title.clone(),
            content,
            url: chapter.url.clone(),
        });
    }
    traversal
}

fn page_title(sequence: usize) -> String {
    format!("第 {sequence} 页")
}
