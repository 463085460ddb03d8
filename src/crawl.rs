use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::adapter::SourceAdapter;
use crate::classify::classify;
use crate::cli::{CrawlArgs, InspectArgs};
use crate::config::CrawlConfig;
use crate::dispatch::{Dispatched, TraversalPlan, dispatch};
use crate::error::CrawlError;
use crate::fetch::FetchOrchestrator;
use crate::formats::{CrawlOutcome, HistoryRecord};
use crate::history::{HistoryStore as _, LocalFsHistoryStore, MAX_CONSECUTIVE_FAILURES, consecutive_failures};
use crate::traverse::{TraversalConfig, TraversalEngine};

/// Identity of a page for de-duplication: fragment dropped, trailing slashes
/// trimmed, query kept.
pub fn canonical_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let mut path = canonical.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    canonical.set_path(&path);
    canonical
}

/// Runs detail fetch, classification, dispatch and traversal for works of
/// any adapter. Shared by every work of one crawl.
pub struct Crawler {
    fetcher: Arc<FetchOrchestrator>,
    traversal: TraversalConfig,
}

impl Crawler {
    pub fn new(fetcher: Arc<FetchOrchestrator>, traversal: TraversalConfig) -> Self {
        Self { fetcher, traversal }
    }

    pub fn from_config(config: &CrawlConfig) -> anyhow::Result<Self> {
        let fetcher = FetchOrchestrator::from_config(config).context("build fetch orchestrator")?;
        let tactics = fetcher
            .tactics()
            .iter()
            .map(|tactic| tactic.as_str())
            .collect::<Vec<_>>();
        tracing::debug!(?tactics, max_attempts = config.max_attempts, "fetch tactics ready");
        Ok(Self::new(Arc::new(fetcher), config.traversal()))
    }

    /// Fetches the detail page and decides how the work's chapters are
    /// obtained, without fetching any of them.
    pub async fn inspect_work(
        &self,
        adapter: &SourceAdapter,
        work_id: &str,
    ) -> Result<Dispatched, CrawlError> {
        let detail_url = adapter.detail_url(work_id)?;
        self.dispatch_detail(adapter, &detail_url, work_id).await
    }

    async fn dispatch_detail(
        &self,
        adapter: &SourceAdapter,
        detail_url: &Url,
        work_id: &str,
    ) -> Result<Dispatched, CrawlError> {
        let fetched = self
            .fetcher
            .fetch(detail_url, &adapter.fetch_options())
            .await?;
        let work_type = match adapter.work_type_override() {
            Some(work_type) => work_type,
            None => classify(&fetched.text),
        };
        tracing::debug!(url = %detail_url, work_type = %work_type, tactic = %fetched.tactic, "detail page classified");
        dispatch(adapter, work_type, &fetched.text, detail_url, work_id)
    }

    pub async fn crawl_work(
        &self,
        adapter: Arc<SourceAdapter>,
        work_id: &str,
        cancel: CancellationToken,
    ) -> Result<CrawlOutcome, CrawlError> {
        if cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        let detail_url = adapter.detail_url(work_id)?;
        let Dispatched { mut work, plan } =
            self.dispatch_detail(&adapter, &detail_url, work_id).await?;

        let engine = TraversalEngine::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&adapter),
            self.traversal.clone(),
            cancel,
        );
        let traversal = match plan {
            TraversalPlan::Complete => {
                return Ok(CrawlOutcome {
                    work,
                    failures: Vec::new(),
                });
            }
            TraversalPlan::Indexed(refs) => engine.traverse_indexed(&refs).await?,
            TraversalPlan::Chain { start } => engine.traverse_chain(start, &detail_url).await?,
        };
        if traversal.all_failed() {
            return Err(CrawlError::NoChapters {
                url: detail_url.to_string(),
            });
        }

        work.chapters = traversal.chapters;
        Ok(CrawlOutcome {
            work,
            failures: traversal.failures,
        })
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling crawl");
            token.cancel();
        }
    });
    cancel
}

pub async fn run(args: CrawlArgs) -> anyhow::Result<()> {
    let mut config = CrawlConfig::from_args(&args.settings)?;
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.request_delay_ms = delay_ms;
    }
    config.validate()?;

    let adapter = Arc::new(SourceAdapter::load(&args.adapter)?);
    let crawler = Crawler::from_config(&config)?;
    let history = LocalFsHistoryStore::new(args.history.clone().unwrap_or_else(|| args.out.clone()));
    let cancel = cancel_on_ctrl_c();
    let source = adapter.name().to_owned();

    let mut failed = 0usize;
    for work_id in &args.ids {
        if cancel.is_cancelled() {
            break;
        }

        let previous = history
            .records_for(&source, work_id)
            .await
            .context("read crawl history")?;
        let streak = consecutive_failures(&previous);
        if streak >= MAX_CONSECUTIVE_FAILURES {
            tracing::warn!(source = %source, work_id = %work_id, streak, "skipping work with repeated failures");
            history
                .append(&HistoryRecord::failure(
                    &source,
                    work_id,
                    format!("skipped after {streak} consecutive failures"),
                ))
                .await?;
            failed += 1;
            continue;
        }

        match crawler
            .crawl_work(Arc::clone(&adapter), work_id, cancel.clone())
            .await
        {
            Ok(outcome) => {
                let path = crate::book::write_work(&args.out, &outcome.work)
                    .with_context(|| format!("write work {work_id}"))?;
                tracing::info!(
                    work_id = %work_id,
                    title = %outcome.work.title,
                    chapters = outcome.succeeded_chapters(),
                    failed_chapters = outcome.failed_chapters(),
                    "work crawled"
                );
                for failure in &outcome.failures {
                    tracing::warn!(sequence = failure.sequence, url = %failure.url, reason = %failure.reason, "chapter missing from output");
                }
                history
                    .append(&HistoryRecord::success(
                        &source,
                        &outcome,
                        &path.display().to_string(),
                    ))
                    .await?;
                println!("{}", path.display());
            }
            Err(CrawlError::Cancelled) => {
                tracing::warn!(work_id = %work_id, "crawl cancelled");
                break;
            }
            Err(err) => {
                tracing::error!(work_id = %work_id, error = %err, "work failed");
                history
                    .append(&HistoryRecord::failure(&source, work_id, err.to_string()))
                    .await?;
                failed += 1;
            }
        }
    }

    if cancel.is_cancelled() {
        anyhow::bail!("crawl cancelled");
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} works failed", args.ids.len());
    }
    Ok(())
}

pub async fn inspect(args: InspectArgs) -> anyhow::Result<()> {
    let config = CrawlConfig::from_args(&args.settings)?;
    let adapter = SourceAdapter::load(&args.adapter)?;
    let crawler = Crawler::from_config(&config)?;
    let dispatched = crawler
        .inspect_work(&adapter, &args.id)
        .await
        .with_context(|| format!("inspect work {}", args.id))?;

    let plan = match &dispatched.plan {
        TraversalPlan::Complete => serde_json::json!({ "mode": "complete" }),
        TraversalPlan::Indexed(refs) => serde_json::json!({ "mode": "indexed", "chapters": refs }),
        TraversalPlan::Chain { start } => {
            serde_json::json!({ "mode": "chain", "start": start.as_str() })
        }
    };
    let report = serde_json::json!({ "work": dispatched.work, "plan": plan });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize inspect report")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::classify::WorkType;
    use crate::fetch::RetryPolicy;
    use crate::fetch::testing::{ScriptedTransport, status};

    const ADAPTER: &str = r#"
name: demo
base_url: https://books.example/
detail_url: "{base}/book/{id}/"
title_patterns: ['<h1>(.*?)</h1>']
content_patterns: ['<div id="content">(.*?)</div>']
page_title_patterns: ['<h2>(.*?)</h2>']
"#;

    fn crawler(transport: ScriptedTransport) -> (Crawler, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let fetcher = FetchOrchestrator::new(transport.clone(), RetryPolicy::default());
        let traversal = TraversalConfig {
            request_delay: Duration::from_millis(10),
            ..TraversalConfig::default()
        };
        (Crawler::new(Arc::new(fetcher), traversal), transport)
    }

    fn adapter() -> Arc<SourceAdapter> {
        Arc::new(SourceAdapter::from_yaml_str(ADAPTER).unwrap())
    }

    #[test]
    fn canonical_url_ignores_fragment_and_trailing_slash() {
        let a = Url::parse("https://b.example/book/1/#top").unwrap();
        let b = Url::parse("https://b.example/book/1").unwrap();
        assert_eq!(canonical_url(&a), canonical_url(&b));

        let page2 = Url::parse("https://b.example/read?page=2").unwrap();
        let page3 = Url::parse("https://b.example/read?page=3").unwrap();
        assert_ne!(canonical_url(&page2), canonical_url(&page3));
        assert_eq!(canonical_url(&Url::parse("https://b.example/").unwrap()).path(), "/");
    }

    #[tokio::test(start_paused = true)]
    async fn indexed_work_is_crawled_in_order() {
        let (crawler, transport) = crawler(
            ScriptedTransport::all_tactics()
                .page(
                    "https://books.example/book/1/",
                    r#"<h1>长篇</h1><p>目录</p>
                    <a href="2.html">第二章 承</a>
                    <a href="1.html">第一章 起</a>"#,
                )
                .page("https://books.example/book/1/1.html", r#"<div id="content">起</div>"#)
                .page("https://books.example/book/1/2.html", r#"<div id="content">承</div>"#),
        );

        let outcome = crawler
            .crawl_work(adapter(), "1", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.work.title, "长篇");
        assert_eq!(outcome.work.work_type, WorkType::IndexedMultiChapter);
        let contents = outcome
            .work
            .chapters
            .iter()
            .map(|c| (c.sequence, c.content.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(contents, vec![(1, "起"), (2, "承")]);
        assert!(outcome.failures.is_empty());
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_chapter_work_needs_one_request() {
        let (crawler, transport) = crawler(ScriptedTransport::all_tactics().page(
            "https://books.example/book/2/",
            r#"<h1>短篇</h1><div id="content">全文</div>"#,
        ));

        let outcome = crawler
            .crawl_work(adapter(), "2", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.work.work_type, WorkType::SingleChapter);
        assert_eq!(outcome.work.chapters.len(), 1);
        assert_eq!(outcome.work.chapters[0].content, "全文");
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn work_with_no_loadable_chapter_fails() {
        let (crawler, _transport) = crawler(ScriptedTransport::all_tactics().page(
            "https://books.example/book/3/",
            r#"<h1>长篇</h1><p>目录</p><a href="1.html">第一章</a><a href="2.html">第二章</a>"#,
        ));

        let err = crawler
            .crawl_work(adapter(), "3", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::NoChapters { .. }), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_detail_page_is_a_fetch_error() {
        let (crawler, transport) = crawler(
            ScriptedTransport::all_tactics().script("https://books.example/book/4/", vec![status(404)]),
        );

        let err = crawler
            .crawl_work(adapter(), "4", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Fetch(_)), "{err:?}");
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_stops_before_any_request() {
        let (crawler, transport) = crawler(ScriptedTransport::all_tactics());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = crawler.crawl_work(adapter(), "5", cancel).await.unwrap_err();
        assert!(matches!(err, CrawlError::Cancelled));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inspect_reports_the_plan_without_traversing() {
        let (crawler, transport) = crawler(ScriptedTransport::all_tactics().page(
            "https://books.example/book/6/",
            r#"<h1>分页</h1><p>第1页 共3页</p><a href="/book/6/1_1.html">开始阅读</a>"#,
        ));

        let dispatched = crawler.inspect_work(&adapter(), "6").await.unwrap();
        assert_eq!(dispatched.work.work_type, WorkType::PaginatedContent);
        assert!(matches!(dispatched.plan, TraversalPlan::Chain { .. }));
        assert_eq!(transport.calls().len(), 1);
    }
}
