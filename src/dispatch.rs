use std::collections::HashSet;

use url::Url;

use crate::adapter::SourceAdapter;
use crate::classify::WorkType;
use crate::crawl::canonical_url;
use crate::error::CrawlError;
use crate::formats::{Chapter, ChapterRef, Work};
use crate::ordinal::chapter_sort_key;

/// How the chapters of a dispatched work are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalPlan {
    /// The detail page was the only chapter; nothing left to fetch.
    Complete,
    Indexed(Vec<ChapterRef>),
    /// Follow next links starting here.
    Chain { start: Url },
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    /// Metadata filled in; chapters filled only for single-chapter works.
    pub work: Work,
    pub plan: TraversalPlan,
}

/// Extracts metadata from the detail page and picks exactly one traversal
/// mode for `work_type`.
pub fn dispatch(
    adapter: &SourceAdapter,
    work_type: WorkType,
    page_text: &str,
    detail_url: &Url,
    work_id: &str,
) -> Result<Dispatched, CrawlError> {
    let title = adapter
        .extract_title(page_text)
        .ok_or_else(|| CrawlError::ExtractionEmpty {
            field: "title",
            url: detail_url.to_string(),
        })?;

    let mut work = Work {
        author: adapter
            .extract_author(page_text)
            .unwrap_or_else(|| adapter.name().to_owned()),
        title,
        work_id: work_id.to_owned(),
        detail_url: detail_url.to_string(),
        work_type,
        description: adapter.extract_description(page_text),
        status: adapter.extract_status(page_text),
        chapters: Vec::new(),
    };

    let plan = match work_type {
        WorkType::SingleChapter => {
            let content = adapter
                .extract_processed_content(page_text)
                .ok_or_else(|| CrawlError::ExtractionEmpty {
                    field: "content",
                    url: detail_url.to_string(),
                })?;
            work.chapters.push(Chapter {
                sequence: 1,
                title: work.title.clone(),
                content,
                url: detail_url.to_string(),
            });
            TraversalPlan::Complete
        }
        WorkType::IndexedMultiChapter => {
            let refs = dedupe_and_order(adapter.extract_index(page_text, detail_url, work_id));
            if refs.is_empty() {
                return Err(CrawlError::ExtractionEmpty {
                    field: "chapter index",
                    url: detail_url.to_string(),
                });
            }
            TraversalPlan::Indexed(refs)
        }
        WorkType::PaginatedContent => {
            let start = adapter.entry_link(page_text, detail_url).ok_or_else(|| {
                CrawlError::MissingEntryLink {
                    url: detail_url.to_string(),
                }
            })?;
            TraversalPlan::Chain { start }
        }
    };

    let planned = match &plan {
        TraversalPlan::Complete => 1,
        TraversalPlan::Indexed(refs) => refs.len(),
        TraversalPlan::Chain { .. } => 0,
    };
    tracing::info!(title = %work.title, work_type = %work_type, planned, "dispatched");
    Ok(Dispatched { work, plan })
}

/// Drops later duplicates of a URL, then stable-sorts by the ordinal
/// inferred from each title.
pub fn dedupe_and_order(refs: Vec<ChapterRef>) -> Vec<ChapterRef> {
    let mut seen = HashSet::new();
    let mut refs = refs
        .into_iter()
        .filter(|chapter| match Url::parse(&chapter.url) {
            Ok(url) => seen.insert(canonical_url(&url).to_string()),
            Err(_) => seen.insert(chapter.url.clone()),
        })
        .collect::<Vec<_>>();
    refs.sort_by_key(|chapter| chapter_sort_key(&chapter.title));
    refs
}
