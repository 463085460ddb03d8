use serde::{Deserialize, Serialize};

use crate::classify::WorkType;

/// A chapter link found on an index page or while following a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based and gap-free within a work.
    pub sequence: usize,
    pub title: String,
    /// Empty when the chapter could not be fetched or extracted.
    pub content: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    pub title: String,
    /// Author when the source exposes one, otherwise the source name.
    pub author: String,
    pub work_id: String,
    pub detail_url: String,
    pub work_type: WorkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub sequence: usize,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub work: Work,
    pub failures: Vec<ChapterFailure>,
}

impl CrawlOutcome {
    pub fn failed_chapters(&self) -> usize {
        self.failures.len()
    }

    pub fn succeeded_chapters(&self) -> usize {
        self.work.chapters.len().saturating_sub(self.failures.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
}

/// One line of the crawl history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub source: String,
    pub work_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub crawled_at: String,
    pub status: HistoryStatus,
    pub chapters: usize,
    pub failed_chapters: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl HistoryRecord {
    pub fn success(source: &str, outcome: &CrawlOutcome, file_path: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_owned(),
            work_id: outcome.work.work_id.clone(),
            title: Some(outcome.work.title.clone()),
            crawled_at: chrono::Utc::now().to_rfc3339(),
            status: HistoryStatus::Success,
            chapters: outcome.work.chapters.len(),
            failed_chapters: outcome.failed_chapters(),
            error: None,
            file_path: Some(file_path.to_owned()),
        }
    }

    pub fn failure(source: &str, work_id: &str, error: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_owned(),
            work_id: work_id.to_owned(),
            title: None,
            crawled_at: chrono::Utc::now().to_rfc3339(),
            status: HistoryStatus::Failed,
            chapters: 0,
            failed_chapters: 0,
            error: Some(error.into()),
            file_path: None,
        }
    }
}
