use std::sync::LazyLock;

use regex::{Regex, RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};

/// Structural type of a work, decided once per fetched detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    SingleChapter,
    IndexedMultiChapter,
    PaginatedContent,
}

impl std::fmt::Display for WorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SingleChapter => "single_chapter",
            Self::IndexedMultiChapter => "indexed_multi_chapter",
            Self::PaginatedContent => "paginated_content",
        })
    }
}

const PAGINATED_MARKERS: &[&str] = &[
    r"开始阅读",
    r#"<a[^>]+href\s*=\s*["'][^"']*ltxs[^"']*["']"#,
    r#"rel\s*=\s*["']next["'][^>]*>[^<]*(?:下一|next)"#,
    r"下一章|下一页",
    r"\b(?:begin|start)\s+reading\b",
    r"\bnext\s+(?:chapter|page)\b",
];

const INDEX_MARKERS: &[&str] = &[
    r"章节列表|章节目录|chapter[\s_-]*list",
    r"第\s*\d+\s*章",
    r"目录|table\s+of\s+contents",
    r#"<div[^>]+class\s*=\s*["'][^"']*\bchapter"#,
    r#"<ul[^>]+class\s*=\s*["'][^"']*\bchapters\b"#,
];

static PAGINATED_SET: LazyLock<RegexSet> = LazyLock::new(|| build_set(PAGINATED_MARKERS));
static INDEX_SET: LazyLock<RegexSet> = LazyLock::new(|| build_set(INDEX_MARKERS));
static CHAPTER_N_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bchapter\s+\d+").expect("chapter-number regex is valid")
});

fn build_set(patterns: &[&str]) -> RegexSet {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .expect("classifier markers are valid")
}

/// Classifies a detail page. Pagination wins over index markers, since some
/// paginated works also show a one-entry "index" next to the reading link.
pub fn classify(text: &str) -> WorkType {
    if PAGINATED_SET.is_match(text) {
        return WorkType::PaginatedContent;
    }
    if INDEX_SET.is_match(text) || CHAPTER_N_RE.find_iter(text).take(2).count() >= 2 {
        return WorkType::IndexedMultiChapter;
    }
    WorkType::SingleChapter
}
