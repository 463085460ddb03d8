use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context as _;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::WorkType;
use crate::cli::AdapterCheckArgs;
use crate::crawl::canonical_url;
use crate::encoding::Script;
use crate::error::CrawlError;
use crate::fetch::FetchOptions;
use crate::formats::ChapterRef;
use crate::postprocess::{PostProcessChain, PostProcessOp, compile_pattern, default_ops};

const DEFAULT_ENTRY_PATTERNS: &[&str] = &[
    r#"<a\s[^>]*href\s*=\s*["']([^"'#]+)["'][^>]*>\s*(?:<[^>]+>\s*)*(?:开始阅读|阅读全文|立即阅读|begin\s+reading|start\s+reading)"#,
    r#"<a\s[^>]*href\s*=\s*["']([^"'#]+)["'][^>]*>\s*(?:第\s*(?:一|1)\s*[章节页]|chapter\s+1\b)"#,
];

const DEFAULT_NEXT_PATTERNS: &[&str] = &[
    r#"<a\s[^>]*rel\s*=\s*["']next["'][^>]*href\s*=\s*["']([^"']*)["']"#,
    r#"<a\s[^>]*href\s*=\s*["']([^"']*)["'][^>]*rel\s*=\s*["']next["']"#,
    r#"<a\s[^>]*href\s*=\s*["']([^"']*)["'][^>]*>\s*下一[章节页]"#,
    r#"<a\s[^>]*href\s*=\s*["']([^"']*)["'][^>]*>\s*next\s+(?:chapter|page)"#,
];

const DEFAULT_INDEX_PATTERN: &str = r#"<a\s[^>]*href\s*=\s*["'](?P<url>[^"'#]+)["'][^>]*>\s*(?P<title>(?:第[^<]{1,20}?[章节回卷]|chapter\s*\d+|序章|楔子|尾声|番外)[^<]*)</a>"#;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex is valid"));
static SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("space regex is valid"));

/// A source adapter as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterSpec {
    pub name: String,
    pub base_url: String,
    /// `{base}` and `{id}` are substituted.
    pub detail_url: String,
    /// `{base}`, `{id}` and `{chapter}` are substituted.
    #[serde(default)]
    pub chapter_url: Option<String>,
    pub title_patterns: Vec<String>,
    pub content_patterns: Vec<String>,
    #[serde(default)]
    pub author_patterns: Vec<String>,
    #[serde(default)]
    pub status_patterns: Vec<String>,
    #[serde(default)]
    pub description_patterns: Vec<String>,
    /// Narrows the index search to the first match of this pattern.
    #[serde(default)]
    pub chapter_index_container: Option<String>,
    /// Named groups: `url` (or `id`) and `title`.
    #[serde(default)]
    pub chapter_index_pattern: Option<String>,
    #[serde(default)]
    pub pagination_entry_patterns: Vec<String>,
    #[serde(default)]
    pub next_link_patterns: Vec<String>,
    /// Substrings of a next-link href that mark the end of the content.
    #[serde(default)]
    pub end_markers: Vec<String>,
    #[serde(default)]
    pub page_title_patterns: Vec<String>,
    #[serde(default = "default_ops")]
    pub post_process: Vec<PostProcessOp>,
    #[serde(default)]
    pub work_type: Option<WorkType>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub script: Script,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// What a page says about the next page of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextLink {
    Page(Url),
    End,
}

/// Compiled extraction rules for one source.
#[derive(Debug, Clone)]
pub struct SourceAdapter {
    name: String,
    base_url: Url,
    detail_template: String,
    chapter_template: Option<String>,
    title: Vec<Regex>,
    content: Vec<Regex>,
    author: Vec<Regex>,
    status: Vec<Regex>,
    description: Vec<Regex>,
    index_container: Option<Regex>,
    index_pattern: Regex,
    entry: Vec<Regex>,
    next: Vec<Regex>,
    end_markers: Vec<String>,
    page_title: Vec<Regex>,
    post_process: PostProcessChain,
    work_type: Option<WorkType>,
    encoding: Option<String>,
    script: Script,
    headers: Vec<(String, String)>,
}

impl SourceAdapter {
    pub fn compile(spec: AdapterSpec) -> anyhow::Result<Self> {
        if spec.name.trim().is_empty() {
            anyhow::bail!("adapter name is empty");
        }
        let base_url = Url::parse(&spec.base_url)
            .with_context(|| format!("parse base_url: {}", spec.base_url))?;
        if !spec.detail_url.contains("{id}") {
            anyhow::bail!("detail_url must contain {{id}}: {}", spec.detail_url);
        }
        if let Some(template) = &spec.chapter_url {
            if !template.contains("{chapter}") {
                anyhow::bail!("chapter_url must contain {{chapter}}: {template}");
            }
        }
        if spec.title_patterns.is_empty() || spec.content_patterns.is_empty() {
            anyhow::bail!("title_patterns and content_patterns must not be empty");
        }

        let index_pattern = compile_pattern(
            spec.chapter_index_pattern
                .as_deref()
                .unwrap_or(DEFAULT_INDEX_PATTERN),
        )
        .context("chapter_index_pattern")?;
        let names = index_pattern.capture_names().flatten().collect::<HashSet<_>>();
        if !names.contains("url") && !names.contains("id") {
            anyhow::bail!("chapter_index_pattern needs a `url` or `id` named group");
        }
        if names.contains("id") && !names.contains("url") && spec.chapter_url.is_none() {
            anyhow::bail!("chapter_index_pattern with an `id` group needs chapter_url");
        }

        Ok(Self {
            base_url,
            detail_template: spec.detail_url,
            chapter_template: spec.chapter_url,
            title: compile_all(&spec.title_patterns).context("title_patterns")?,
            content: compile_all(&spec.content_patterns).context("content_patterns")?,
            author: compile_all(&spec.author_patterns).context("author_patterns")?,
            status: compile_all(&spec.status_patterns).context("status_patterns")?,
            description: compile_all(&spec.description_patterns)
                .context("description_patterns")?,
            index_container: spec
                .chapter_index_container
                .as_deref()
                .map(compile_pattern)
                .transpose()
                .context("chapter_index_container")?,
            index_pattern,
            entry: compile_or_default(&spec.pagination_entry_patterns, DEFAULT_ENTRY_PATTERNS)
                .context("pagination_entry_patterns")?,
            next: compile_or_default(&spec.next_link_patterns, DEFAULT_NEXT_PATTERNS)
                .context("next_link_patterns")?,
            end_markers: spec
                .end_markers
                .into_iter()
                .filter(|marker| !marker.is_empty())
                .collect(),
            page_title: compile_all(&spec.page_title_patterns).context("page_title_patterns")?,
            post_process: PostProcessChain::compile(&spec.post_process)
                .context("post_process")?,
            work_type: spec.work_type,
            encoding: spec.encoding,
            script: spec.script,
            headers: spec.headers.into_iter().collect(),
            name: spec.name,
        })
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let spec: AdapterSpec = serde_yaml::from_str(raw).context("parse adapter yaml")?;
        let name = spec.name.clone();
        Self::compile(spec).with_context(|| format!("compile adapter {name:?}"))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read adapter: {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("load adapter: {}", path.display()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn work_type_override(&self) -> Option<WorkType> {
        self.work_type
    }

    pub fn post_process(&self) -> &PostProcessChain {
        &self.post_process
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            headers: self.headers.clone(),
            encoding: self.encoding.clone(),
            script: self.script,
            ..FetchOptions::default()
        }
    }

    fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn detail_url(&self, work_id: &str) -> Result<Url, CrawlError> {
        let raw = self
            .detail_template
            .replace("{base}", self.base())
            .replace("{id}", work_id);
        parse_url(&raw)
    }

    /// Chapter URL from the template, or `chapter_id` resolved against the
    /// work's detail URL when the adapter has no template.
    pub fn chapter_url(&self, work_id: &str, chapter_id: &str) -> Result<Url, CrawlError> {
        match &self.chapter_template {
            Some(template) => parse_url(
                &template
                    .replace("{base}", self.base())
                    .replace("{id}", work_id)
                    .replace("{chapter}", chapter_id),
            ),
            None => {
                let detail = self.detail_url(work_id)?;
                detail.join(chapter_id).map_err(|source| CrawlError::InvalidUrl {
                    url: chapter_id.to_owned(),
                    source,
                })
            }
        }
    }

    pub fn extract_title(&self, text: &str) -> Option<String> {
        first_match(&self.title, text).map(|raw| clean_inline(&raw)).filter(|s| !s.is_empty())
    }

    pub fn extract_author(&self, text: &str) -> Option<String> {
        first_match(&self.author, text).map(|raw| clean_inline(&raw)).filter(|s| !s.is_empty())
    }

    pub fn extract_status(&self, text: &str) -> Option<String> {
        first_match(&self.status, text).map(|raw| clean_inline(&raw)).filter(|s| !s.is_empty())
    }

    pub fn extract_description(&self, text: &str) -> Option<String> {
        first_match(&self.description, text)
            .map(|raw| clean_inline(&raw))
            .filter(|s| !s.is_empty())
    }

    pub fn extract_page_title(&self, text: &str) -> Option<String> {
        first_match(&self.page_title, text)
            .map(|raw| clean_inline(&raw))
            .filter(|s| !s.is_empty())
    }

    /// Raw content match, before post-processing.
    pub fn extract_content(&self, text: &str) -> Option<String> {
        first_match(&self.content, text)
    }

    /// Content match run through the post-processing chain. `None` when no
    /// rule matched or nothing survived post-processing.
    pub fn extract_processed_content(&self, text: &str) -> Option<String> {
        let raw = self.extract_content(text)?;
        let processed = self.post_process.apply(&raw);
        (!processed.trim().is_empty()).then_some(processed)
    }

    /// Chapter links in page order, relative links resolved against
    /// `page_url`. Duplicates are kept; the dispatcher removes them.
    pub fn extract_index(&self, text: &str, page_url: &Url, work_id: &str) -> Vec<ChapterRef> {
        let scope = match &self.index_container {
            Some(container) => match container.captures(text) {
                Some(caps) => capture_value(&caps).unwrap_or_default(),
                None => return Vec::new(),
            },
            None => text,
        };

        let mut refs = Vec::new();
        for caps in self.index_pattern.captures_iter(scope) {
            let url = if let Some(href) = caps.name("url") {
                resolve_link(page_url, href.as_str())
            } else if let Some(id) = caps.name("id") {
                self.chapter_url(work_id, id.as_str().trim()).ok()
            } else {
                None
            };
            let Some(url) = url else {
                continue;
            };
            let title = caps
                .name("title")
                .map(|title| clean_inline(title.as_str()))
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| format!("Chapter {}", refs.len() + 1));
            refs.push(ChapterRef {
                title,
                url: url.to_string(),
            });
        }
        refs
    }

    pub fn entry_link(&self, text: &str, page_url: &Url) -> Option<Url> {
        self.entry.iter().find_map(|pattern| {
            pattern
                .captures_iter(text)
                .filter_map(|caps| capture_value(&caps).map(str::to_owned))
                .find_map(|href| resolve_link(page_url, &href))
        })
    }

    /// The first next-link rule that matches decides. An empty, `#` or
    /// `javascript:` href, or one containing an end marker, ends the chain.
    pub fn next_link(&self, text: &str, page_url: &Url) -> NextLink {
        let Some(href) = self
            .next
            .iter()
            .find_map(|pattern| pattern.captures(text).and_then(|caps| capture_value(&caps).map(str::to_owned)))
        else {
            return NextLink::End;
        };
        let href = html_escape::decode_html_entities(href.trim()).into_owned();
        if href.is_empty()
            || href.starts_with('#')
            || href.to_ascii_lowercase().starts_with("javascript:")
            || self.end_markers.iter().any(|marker| href.contains(marker.as_str()))
        {
            return NextLink::End;
        }
        match resolve_link(page_url, &href) {
            Some(url) if canonical_url(&url) != canonical_url(page_url) => NextLink::Page(url),
            _ => NextLink::End,
        }
    }
}

fn compile_all(patterns: &[String]) -> anyhow::Result<Vec<Regex>> {
    patterns
        .iter()
        .enumerate()
        .map(|(idx, pattern)| compile_pattern(pattern).with_context(|| format!("pattern #{idx}")))
        .collect()
}

fn compile_or_default(patterns: &[String], defaults: &[&str]) -> anyhow::Result<Vec<Regex>> {
    if patterns.is_empty() {
        return defaults.iter().map(|pattern| compile_pattern(pattern)).collect();
    }
    compile_all(patterns)
}

/// Group 1, or the whole match when the pattern has no groups.
fn capture_value<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
}

/// First non-empty capture across `patterns`, in declared order.
fn first_match(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|caps| capture_value(&caps).map(str::trim))
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    })
}

fn clean_inline(raw: &str) -> String {
    let text = TAG_RE.replace_all(raw, "");
    let text = html_escape::decode_html_entities(&text);
    SPACE_RE.replace_all(&text, " ").trim().to_owned()
}

fn resolve_link(page_url: &Url, href: &str) -> Option<Url> {
    let href = html_escape::decode_html_entities(href.trim());
    let url = page_url.join(&href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn parse_url(raw: &str) -> Result<Url, CrawlError> {
    Url::parse(raw).map_err(|source| CrawlError::InvalidUrl {
        url: raw.to_owned(),
        source,
    })
}

pub fn check(args: AdapterCheckArgs) -> anyhow::Result<()> {
    let adapter = SourceAdapter::load(&args.adapter)?;
    println!("adapter: {}", adapter.name());
    println!("base_url: {}", adapter.base_url);
    println!(
        "work_type: {}",
        adapter
            .work_type_override()
            .map_or_else(|| "auto".to_owned(), |work_type| work_type.to_string())
    );
    println!("post_process steps: {}", adapter.post_process().len());
    if let Some(id) = args.id.as_deref() {
        println!("detail_url: {}", adapter.detail_url(id)?);
    }
    tracing::info!(adapter = adapter.name(), "adapter ok");
    Ok(())
}
