use std::sync::LazyLock;

use anyhow::Context as _;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// One named text transform as written in an adapter file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PostProcessOp {
    /// Removes markup; `<br>` and block boundaries become newlines.
    StripHtml,
    DecodeEntities,
    NormalizeWhitespace,
    /// Trims every line and drops blank ones.
    TrimLines,
    Remove {
        pattern: String,
    },
    Replace {
        pattern: String,
        with: String,
    },
    ReplaceLiteral {
        from: String,
        to: String,
    },
    DropLinesContaining {
        needles: Vec<String>,
    },
    HtmlToMarkdown,
}

pub fn default_ops() -> Vec<PostProcessOp> {
    vec![
        PostProcessOp::StripHtml,
        PostProcessOp::DecodeEntities,
        PostProcessOp::TrimLines,
    ]
}

#[derive(Debug, Clone)]
enum Step {
    StripHtml,
    DecodeEntities,
    NormalizeWhitespace,
    TrimLines,
    Replace { regex: Regex, with: String },
    ReplaceLiteral { from: String, to: String },
    DropLinesContaining(Vec<String>),
    HtmlToMarkdown,
}

/// Ordered transforms, resolved when the adapter is built.
#[derive(Debug, Clone)]
pub struct PostProcessChain {
    steps: Vec<Step>,
}

static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|h[1-6]|li|tr|section|article)\s*>|<(?:p|div|h[1-6]|li|tr)(?:\s[^>]*)?>")
        .expect("break regex is valid")
});
static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<!--.*?-->")
        .expect("script/style regex is valid")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex is valid"));
static INLINE_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}\u{2002}\u{2003}\u{2009}\u{200b}]+").expect("space regex is valid"));
static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("blank-run regex is valid"));

impl PostProcessChain {
    pub fn compile(ops: &[PostProcessOp]) -> anyhow::Result<Self> {
        let steps = ops
            .iter()
            .enumerate()
            .map(|(idx, op)| -> anyhow::Result<Step> {
                Ok(match op {
                    PostProcessOp::StripHtml => Step::StripHtml,
                    PostProcessOp::DecodeEntities => Step::DecodeEntities,
                    PostProcessOp::NormalizeWhitespace => Step::NormalizeWhitespace,
                    PostProcessOp::TrimLines => Step::TrimLines,
                    PostProcessOp::Remove { pattern } => Step::Replace {
                        regex: compile_pattern(pattern)
                            .with_context(|| format!("post_process[{idx}] remove"))?,
                        with: String::new(),
                    },
                    PostProcessOp::Replace { pattern, with } => Step::Replace {
                        regex: compile_pattern(pattern)
                            .with_context(|| format!("post_process[{idx}] replace"))?,
                        with: with.clone(),
                    },
                    PostProcessOp::ReplaceLiteral { from, to } => {
                        if from.is_empty() {
                            anyhow::bail!("post_process[{idx}] replace_literal: `from` is empty");
                        }
                        Step::ReplaceLiteral {
                            from: from.clone(),
                            to: to.clone(),
                        }
                    }
                    PostProcessOp::DropLinesContaining { needles } => {
                        Step::DropLinesContaining(needles.clone())
                    }
                    PostProcessOp::HtmlToMarkdown => Step::HtmlToMarkdown,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        self.steps
            .iter()
            .fold(text.to_owned(), |text, step| step.apply(text))
    }
}

impl Step {
    fn apply(&self, text: String) -> String {
        match self {
            Self::StripHtml => strip_html(&text),
            Self::DecodeEntities => html_escape::decode_html_entities(&text).into_owned(),
            Self::NormalizeWhitespace => {
                let text = text.replace("\r\n", "\n");
                let text = INLINE_SPACE_RE.replace_all(&text, " ");
                BLANK_RUN_RE.replace_all(&text, "\n\n").trim().to_owned()
            }
            Self::TrimLines => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Replace { regex, with } => regex.replace_all(&text, with.as_str()).into_owned(),
            Self::ReplaceLiteral { from, to } => text.replace(from.as_str(), to),
            Self::DropLinesContaining(needles) => text
                .lines()
                .filter(|line| !needles.iter().any(|needle| line.contains(needle.as_str())))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::HtmlToMarkdown => html2md::parse_html(&text),
        }
    }
}

fn strip_html(html: &str) -> String {
    let text = SCRIPT_STYLE_RE.replace_all(html, "");
    let text = BREAK_RE.replace_all(&text, "\n");
    TAG_RE.replace_all(&text, "").into_owned()
}

/// Adapter patterns are case-insensitive and `.` matches newlines.
pub fn compile_pattern(pattern: &str) -> anyhow::Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .with_context(|| format!("invalid pattern: {pattern}"))
}
