use std::sync::LazyLock;

use regex::{RegexSet, RegexSetBuilder};

/// Markers of interactive bot-verification pages. `data-sitekey` alone is
/// left out: ordinary login forms carry it too.
const SIGNATURES: &[&str] = &[
    r"challenges\.cloudflare\.com",
    r"\bcf-turnstile\b",
    r"data-cf-turnstile",
    r"/cdn-cgi/challenge-platform/",
    r"\bcf[-_]chl[-_]",
    r"<title>\s*just a moment",
    r"checking your browser before accessing",
    r"hcaptcha\.com/1/api\.js",
    r#"id\s*=\s*["']challenge-form["']"#,
    r"check\.ddos-guard\.net",
];

static SIGNATURE_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSetBuilder::new(SIGNATURES)
        .case_insensitive(true)
        .build()
        .expect("challenge signatures are valid")
});

/// Whether `text` is a bot-verification page rather than the requested
/// content.
pub fn is_challenge(text: &str) -> bool {
    SIGNATURE_SET.is_match(text)
}

/// Signatures that matched, for logging.
pub fn matched_signatures(text: &str) -> Vec<&'static str> {
    SIGNATURE_SET
        .matches(text)
        .into_iter()
        .map(|idx| SIGNATURES[idx])
        .collect()
}
