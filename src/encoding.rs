use std::sync::LazyLock;

use encoding_rs::Encoding;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Legacy encodings tried, in order, when the declared decode looks garbled.
fn candidates() -> [&'static Encoding; 7] {
    [
        encoding_rs::UTF_8,
        encoding_rs::GBK,
        encoding_rs::GB18030,
        encoding_rs::BIG5,
        encoding_rs::SHIFT_JIS,
        encoding_rs::EUC_KR,
        encoding_rs::WINDOWS_1252,
    ]
}

/// Byte sequences left behind when UTF-8 text is decoded as Latin-1 (or the
/// reverse), plus the replacement character itself.
const MOJIBAKE_MARKERS: &[&str] = &["\u{FFFD}", "ï¿½", "â€", "Ã©", "Ã¨", "Ã¼", "Â\u{a0}", "Â·"];

const MIN_SAMPLE_CHARS: usize = 100;
const MAX_SAMPLE_CHARS: usize = 4000;
const MIN_SCRIPT_RATIO: f64 = 0.10;

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<!--.*?-->")
        .expect("script/style regex is valid")
});

/// Characters the garbling heuristic expects a correctly decoded page to be
/// made of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    #[default]
    Cjk,
    Latin,
    /// Disables the ratio check; only mojibake markers count.
    Any,
}

impl Script {
    fn is_recognisable(self, ch: char) -> bool {
        match self {
            Self::Cjk => matches!(
                ch,
                '\u{4e00}'..='\u{9fff}'
                    | '\u{3400}'..='\u{4dbf}'
                    | '\u{f900}'..='\u{faff}'
                    | '\u{3000}'..='\u{303f}'
                    | '\u{ff00}'..='\u{ffef}'
            ),
            Self::Latin => ch.is_ascii_alphabetic() || matches!(ch, '\u{c0}'..='\u{24f}'),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub text: String,
    pub encoding: &'static Encoding,
    /// True when no candidate produced clean text and `text` is the
    /// best-effort decode with replacement characters.
    pub garbled: bool,
}

/// Decodes `bytes`, falling back through the legacy candidates when the declared
/// encoding produces text that looks garbled. Never fails.
pub fn resolve(bytes: &[u8], declared: Option<&str>, script: Script) -> Resolved {
    let primary = declared
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);

    let (text, used, had_errors) = primary.decode(bytes);
    if !had_errors && !looks_garbled(&text, script) {
        return Resolved {
            text: text.into_owned(),
            encoding: used,
            garbled: false,
        };
    }

    for candidate in candidates() {
        if candidate == used {
            continue;
        }
        let Some(decoded) = candidate.decode_without_bom_handling_and_without_replacement(bytes)
        else {
            continue;
        };
        if !looks_garbled(&decoded, script) {
            tracing::debug!(
                declared = used.name(),
                resolved = candidate.name(),
                "recovered page encoding"
            );
            return Resolved {
                text: decoded.into_owned(),
                encoding: candidate,
                garbled: false,
            };
        }
    }

    tracing::warn!(
        declared = used.name(),
        "no candidate encoding produced clean text; using lossy decode"
    );
    Resolved {
        text: text.into_owned(),
        encoding: used,
        garbled: true,
    }
}

/// Mojibake markers, or too few recognisable-script characters in the
/// visible text of a page long enough to judge.
pub fn looks_garbled(text: &str, script: Script) -> bool {
    if MOJIBAKE_MARKERS.iter().any(|marker| text.contains(marker)) {
        return true;
    }
    if script == Script::Any {
        return false;
    }

    let visible = visible_text(text);
    let sample = visible
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .take(MAX_SAMPLE_CHARS)
        .collect::<Vec<_>>();
    if sample.len() < MIN_SAMPLE_CHARS {
        return false;
    }

    let recognisable = sample
        .iter()
        .filter(|ch| script.is_recognisable(**ch))
        .count();
    (recognisable as f64) / (sample.len() as f64) < MIN_SCRIPT_RATIO
}

fn visible_text(text: &str) -> String {
    let without_code = SCRIPT_STYLE_RE.replace_all(text, " ");
    let mut out = String::with_capacity(without_code.len());
    let mut in_tag = false;
    for ch in without_code.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Charset parameter of a `Content-Type` header value.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_owned())
    })
}

/// `<meta charset=..>` or `<meta http-equiv content="..; charset=..">` in the
/// first 2 KiB of the document.
pub fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(2048)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    let mut cursor = 0usize;
    while let Some(rel) = head[cursor..].find("<meta") {
        let start = cursor + rel;
        let end = head[start..]
            .find('>')
            .map_or(head.len(), |rel_end| start + rel_end);
        let tag = &head[start..end];
        if let Some(pos) = tag.find("charset=") {
            let value = tag[pos + "charset=".len()..]
                .trim_start_matches(['"', '\''])
                .split(|c: char| c == '"' || c == '\'' || c == ';' || c == '/' || c.is_whitespace())
                .next()
                .unwrap_or_default();
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
        cursor = end;
    }
    None
}
