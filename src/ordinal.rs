use std::sync::LazyLock;

use regex::Regex;

/// Sort key inferred from a chapter title. Variant order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Prologue,
    Numbered(u64),
    Epilogue,
    Unknown,
}

static CJK_ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"第\s*([0-9０-９零〇一二两三四五六七八九十百千万]+)\s*[章节回卷篇话集部]")
        .expect("cjk ordinal regex is valid")
});
static LATIN_ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:chapter|chap\.?|ch\.?|part|episode|ep\.?)\s*(\d+)")
        .expect("latin ordinal regex is valid")
});
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)(?:[\s.、:：\-]|$)").expect("leading number regex is valid"));

static PROLOGUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)序章|楔子|序言|引子|\b(?:prologue|preface)\b").expect("prologue regex is valid")
});
static EPILOGUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)尾声|终章|后记|番外|\b(?:epilogue|afterword|extras?)\b")
        .expect("epilogue regex is valid")
});

pub fn chapter_sort_key(title: &str) -> SortKey {
    if let Some(number) = CJK_ORDINAL_RE
        .captures(title)
        .and_then(|caps| parse_number(&caps[1]))
    {
        return SortKey::Numbered(number);
    }
    if let Some(number) = LATIN_ORDINAL_RE
        .captures(title)
        .and_then(|caps| caps[1].parse().ok())
    {
        return SortKey::Numbered(number);
    }

    if PROLOGUE_RE.is_match(title) {
        return SortKey::Prologue;
    }
    if EPILOGUE_RE.is_match(title) {
        return SortKey::Epilogue;
    }
    if let Some(number) = LEADING_NUMBER_RE
        .captures(title)
        .and_then(|caps| caps[1].parse().ok())
    {
        return SortKey::Numbered(number);
    }
    SortKey::Unknown
}

/// Arabic (ASCII or full-width) or Chinese numerals. `None` when the value
/// does not fit in a `u64`.
fn parse_number(raw: &str) -> Option<u64> {
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse().ok();
    }
    if raw.chars().all(|c| ('０'..='９').contains(&c)) {
        return raw
            .chars()
            .try_fold(0u64, |acc, c| {
                acc.checked_mul(10)?.checked_add(c as u64 - '０' as u64)
            });
    }
    parse_chinese_numeral(raw)
}

fn parse_chinese_numeral(raw: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut section = 0u64;
    let mut digit: Option<u64> = None;

    for ch in raw.chars() {
        let value = match ch {
            '零' | '〇' => Some(0),
            '一' => Some(1),
            '二' | '两' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            _ => None,
        };
        if let Some(value) = value {
            // 一二三 style: positional digits without units.
            digit = Some(match digit {
                Some(prev) => prev.checked_mul(10)?.checked_add(value)?,
                None => value,
            });
            continue;
        }
        let unit = match ch {
            '十' => 10,
            '百' => 100,
            '千' => 1000,
            '万' => {
                total = total
                    .checked_add(section)?
                    .checked_add(digit.take().unwrap_or(0))?
                    .checked_mul(10_000)?;
                section = 0;
                continue;
            }
            _ => return None,
        };
        // 十二 means 12: a bare unit counts as one of it.
        section = section.checked_add(digit.take().unwrap_or(1).checked_mul(unit)?)?;
    }

    total.checked_add(section)?.checked_add(digit.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_numerals() {
        assert_eq!(parse_chinese_numeral("十二"), Some(12));
        assert_eq!(parse_chinese_numeral("二十"), Some(20));
        assert_eq!(parse_chinese_numeral("一百零五"), Some(105));
        assert_eq!(parse_chinese_numeral("三千二百"), Some(3200));
        assert_eq!(parse_chinese_numeral("一万零三"), Some(10003));
        assert_eq!(parse_chinese_numeral("一二三"), Some(123));
        assert_eq!(parse_chinese_numeral("甲"), None);
    }

    #[test]
    fn titles_map_to_sort_keys() {
        assert_eq!(chapter_sort_key("第十二章 风起"), SortKey::Numbered(12));
        assert_eq!(chapter_sort_key("第 3 节"), SortKey::Numbered(3));
        assert_eq!(chapter_sort_key("第１２章"), SortKey::Numbered(12));
        assert_eq!(chapter_sort_key("Chapter 7: The Road"), SortKey::Numbered(7));
        assert_eq!(chapter_sort_key("12. Homecoming"), SortKey::Numbered(12));
        assert_eq!(chapter_sort_key("楔子"), SortKey::Prologue);
        assert_eq!(chapter_sort_key("Prologue"), SortKey::Prologue);
        assert_eq!(chapter_sort_key("番外 一"), SortKey::Epilogue);
        assert_eq!(chapter_sort_key("尾声"), SortKey::Epilogue);
        assert_eq!(chapter_sort_key("风雪夜归人"), SortKey::Unknown);
    }

    #[test]
    fn oversized_numerals_are_unknown() {
        assert_eq!(parse_chinese_numeral(&"九".repeat(21)), None);
        assert_eq!(parse_chinese_numeral(&"九万".repeat(6)), None);
        assert_eq!(
            chapter_sort_key(&format!("第{}章", "九".repeat(21))),
            SortKey::Unknown
        );
        assert_eq!(
            chapter_sort_key(&format!("第{}章", "９".repeat(21))),
            SortKey::Unknown
        );
        assert_eq!(
            chapter_sort_key(&format!("第{}章", "9".repeat(21))),
            SortKey::Unknown
        );
    }

    #[test]
    fn keywords_match_whole_words() {
        assert_eq!(chapter_sort_key("The Extraordinary Night"), SortKey::Unknown);
        assert_eq!(chapter_sort_key("Extra: Summer Festival"), SortKey::Epilogue);
        assert_eq!(chapter_sort_key("Prefaces and Letters"), SortKey::Unknown);
    }

    #[test]
    fn sort_order_is_prologue_numbered_epilogue_unknown() {
        let mut titles = vec!["后记", "无题", "第二章", "序章", "第一章", "第十章"];
        titles.sort_by_key(|title| chapter_sort_key(title));
        assert_eq!(titles, vec!["序章", "第一章", "第二章", "第十章", "后记", "无题"]);
    }
}
