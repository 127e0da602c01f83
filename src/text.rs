//! Text normalisation and date helpers shared by the fetcher and renderers.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use unicode_normalization::UnicodeNormalization;

/// Date layout used for `pubDate`, `lastBuildDate` and the cache.
pub const FEED_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Timestamp layout of the arXiv API's `<published>` element (always UTC).
pub const API_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// {\"u}  {\'{e}}
static RE_BRACED_SYMBOL_ACCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\\(['`^"~=.])\s*(?:\{\s*([A-Za-z]|\\[ij])\s*\}|([A-Za-z]|\\[ij]))\}"#).unwrap()
});
// \"u  \'{e}  \^ o
static RE_SYMBOL_ACCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\\(['`^"~=.])\s*(?:\{\s*([A-Za-z]|\\[ij])\s*\}|([A-Za-z]|\\[ij]))"#).unwrap()
});
// {\v c}  {\c{c}}
static RE_BRACED_LETTER_ACCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\\([uvHckrdb])(?:\s*\{\s*([A-Za-z]|\\[ij])\s*\}|\s+([A-Za-z]))\}").unwrap()
});
// \v{c}  \c c
static RE_LETTER_ACCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\([uvHckrdb])(?:\s*\{\s*([A-Za-z]|\\[ij])\s*\}|\s+([A-Za-z]))").unwrap()
});
// {\ss}  \o  \AA
static RE_BRACED_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\\(ss|ae|AE|oe|OE|aa|AA|o|O|l|L|i|j)\}").unwrap());
static RE_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(ss|ae|AE|oe|OE|aa|AA|o|O|l|L)\b(?:\{\})?").unwrap());

fn combining_mark(accent: &str) -> Option<char> {
    let mark = match accent {
        "'" => '\u{0301}',
        "`" => '\u{0300}',
        "^" => '\u{0302}',
        "\"" => '\u{0308}',
        "~" => '\u{0303}',
        "=" => '\u{0304}',
        "." => '\u{0307}',
        "u" => '\u{0306}',
        "v" => '\u{030C}',
        "H" => '\u{030B}',
        "c" => '\u{0327}',
        "k" => '\u{0328}',
        "r" => '\u{030A}',
        "d" => '\u{0323}',
        "b" => '\u{0331}',
        _ => return None,
    };
    Some(mark)
}

fn special_letter(name: &str) -> Option<&'static str> {
    let s = match name {
        "ss" => "ß",
        "ae" => "æ",
        "AE" => "Æ",
        "oe" => "œ",
        "OE" => "Œ",
        "aa" => "å",
        "AA" => "Å",
        "o" => "ø",
        "O" => "Ø",
        "l" => "ł",
        "L" => "Ł",
        "i" => "ı",
        "j" => "ȷ",
        _ => return None,
    };
    Some(s)
}

fn compose(caps: &Captures<'_>) -> String {
    let base = caps
        .get(2)
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or_default();
    // accents sit on the dotted letter, \'{\i} is plain í
    let base = match base {
        "\\i" => "i",
        "\\j" => "j",
        other => other,
    };
    match combining_mark(&caps[1]) {
        Some(mark) => {
            let mut s = String::with_capacity(base.len() + 2);
            s.push_str(base);
            s.push(mark);
            s.nfc().collect()
        }
        None => caps[0].to_string(),
    }
}

fn special(caps: &Captures<'_>) -> String {
    special_letter(&caps[1])
        .map(str::to_string)
        .unwrap_or_else(|| caps[0].to_string())
}

/// Replace LaTeX accent escapes (`\'e`, `\"{o}`, `{\v c}`, `\ss`, ...) with
/// precomposed Unicode characters. Everything else is left untouched.
pub fn latex_to_unicode(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_string();
    }
    let s = RE_BRACED_SYMBOL_ACCENT.replace_all(input, compose);
    let s = RE_BRACED_LETTER_ACCENT.replace_all(&s, compose);
    let s = RE_SYMBOL_ACCENT.replace_all(&s, compose);
    let s = RE_LETTER_ACCENT.replace_all(&s, compose);
    let s = RE_BRACED_SPECIAL.replace_all(&s, special);
    let s = RE_SPECIAL.replace_all(&s, special);
    s.into_owned()
}

/// Collapse every whitespace run (newlines included) to one space and trim.
pub fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").trim().to_string()
}

/// Normalise a title, abstract or author name coming from the API.
pub fn clean_text(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    collapse_whitespace(&latex_to_unicode(input))
}

/// Strip control characters that are not allowed in XML 1.0, keeping tab/LF/CR.
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c as u32) >= 0x20)
        .collect()
}

/// Parse the API's strict UTC timestamp and re-express it as a feed date.
pub fn api_timestamp_to_feed_date(raw: &str) -> Option<String> {
    NaiveDateTime::parse_from_str(raw.trim(), API_DATE_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().format(FEED_DATE_FORMAT).to_string())
}

/// Parse a stored date: feed format first, then the raw API form, then RFC 3339.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, API_DATE_FORMAT) {
        return Some(dt.and_utc().fixed_offset());
    }
    DateTime::parse_from_rfc3339(raw).ok()
}

/// Trailing path segment of an abstract link, e.g. `2401.01234v2`.
pub fn arxiv_id(link: &str) -> &str {
    link.trim_end_matches('/').rsplit('/').next().unwrap_or(link)
}
