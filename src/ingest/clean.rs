// src/ingest/clean.rs
//! Field-level cleaning helpers used by the normalizer. Everything here is
//! pure and deterministic; `clean_text` is idempotent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use unicode_normalization::UnicodeNormalization;

use crate::ingest::types::NumberLike;

const MAX_TEXT_CHARS: usize = 1500;

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap())
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn re_number() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap())
}

/// Decode entities, normalize to NFKC and strip markup until nothing changes.
/// Each step can expose input for another one (`&amp;lt;b&amp;gt;`, fullwidth `＜`),
/// and nesting depth is unbounded, so there is no round limit. Every round that
/// changes the text consumes at least one entity or tag.
fn strip_markup(s: &str) -> String {
    let mut cur = s.to_string();
    loop {
        let mut next = cur.clone();
        loop {
            let decoded = html_escape::decode_html_entities(&next).into_owned();
            if decoded == next {
                break;
            }
            next = decoded;
        }
        next = next.nfkc().collect();
        next = re_tags().replace_all(&next, "").into_owned();
        if next == cur {
            break;
        }
        cur = next;
    }
    cur
}

/// Clean a free-text field: strip markup, normalize Unicode and quotes,
/// collapse whitespace, drop trailing sentence punctuation, cap length.
///
/// `clean_text(&clean_text(x)) == clean_text(x)` for every input.
pub fn clean_text(s: &str) -> String {
    let mut out = strip_markup(s);

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    out = re_ws().replace_all(&out, " ").into_owned();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out.trim_start()
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '!' | '?' | '.' | ','))
        .to_string()
}

/// Clean an optional text field, mapping empty results to `None`.
pub fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(clean_text).filter(|t| !t.is_empty())
}

/// Lenient numeric parsing: currency symbols, units and thousands separators
/// are ignored. Unparseable input yields `None`, never zero.
pub fn parse_lenient_number(v: &NumberLike) -> Option<f64> {
    match v {
        NumberLike::Num(n) => n.is_finite().then_some(*n),
        NumberLike::Text(s) => {
            let compact: String = s.chars().filter(|c| *c != ',').collect();
            re_number()
                .find(&compact)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .filter(|n| n.is_finite())
        }
    }
}

pub fn parse_opt_number(v: Option<&NumberLike>) -> Option<f64> {
    v.and_then(parse_lenient_number)
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%Y.%m.%d",
    "%b %d, %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%d %B %Y",
];

fn re_embedded_date() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4}|\d{2}-\d{2}-\d{4}|\d{1,2}\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\s+\d{4})",
        )
        .unwrap()
    })
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond()))
}

fn parse_exact(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_rfc2822(s) {
        return Some(dt);
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt));
        }
    }
    None
}

/// Parse the timestamp shapes seen across sources. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = s.parse().ok()?;
        // 13 digits are milliseconds.
        return if s.len() >= 13 {
            DateTime::from_timestamp_millis(n)
        } else if s.len() >= 9 {
            DateTime::from_timestamp(n, 0)
        } else {
            None
        };
    }
    if let Some(dt) = parse_exact(s) {
        return Some(dt);
    }
    re_embedded_date()
        .find(s)
        .and_then(|m| parse_exact(m.as_str()))
}

pub fn parse_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn re_period() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4})(?:[-/ ]?(?:(0?[1-9]|1[0-2])|[Qq]([1-4])))?$").unwrap()
    })
}

/// First instant of a reporting period: `2024`, `2024-03`, `2024-Q2`.
pub fn parse_period_start(raw: &str) -> Option<DateTime<Utc>> {
    let caps = re_period().captures(raw.trim())?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = if let Some(m) = caps.get(2) {
        m.as_str().parse().ok()?
    } else if let Some(q) = caps.get(3) {
        let q: u32 = q.as_str().parse().ok()?;
        (q - 1) * 3 + 1
    } else {
        1
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

const SRI_LANKAN_LOCATIONS: &[&str] = &[
    "colombo",
    "kandy",
    "galle",
    "jaffna",
    "trincomalee",
    "anuradhapura",
    "badulla",
    "matara",
    "ratnapura",
    "kurunegala",
    "gampaha",
    "kalutara",
    "batticaloa",
    "puttalam",
    "nuwara eliya",
    "polonnaruwa",
    "kegalle",
    "monaragala",
    "hambantota",
    "vavuniya",
    "mullaitivu",
    "kilinochchi",
];

const LOCATION_ALIASES: &[(&str, &[&str])] = &[
    ("colombo", &["cmb"]),
    ("kandy", &["kdy", "mahanuwara"]),
    ("galle", &["gll"]),
    ("jaffna", &["jfn", "yarlpanam"]),
    ("trincomalee", &["trinco", "tco"]),
];

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut cs = w.chars();
            match cs.next() {
                Some(first) => first.to_uppercase().chain(cs).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical location name; missing or blank input becomes `"unknown"`.
pub fn normalize_location(raw: Option<&str>) -> String {
    let loc = raw.map(clean_text).unwrap_or_default().to_lowercase();
    if loc.is_empty() || loc == "unknown" {
        return "unknown".to_string();
    }
    if let Some(known) = SRI_LANKAN_LOCATIONS.iter().find(|k| loc.contains(*k)) {
        return title_case(known);
    }
    for (canon, variants) in LOCATION_ALIASES {
        if loc.split_whitespace().any(|w| variants.contains(&w)) {
            return title_case(canon);
        }
    }
    title_case(&loc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn clean_text_strips_and_collapses() {
        assert_eq!(clean_text("  Hello,&nbsp;&nbsp; world!!!  "), "Hello, world");
        assert_eq!(
            clean_text("<p>Fuel <b>prices</b> &ldquo;rise&rdquo;</p>"),
            r#"Fuel prices "rise""#
        );
    }

    #[test]
    fn clean_text_is_idempotent_on_nested_markup() {
        let samples = [
            "&amp;lt;b&amp;gt;bold&amp;lt;/b&amp;gt; text",
            "&am<i>p;",
            "\u{FF1C}b\u{FF1E}wide\u{FF1C}/b\u{FF1E}",
            "trailing ... ",
            "a < b and c > d.",
            "",
        ];
        for s in samples {
            let once = clean_text(s);
            assert_eq!(clean_text(&once), once, "not idempotent for {s:?}");
        }

        // Each level hides the previous one behind a tag-split entity, so one
        // round of stripping peels exactly one level.
        let mut deep = String::from("x <b>y</b> z");
        for _ in 0..12 {
            deep = deep
                .chars()
                .map(|c| match c {
                    '&' => "&<a>".to_string(),
                    '<' => "&l<a>t;".to_string(),
                    '>' => "&g<a>t;".to_string(),
                    c => c.to_string(),
                })
                .collect();
        }
        let once = clean_text(&deep);
        assert_eq!(once, "x y z");
        assert_eq!(clean_text(&once), once);

        let long = format!("{} .", "word ".repeat(400));
        let once = clean_text(&long);
        assert!(once.chars().count() <= MAX_TEXT_CHARS);
        assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn lenient_numbers_distinguish_missing_from_zero() {
        assert_eq!(parse_lenient_number(&"Rs. 1,250.50".into()), Some(1250.5));
        assert_eq!(parse_lenient_number(&"LKR 300".into()), Some(300.0));
        assert_eq!(parse_lenient_number(&"$12".into()), Some(12.0));
        assert_eq!(parse_lenient_number(&"0".into()), Some(0.0));
        assert_eq!(parse_lenient_number(&"n/a".into()), None);
        assert_eq!(parse_lenient_number(&"".into()), None);
        assert_eq!(parse_lenient_number(&NumberLike::Num(f64::NAN)), None);
    }

    #[test]
    fn timestamps_in_common_shapes() {
        let d = parse_timestamp("2024-03-05").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2024, 3, 5));
        assert!(parse_timestamp("Tue, 05 Mar 2024 10:00:00 +0530").is_some());
        assert!(parse_timestamp("2024-03-05T10:00:00Z").is_some());
        assert!(parse_timestamp("05/03/2024").is_some());
        assert!(parse_timestamp("March 5, 2024").is_some());
        assert!(parse_timestamp("Updated on 5 Mar 2024 by staff").is_some());
        assert_eq!(
            parse_timestamp("1709632800").unwrap().timestamp(),
            1_709_632_800
        );
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("   ").is_none());
    }

    #[test]
    fn periods_map_to_first_instant() {
        let q = parse_period_start("2024-Q2").unwrap();
        assert_eq!((q.year(), q.month(), q.day()), (2024, 4, 1));
        let m = parse_period_start("2023-11").unwrap();
        assert_eq!((m.year(), m.month()), (2023, 11));
        assert_eq!(parse_period_start("2022").unwrap().month(), 1);
        assert!(parse_period_start("last quarter").is_none());
    }

    #[test]
    fn locations_normalize_to_districts() {
        assert_eq!(normalize_location(Some("COLOMBO 07")), "Colombo");
        assert_eq!(normalize_location(Some("near trinco harbour")), "Trincomalee");
        assert_eq!(normalize_location(Some("nuwara eliya town")), "Nuwara Eliya");
        assert_eq!(normalize_location(Some("  maldives ")), "Maldives");
        assert_eq!(normalize_location(Some("   ")), "unknown");
        assert_eq!(normalize_location(None), "unknown");
    }
}
