//! Relative date normalizer
//!
//! Map-service review timestamps are served as locale-tagged relative
//! strings ("2 days ago", "a month ago", "вчера"). `normalize` converts one
//! of those, against a reference instant, into an absolute timestamp.
//! Month and year arithmetic is calendar-aware (chrono `Months`) so that
//! "3 months ago" lands on the same day-of-month where possible instead of
//! drifting by a fixed 30-day approximation.

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateParseError {
    #[error("unrecognized relative date: '{0}'")]
    Unrecognized(String),
    #[error("date arithmetic out of range for '{0}'")]
    OutOfRange(String),
}

/// Time unit classes recognized in relative date strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// One unit class with the vocabulary that names it in a given language.
struct UnitPattern {
    unit: Unit,
    regex: Regex,
}

/// Per-language vocabularies. Unknown languages fall back to trying every
/// table, which also covers pages that ignore the requested `hl`.
fn unit_tables() -> &'static [(&'static str, Vec<UnitPattern>)] {
    static TABLES: OnceLock<Vec<(&'static str, Vec<UnitPattern>)>> = OnceLock::new();
    TABLES
        .get_or_init(|| {
            let en = vec![
                pattern(Unit::Minute, r"\b(min|mins|minute|minutes)\b"),
                pattern(Unit::Hour, r"\b(hour|hours|hr|hrs)\b"),
                pattern(Unit::Day, r"\b(day|days)\b"),
                pattern(Unit::Week, r"\b(week|weeks)\b"),
                pattern(Unit::Month, r"\b(month|months)\b"),
                pattern(Unit::Year, r"\b(year|years)\b"),
            ];
            let ru = vec![
                pattern(Unit::Minute, r"мин|минут"),
                pattern(Unit::Hour, r"час"),
                pattern(Unit::Day, r"\bдн(?:я|ей|ь)"),
                pattern(Unit::Week, r"недел"),
                pattern(Unit::Month, r"мес"),
                pattern(Unit::Year, r"год|года|лет"),
            ];
            vec![("en", en), ("ru", ru)]
        })
        .as_slice()
}

fn pattern(unit: Unit, re: &str) -> UnitPattern {
    UnitPattern {
        unit,
        // Patterns are compile-time constants; a failure here is a bug.
        regex: Regex::new(re).unwrap_or_else(|e| panic!("bad unit pattern {re}: {e}")),
    }
}

fn edited_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\(?\b(edited|изменено)\b\)?").unwrap())
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)").unwrap())
}

/// Convert a relative date string into an absolute timestamp.
///
/// `language` selects the vocabulary to try first; other known vocabularies
/// are tried afterwards. An absent numeric amount ("a month ago") means 1.
/// An "edited" marker anywhere in the string is stripped before parsing.
pub fn normalize(
    text: &str,
    language: &str,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, DateParseError> {
    let cleaned = edited_markers().replace_all(text, " ");
    let cleaned = cleaned.trim().to_lowercase();
    if cleaned.is_empty() {
        return Err(DateParseError::Unrecognized(text.to_string()));
    }

    if cleaned.contains("yesterday") || cleaned.contains("вчера") {
        return reference
            .checked_sub_signed(Duration::days(1))
            .ok_or_else(|| DateParseError::OutOfRange(text.to_string()));
    }

    let amount: u32 = amount_re()
        .captures(&cleaned)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(1);

    let lang = language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_ascii_lowercase();

    let tables = unit_tables();
    let ordered = tables
        .iter()
        .filter(|(l, _)| *l == lang)
        .chain(tables.iter().filter(|(l, _)| *l != lang));

    for (_, table) in ordered {
        for p in table {
            if p.regex.is_match(&cleaned) {
                return apply(p.unit, amount, reference)
                    .ok_or_else(|| DateParseError::OutOfRange(text.to_string()));
            }
        }
    }

    Err(DateParseError::Unrecognized(text.to_string()))
}

fn apply(unit: Unit, amount: u32, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let n = i64::from(amount);
    match unit {
        Unit::Minute => reference.checked_sub_signed(Duration::minutes(n)),
        Unit::Hour => reference.checked_sub_signed(Duration::hours(n)),
        Unit::Day => reference.checked_sub_signed(Duration::days(n)),
        Unit::Week => reference.checked_sub_signed(Duration::weeks(n)),
        Unit::Month => reference.checked_sub_months(Months::new(amount)),
        Unit::Year => reference.checked_sub_months(Months::new(amount.checked_mul(12)?)),
    }
}
