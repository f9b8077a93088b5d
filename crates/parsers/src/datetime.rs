//! Best-effort natural-language date extraction.
//!
//! Absolute forms are tried before relative words, so "today, 2024-03-01"
//! resolves to the explicit date. Values are RFC 3339 strings in UTC.

use crate::{OutputParser, ParseFailure, ParseResult};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use regex_lite::{Captures, Regex};
use std::sync::LazyLock;

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec";

static ISO_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:\d{2})?")
        .expect("iso datetime pattern")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date pattern"));

static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("slash date pattern"));

static MONTH_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"))
        .expect("month-first pattern")
});

static DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\.?,?\s+(\d{{4}})\b"))
        .expect("day-first pattern")
});

static IN_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bin\s+(\d{1,5})\s+days?\b").expect("in-days pattern"));

static DAYS_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,5})\s+days?\s+ago\b").expect("days-ago pattern"));

static RELATIVE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(today|tomorrow|yesterday|now)\b").expect("relative word pattern"));

/// Extracts the first recognisable date or time from free text.
///
/// Relative expressions resolve against `reference`, or the current time
/// when none is set.
#[derive(Debug, Clone, Default)]
pub struct DateTimeParser {
    reference: Option<DateTime<Utc>>,
}

impl DateTimeParser {
    pub fn with_reference(reference: DateTime<Utc>) -> Self {
        Self {
            reference: Some(reference),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.reference.unwrap_or_else(Utc::now)
    }

    fn extract(&self, text: &str) -> Option<DateTime<Utc>> {
        absolute(text).or_else(|| self.relative(text))
    }

    fn relative(&self, text: &str) -> Option<DateTime<Utc>> {
        let now = self.now();
        if let Some(caps) = IN_DAYS.captures(text) {
            let days: i64 = caps[1].parse().ok()?;
            return now.checked_add_signed(Duration::days(days));
        }
        if let Some(caps) = DAYS_AGO.captures(text) {
            let days: i64 = caps[1].parse().ok()?;
            return now.checked_sub_signed(Duration::days(days));
        }
        let caps = RELATIVE_WORD.captures(text)?;
        match caps[1].to_ascii_lowercase().as_str() {
            "now" => Some(now),
            "today" => Some(at_midnight(now.date_naive())),
            "tomorrow" => now.date_naive().succ_opt().map(at_midnight),
            "yesterday" => now.date_naive().pred_opt().map(at_midnight),
            _ => None,
        }
    }
}

fn at_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn ymd(year: &str, month: u32, day: &str) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?).map(at_midnight)
}

fn named_month(caps: &Captures<'_>, month: usize, day: usize, year: usize) -> Option<DateTime<Utc>> {
    ymd(&caps[year], month_number(&caps[month])?, &caps[day])
}

fn absolute(text: &str) -> Option<DateTime<Utc>> {
    if let Some(m) = ISO_DATETIME.find(text) {
        let s = m.as_str();
        if let Ok(dt) = DateTime::parse_from_rfc3339(&s.replacen(' ', "T", 1)) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
    }
    if let Some(dt) = ISO_DATE
        .captures(text)
        .and_then(|caps| ymd(&caps[1], caps[2].parse().ok()?, &caps[3]))
    {
        return Some(dt);
    }
    if let Some(dt) = SLASH_DATE
        .captures(text)
        .and_then(|caps| ymd(&caps[3], caps[2].parse().ok()?, &caps[1]))
    {
        return Some(dt);
    }
    if let Some(dt) = MONTH_FIRST.captures(text).and_then(|caps| named_month(&caps, 1, 2, 3)) {
        return Some(dt);
    }
    DAY_FIRST.captures(text).and_then(|caps| named_month(&caps, 2, 1, 3))
}

impl OutputParser for DateTimeParser {
    fn name(&self) -> &str {
        "datetime"
    }

    fn parse(&self, text: &str) -> ParseResult {
        match self.extract(text) {
            Some(dt) => ParseResult::value(serde_json::Value::String(
                dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            )),
            None => ParseResult::Failure(ParseFailure::retriable("no recognisable date found", text)),
        }
    }
}
