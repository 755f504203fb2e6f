//! Timestamp normalization for telemetry payloads.
//!
//! Devices report times in whatever textual encoding their firmware happens to
//! use. [`normalize`] walks a decoded JSON tree and rewrites every string that
//! parses under one of the [`GRAMMARS`] into a single canonical form so the
//! payload can then be decoded into typed records.
//!
//! Grammars are tried in order and the first one that parses wins. A string
//! that is valid under two grammars is read with the earlier one.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A named timestamp grammar
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    /// Short name used in logs and tests
    pub name: &'static str,
    /// Reference layout, written with the reference instant Mon Jan 2 15:04:05 2006
    pub layout: &'static str,
    /// Anchored pattern an input must match before it is parsed
    shape: &'static str,
    parse: fn(&str) -> Option<DateTime<FixedOffset>>,
}

impl Grammar {
    /// Parse `input` under this grammar only
    pub fn parse(&self, input: &str) -> Option<DateTime<FixedOffset>> {
        if !self.has_shape(input) {
            return None;
        }
        (self.parse)(input)
    }

    /// Field widths are fixed by the layout: four-digit years, two-digit
    /// months, days, minutes and seconds. Only the hour may have one digit,
    /// and `_2` days may be space padded.
    fn has_shape(&self, input: &str) -> bool {
        static SHAPES: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();
        let shapes = SHAPES.get_or_init(|| {
            GRAMMARS
                .iter()
                .filter_map(|g| Regex::new(g.shape).ok().map(|re| (g.name, re)))
                .collect()
        });

        shapes
            .get(self.name)
            .map(|re| re.is_match(input))
            .unwrap_or(false)
    }
}

/// Known grammars in trial order
///
/// Weekday names are checked for spelling only, never against the date.
/// Zone abbreviations carry no offset and are read as UTC. Two-digit years
/// from 69 to 99 fall in the 1900s, 00 to 68 in the 2000s.
pub const GRAMMARS: &[Grammar] = &[
    Grammar {
        name: "ansic",
        layout: "Mon Jan _2 15:04:05 2006",
        shape: r"^[A-Za-z]{3} [A-Za-z]{3} (?: ?\d|\d{2}) \d{1,2}:\d{2}:\d{2} \d{4}$",
        parse: parse_ansic,
    },
    Grammar {
        name: "unix_date",
        layout: "Mon Jan _2 15:04:05 MST 2006",
        shape: r"^[A-Za-z]{3} [A-Za-z]{3} (?: ?\d|\d{2}) \d{1,2}:\d{2}:\d{2} [A-Z]{3,5} \d{4}$",
        parse: parse_unix_date,
    },
    Grammar {
        name: "ruby_date",
        layout: "Mon Jan 02 15:04:05 -0700 2006",
        shape: r"^[A-Za-z]{3} [A-Za-z]{3} \d{2} \d{1,2}:\d{2}:\d{2} [+-]\d{4} \d{4}$",
        parse: parse_ruby_date,
    },
    Grammar {
        name: "rfc822",
        layout: "02 Jan 06 15:04 MST",
        shape: r"^\d{2} [A-Za-z]{3} \d{2} \d{1,2}:\d{2} [A-Z]{3,5}$",
        parse: parse_rfc822,
    },
    Grammar {
        name: "rfc822z",
        layout: "02 Jan 06 15:04 -0700",
        shape: r"^\d{2} [A-Za-z]{3} \d{2} \d{1,2}:\d{2} [+-]\d{4}$",
        parse: parse_rfc822z,
    },
    Grammar {
        name: "rfc850",
        layout: "Monday, 02-Jan-06 15:04:05 MST",
        shape: r"^[A-Za-z]+day, \d{2}-[A-Za-z]{3}-\d{2} \d{1,2}:\d{2}:\d{2} [A-Z]{3,5}$",
        parse: parse_rfc850,
    },
    Grammar {
        name: "rfc1123",
        layout: "Mon, 02 Jan 2006 15:04:05 MST",
        shape: r"^[A-Za-z]{3}, \d{2} [A-Za-z]{3} \d{4} \d{1,2}:\d{2}:\d{2} [A-Z]{3,5}$",
        parse: parse_rfc1123,
    },
    Grammar {
        name: "rfc1123z",
        layout: "Mon, 02 Jan 2006 15:04:05 -0700",
        shape: r"^[A-Za-z]{3}, \d{2} [A-Za-z]{3} \d{4} \d{1,2}:\d{2}:\d{2} [+-]\d{4}$",
        parse: parse_rfc1123z,
    },
    Grammar {
        name: "rfc3339",
        layout: "2006-01-02T15:04:05Z07:00",
        shape: r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:Z|[+-]\d{2}:\d{2})$",
        parse: parse_rfc3339,
    },
    Grammar {
        name: "rfc3339_nano",
        layout: "2006-01-02T15:04:05.999999999Z07:00",
        shape: r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{1,9}(?:Z|[+-]\d{2}:\d{2})$",
        parse: parse_rfc3339,
    },
    Grammar {
        name: "date_time",
        layout: "2006-01-02 15:04:05",
        shape: r"^\d{4}-\d{2}-\d{2} \d{1,2}:\d{2}:\d{2}(?:\.\d{1,9})?$",
        parse: parse_date_time,
    },
    Grammar {
        name: "date_only",
        layout: "2006-01-02",
        shape: r"^\d{4}-\d{2}-\d{2}$",
        parse: parse_date_only,
    },
    Grammar {
        name: "time_only",
        layout: "15:04:05",
        shape: r"^\d{1,2}:\d{2}:\d{2}$",
        parse: parse_time_only,
    },
];

/// Recursively rewrite timestamp strings in `value` to the canonical form.
///
/// Objects keep their keys, arrays keep their order, and non-string scalars
/// pass through. Strings that match no grammar are returned unchanged.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, normalize(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::String(s) => match normalize_str(&s) {
            Some(canonical) => Value::String(canonical),
            None => Value::String(s),
        },
        other => other,
    }
}

/// Canonical form of `input` if any grammar accepts it
pub fn normalize_str(input: &str) -> Option<String> {
    if let Some(parsed) = parse_any(input) {
        return Some(format_canonical(&parsed));
    }

    // ISO-like strings with a space separator, e.g. "2021-01-02 03:04:05+02:00"
    if input.contains(' ') && !input.contains('T') {
        let retried = input.replacen(' ', "T", 1);
        if let Some(parsed) = parse_any(&retried) {
            return Some(format_canonical(&parsed));
        }
    }

    None
}

/// First successful parse across [`GRAMMARS`]
pub fn parse_any(input: &str) -> Option<DateTime<FixedOffset>> {
    GRAMMARS.iter().find_map(|grammar| grammar.parse(input))
}

/// Extended ISO-8601 with trimmed fractional seconds and `Z` for UTC
pub fn format_canonical(dt: &DateTime<FixedOffset>) -> String {
    let mut out = dt.format("%Y-%m-%dT%H:%M:%S").to_string();

    let nanos = dt.nanosecond() % 1_000_000_000;
    if nanos > 0 {
        let fraction = format!("{:09}", nanos);
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }

    if dt.offset().local_minus_utc() == 0 {
        out.push('Z');
    } else {
        out.push_str(&dt.format("%:z").to_string());
    }

    out
}

fn naive_as_utc(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    naive.and_utc().fixed_offset()
}

/// Drop a leading weekday token. The name must be valid, its value is ignored.
fn strip_weekday(input: &str, trailing_comma: bool) -> Option<&str> {
    let (head, rest) = input.split_once(' ')?;
    let head = if trailing_comma {
        head.strip_suffix(',')?
    } else {
        head
    };
    head.parse::<Weekday>().ok()?;
    Some(rest)
}

/// Zone abbreviations carry no offset information; they are read as UTC
fn is_zone_abbreviation(token: &str) -> bool {
    matches!(token, "UTC" | "GMT")
        || ((3..=5).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase()))
}

/// Split off a trailing zone abbreviation
fn strip_trailing_zone(input: &str) -> Option<&str> {
    let (rest, zone) = input.rsplit_once(' ')?;
    is_zone_abbreviation(zone).then_some(rest)
}

fn parse_naive(input: &str, format: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDateTime::parse_from_str(input, format)
        .ok()
        .map(naive_as_utc)
}

fn parse_zoned(input: &str, format: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(input, format).ok()
}

fn parse_ansic(input: &str) -> Option<DateTime<FixedOffset>> {
    let rest = strip_weekday(input, false)?;
    parse_naive(rest, "%b %e %H:%M:%S %Y")
}

fn parse_unix_date(input: &str) -> Option<DateTime<FixedOffset>> {
    let rest = strip_weekday(input, false)?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() != 5 || !is_zone_abbreviation(tokens[3]) {
        return None;
    }
    let without_zone = format!("{} {} {} {}", tokens[0], tokens[1], tokens[2], tokens[4]);
    parse_naive(&without_zone, "%b %e %H:%M:%S %Y")
}

fn parse_ruby_date(input: &str) -> Option<DateTime<FixedOffset>> {
    let rest = strip_weekday(input, false)?;
    parse_zoned(rest, "%b %d %H:%M:%S %z %Y")
}

fn parse_rfc822(input: &str) -> Option<DateTime<FixedOffset>> {
    let parts: Vec<&str> = strip_trailing_zone(input)?.split(' ').collect();
    if parts.len() != 4 {
        return None;
    }
    let full = format!("{} {} {} {}", parts[0], parts[1], expand_year(parts[2])?, parts[3]);
    parse_naive(&full, "%d %b %Y %H:%M")
}

fn parse_rfc822z(input: &str) -> Option<DateTime<FixedOffset>> {
    let parts: Vec<&str> = input.split(' ').collect();
    if parts.len() != 5 {
        return None;
    }
    let full = format!(
        "{} {} {} {} {}",
        parts[0],
        parts[1],
        expand_year(parts[2])?,
        parts[3],
        parts[4]
    );
    parse_zoned(&full, "%d %b %Y %H:%M %z")
}

fn parse_rfc850(input: &str) -> Option<DateTime<FixedOffset>> {
    let rest = strip_trailing_zone(strip_weekday(input, true)?)?;
    let (date, time) = rest.split_once(' ')?;
    let (day_month, year) = date.rsplit_once('-')?;
    let full = format!("{}-{} {}", day_month, expand_year(year)?, time);
    parse_naive(&full, "%d-%b-%Y %H:%M:%S")
}

/// Two-digit year to four digits: 69..=99 in the 1900s, 00..=68 in the 2000s
fn expand_year(two_digits: &str) -> Option<String> {
    if two_digits.len() != 2 {
        return None;
    }
    let year: u32 = two_digits.parse().ok()?;
    let century = if year >= 69 { 1900 } else { 2000 };
    Some(format!("{:04}", century + year))
}

fn parse_rfc1123(input: &str) -> Option<DateTime<FixedOffset>> {
    let rest = strip_weekday(input, true)?;
    parse_naive(strip_trailing_zone(rest)?, "%d %b %Y %H:%M:%S")
}

fn parse_rfc1123z(input: &str) -> Option<DateTime<FixedOffset>> {
    let rest = strip_weekday(input, true)?;
    parse_zoned(rest, "%d %b %Y %H:%M:%S %z")
}

fn parse_rfc3339(input: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(input).ok()
}

fn parse_date_time(input: &str) -> Option<DateTime<FixedOffset>> {
    parse_naive(input, "%Y-%m-%d %H:%M:%S%.f")
}

fn parse_date_only(input: &str) -> Option<DateTime<FixedOffset>> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?;
    date.and_hms_opt(0, 0, 0).map(naive_as_utc)
}

fn parse_time_only(input: &str) -> Option<DateTime<FixedOffset>> {
    let time = NaiveTime::parse_from_str(input, "%H:%M:%S").ok()?;
    let epoch = NaiveDate::from_ymd_opt(0, 1, 1)?;
    Some(naive_as_utc(epoch.and_time(time)))
}
