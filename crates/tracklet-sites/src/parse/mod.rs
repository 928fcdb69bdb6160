//! Pure parsing primitives shared by the HTML driver family: the filter
//! pipeline, size/number/time readers and promotion-class mapping.
//!
//! Every filter is a pure transform; selector evaluation lives in
//! [`selector`], so nothing here touches the network.

pub mod selector;

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use tracklet_core::DiscountLevel;

/// One step of a selector's transform pipeline.
#[derive(Debug, Clone)]
pub enum FilterStep {
    /// Keep the first capture group (or the whole match) of the pattern.
    Regex(Regex),
    /// Read a human size (`42.5 GiB`) into a canonical byte-count string.
    ParseSize,
    /// Strip separators from a count (`1,234`) into a canonical integer.
    ParseNumber,
    /// Normalise a site-local timestamp into RFC 3339 UTC.
    ParseTime,
    /// Extract one query parameter from a URL.
    QueryString(String),
    /// Split the value into parts on a separator.
    Split(String),
    /// Pick one part of a previously split value.
    Index(usize),
    /// Trim surrounding whitespace.
    Trim,
}

impl FilterStep {
    /// Regex step from a pattern string.
    ///
    /// # Panics
    ///
    /// Panics when the pattern does not compile; definition patterns are
    /// static and checked by the registry validation tests.
    #[must_use]
    pub fn regex(pattern: &str) -> Self {
        Self::Regex(Regex::new(pattern).expect("static definition regex must compile"))
    }
}

enum Piped {
    Text(String),
    List(Vec<String>),
}

/// Run the filter pipeline over an extracted value. `None` means a step
/// could not interpret its input; callers treat that as a missing field,
/// never as a fatal error.
#[must_use]
pub fn apply_filters(value: &str, steps: &[FilterStep], tz_offset_hours: i8) -> Option<String> {
    let mut current = Piped::Text(value.to_string());
    for step in steps {
        current = match (step, current) {
            (FilterStep::Regex(regex), Piped::Text(text)) => {
                let captures = regex.captures(&text)?;
                let value = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str().to_string())?;
                Piped::Text(value)
            }
            (FilterStep::ParseSize, Piped::Text(text)) => {
                Piped::Text(parse_size(&text)?.to_string())
            }
            (FilterStep::ParseNumber, Piped::Text(text)) => {
                Piped::Text(parse_number(&text)?.to_string())
            }
            (FilterStep::ParseTime, Piped::Text(text)) => {
                Piped::Text(parse_time(&text, tz_offset_hours)?.to_rfc3339())
            }
            (FilterStep::QueryString(name), Piped::Text(text)) => {
                Piped::Text(query_param(&text, name)?)
            }
            (FilterStep::Split(separator), Piped::Text(text)) => Piped::List(
                text.split(separator.as_str())
                    .map(str::to_string)
                    .collect(),
            ),
            (FilterStep::Index(index), Piped::List(parts)) => {
                Piped::Text(parts.get(*index)?.clone())
            }
            (FilterStep::Index(_), Piped::Text(_)) => return None,
            (FilterStep::Trim, Piped::Text(text)) => Piped::Text(text.trim().to_string()),
            (_, Piped::List(_)) => return None,
        };
    }
    match current {
        Piped::Text(text) => Some(text),
        Piped::List(parts) => Some(parts.join(" ")),
    }
}

/// Read a human-formatted size into bytes. PT sites use 1024 multipliers for
/// both `GB` and `GiB` spellings.
#[must_use]
pub fn parse_size(value: &str) -> Option<u64> {
    let cleaned = value.trim().replace(',', "");
    let split_at = cleaned
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split_at);
    let number: f64 = number.trim().parse().ok()?;
    if number < 0.0 {
        return None;
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        "P" | "PB" | "PIB" => 1 << 50,
        _ => return None,
    };

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = (number * multiplier as f64).round() as u64;
    Some(bytes)
}

/// Read a count that may carry thousands separators.
#[must_use]
pub fn parse_number(value: &str) -> Option<u64> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Earliest timestamp a site can plausibly report; anything before it is a
/// placeholder.
fn min_plausible() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Parse a site-reported timestamp. Tries RFC 3339 first, then the common
/// `YYYY-MM-DD HH:MM[:SS]` layouts in the site's declared offset. Empty,
/// placeholder and pre-2000 values yield `None`, never an error.
#[must_use]
pub fn parse_time(value: &str, tz_offset_hours: i8) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "--" {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        let utc = parsed.with_timezone(&Utc);
        return (utc.naive_utc() >= min_plausible()).then_some(utc);
    }

    let offset = FixedOffset::east_opt(i32::from(tz_offset_hours) * 3600)?;
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d"] {
        let naive = if layout == "%Y-%m-%d" {
            NaiveDate::parse_from_str(trimmed, layout)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        } else {
            NaiveDateTime::parse_from_str(trimmed, layout).ok()
        };
        if let Some(naive) = naive {
            if naive < min_plausible() {
                return None;
            }
            if let Some(local) = offset.from_local_datetime(&naive).single() {
                return Some(local.with_timezone(&Utc));
            }
        }
    }
    None
}

/// Extract one query parameter from a URL or query string.
#[must_use]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?').map_or(url, |(_, q)| q);
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == name {
                return urlencoding::decode(value).ok().map(|v| v.into_owned());
            }
        }
    }
    None
}

/// Default promotion CSS class mapping shared by NexusPHP-family sites.
#[must_use]
pub fn default_promotion_classes() -> HashMap<String, DiscountLevel> {
    [
        ("pro_free", DiscountLevel::Free),
        ("pro_free2up", DiscountLevel::TwoXFree),
        ("pro_2up", DiscountLevel::TwoXUp),
        ("pro_50pctdown", DiscountLevel::HalfDown),
        ("pro_50pctdown2up", DiscountLevel::TwoXHalfDown),
        ("pro_30pctdown", DiscountLevel::ThirtyDown),
    ]
    .into_iter()
    .map(|(class, level)| (class.to_string(), level))
    .collect()
}

/// Resolve a discount level from an element's class list, preferring
/// definition overrides over the defaults.
#[must_use]
pub fn discount_from_classes<'a>(
    classes: impl IntoIterator<Item = &'a str>,
    overrides: &HashMap<String, DiscountLevel>,
) -> DiscountLevel {
    let defaults = default_promotion_classes();
    for class in classes {
        if let Some(level) = overrides.get(class) {
            return *level;
        }
        if let Some(level) = defaults.get(class) {
            return *level;
        }
    }
    DiscountLevel::None
}
