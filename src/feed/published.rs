use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Literal prefix bulletin bodies put in front of their publish date.
pub const PUBLISHED_PREFIX: &str = "Published: ";

/// Date-time layouts without an offset. Interpreted as UTC.
const NAIVE_DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Date-only layouts. Interpreted as UTC midnight.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
];

/// Resolves the corrected `updated` value of an entry.
///
/// `text` is the plain text of the entry's first paragraph. A leading
/// `"Published: "` is stripped (case-sensitive) and the remainder is parsed as
/// a calendar date. Absent text or an unparseable date yields `fallback`
/// unchanged; this never fails.
///
/// Parsed dates are normalized to UTC and rendered with millisecond precision
/// and an explicit `+00:00` offset, never `Z`.
///
/// # Examples
///
/// ```
/// use bulletin_relay::feed::resolve_publish_timestamp;
///
/// let fallback = "2020-01-01T00:00:00.000+00:00";
/// assert_eq!(
///     resolve_publish_timestamp(Some("Published: 2024-03-01T10:00:00Z"), fallback),
///     "2024-03-01T10:00:00.000+00:00"
/// );
/// assert_eq!(resolve_publish_timestamp(Some("Published: soon"), fallback), fallback);
/// assert_eq!(resolve_publish_timestamp(None, fallback), fallback);
/// ```
pub fn resolve_publish_timestamp(text: Option<&str>, fallback: &str) -> String {
    let Some(text) = text else {
        return fallback.to_string();
    };
    let candidate = text.strip_prefix(PUBLISHED_PREFIX).unwrap_or(text);

    match parse_calendar_date(candidate) {
        Some(date) => format_timestamp(date),
        None => {
            tracing::debug!(text = %candidate, "Unparseable publish date, using fallback");
            fallback.to_string()
        }
    }
}

/// Parses the date notations seen in bulletin bodies.
///
/// Accepts RFC 3339, RFC 2822, ISO date-times without an offset, ISO dates and
/// month-name dates (`March 1, 2024`, `Mar 1, 2024`, `1 March 2024`).
/// Surrounding whitespace is ignored.
pub fn parse_calendar_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

/// Formats as `YYYY-MM-DDTHH:MM:SS.mmm+00:00`.
pub fn format_timestamp(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, false)
}
