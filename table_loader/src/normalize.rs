//! Datetime normalization.
//!
//! Every recognized encoding is reduced to either an absolute instant or a
//! local wall-clock time, and both are rendered as naive wall-clock time in the
//! target zone. Values without zone information are taken to already be in the
//! target zone.
use std::borrow::Cow;

use chrono::{
    DateTime, Datelike, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde_json::{Map, Number, Value};

use crate::error::NormalizeError;

/// Rendering of a canonical timestamp. Fractional seconds are printed only
/// when present, with 3, 6 or 9 digits.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %I:%M:%S %p",
    "%Y-%m-%d %I:%M %p",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%Y%m%dT%H%M%S",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    // Day first, reached only when the month-first reading is invalid.
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d %B %Y %H:%M:%S",
    "%d %B %Y %H:%M",
    "%B %d, %Y %H:%M:%S",
    "%B %d, %Y %I:%M:%S %p",
    "%B %d, %Y %I:%M %p",
    "%B %d %Y %H:%M:%S",
    "%A, %d %B %Y %H:%M:%S",
    "%A %B %d %H:%M:%S %Y",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%Y%m%d",
];

/// A parsed value before it is placed in the target zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Moment {
    /// Wall-clock time with no zone attached.
    Local(NaiveDateTime),
    Instant(DateTime<Utc>),
}

impl Moment {
    fn in_zone(self, target: Tz) -> NaiveDateTime {
        match self {
            Moment::Local(naive) => naive,
            Moment::Instant(instant) => instant.with_timezone(&target).naive_local(),
        }
    }
}

fn unsupported(reason: impl Into<String>) -> NormalizeError {
    NormalizeError::UnsupportedEncoding(reason.into())
}

/// Converts one scalar datetime value into naive wall-clock time in `target`.
///
/// `null` and empty strings yield `Ok(None)`.
pub fn normalize(value: &Value, target: Tz) -> Result<Option<NaiveDateTime>, NormalizeError> {
    let moment = match value {
        Value::Null => return Ok(None),
        Value::Object(fields) => from_components(fields)?,
        Value::Number(n) => from_epoch(n)?,
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => parse_str(s.trim())?,
        Value::Bool(_) => return Err(unsupported("boolean value")),
        Value::Array(_) => return Err(unsupported("array value")),
    };
    let naive = moment.in_zone(target);
    // Years outside four digits render with a sign the sink cannot read,
    // typically an epoch given in milliseconds.
    if !(1..=9999).contains(&naive.year()) {
        return Err(unsupported(format!("{} is outside years 1 to 9999", naive)));
    }
    Ok(Some(naive))
}

/// [`normalize`], rendered as the JSON value written downstream.
pub fn normalize_value(value: &Value, target: Tz) -> Result<Value, NormalizeError> {
    Ok(match normalize(value, target)? {
        Some(dt) => Value::String(dt.format(CANONICAL_FORMAT).to_string()),
        None => Value::Null,
    })
}

fn from_epoch(n: &Number) -> Result<Moment, NormalizeError> {
    let instant = if let Some(secs) = n.as_i64() {
        DateTime::<Utc>::from_timestamp(secs, 0)
    } else {
        n.as_f64().filter(|f| f.is_finite()).and_then(|f| {
            let secs = f.floor();
            // f64 cannot carry more than microsecond precision at current epochs.
            let micros = ((f - secs) * 1e6).round() as u32;
            let (secs, micros) = if micros >= 1_000_000 {
                (secs + 1.0, 0)
            } else {
                (secs, micros)
            };
            if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
                return None;
            }
            DateTime::<Utc>::from_timestamp(secs as i64, micros * 1_000)
        })
    };
    instant
        .map(Moment::Instant)
        .ok_or_else(|| unsupported(format!("epoch seconds {} out of range", n)))
}

fn from_components(fields: &Map<String, Value>) -> Result<Moment, NormalizeError> {
    let part = |name: &str| -> Result<Option<i64>, NormalizeError> {
        match fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                unsupported(format!("datetime component `{}` is not an integer", name))
            }),
        }
    };

    let (year, month, day) = match (part("year")?, part("month")?, part("day")?) {
        (Some(y), Some(m), Some(d)) => (y, m, d),
        _ => return Err(unsupported("object value without year/month/day components")),
    };
    let date = i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .zip(u32::try_from(day).ok())
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(|| unsupported(format!("invalid date {}-{}-{}", year, month, day)))?;

    let nanos = match (part("nanosecond")?, part("microsecond")?) {
        (Some(ns), _) => ns,
        (None, Some(us)) => us.saturating_mul(1_000),
        (None, None) => 0,
    };
    let (hour, minute, second) = (
        part("hour")?.unwrap_or(0),
        part("minute")?.unwrap_or(0),
        part("second")?.unwrap_or(0),
    );
    let time = u32::try_from(hour)
        .ok()
        .zip(u32::try_from(minute).ok())
        .zip(u32::try_from(second).ok())
        .zip(u32::try_from(nanos).ok())
        .and_then(|(((h, m), s), ns)| NaiveTime::from_hms_nano_opt(h, m, s, ns))
        .ok_or_else(|| {
            unsupported(format!(
                "invalid time {}:{}:{}.{}",
                hour, minute, second, nanos
            ))
        })?;
    let naive = date.and_time(time);

    if let Some(offset) = fields.get("utc_offset").filter(|v| !v.is_null()) {
        let offset = match offset {
            Value::String(s) => parse_offset(s),
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| i32::try_from(secs).ok())
                .and_then(FixedOffset::east_opt),
            _ => None,
        }
        .ok_or_else(|| unsupported(format!("invalid utc_offset {}", offset)))?;
        return localize(&offset, naive).map(Moment::Instant);
    }
    if let Some(zone) = fields.get("timezone").filter(|v| !v.is_null()) {
        let tz = zone
            .as_str()
            .and_then(|name| name.parse::<Tz>().ok())
            .ok_or_else(|| unsupported(format!("unknown timezone {}", zone)))?;
        return localize(&tz, naive).map(Moment::Instant);
    }
    Ok(Moment::Local(naive))
}

fn localize<Z: TimeZone>(zone: &Z, naive: NaiveDateTime) -> Result<DateTime<Utc>, NormalizeError> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        // Repeated wall-clock hour at a DST fall-back: take the first occurrence.
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(unsupported(format!(
            "{} does not exist in its zone",
            naive
        ))),
    }
}

/// Parses `Z`, `UTC`, `+07`, `+0700` and `+07:00` style offsets.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("gmt") {
        return FixedOffset::east_opt(0);
    }
    let sign = match s.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits = s[1..].replacen(':', "", 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Zone information trailing a datetime string.
enum Zone {
    Fixed(FixedOffset),
    Named(Tz),
}

/// Splits trailing zone information (`Z`, `UTC`, a numeric offset or an IANA
/// name) off a datetime string.
fn split_zone(s: &str) -> (&str, Option<Zone>) {
    if let Some((head, last)) = s.rsplit_once(' ') {
        if last.chars().any(|c| c.is_ascii_alphabetic()) {
            if let Some(offset) = parse_offset(last) {
                return (head.trim_end(), Some(Zone::Fixed(offset)));
            }
            if let Ok(tz) = last.parse::<Tz>() {
                return (head.trim_end(), Some(Zone::Named(tz)));
            }
        }
    }
    if let Some(head) = s.strip_suffix(|c: char| c == 'Z' || c == 'z') {
        if head.ends_with(|c: char| c.is_ascii_digit()) {
            return (head, FixedOffset::east_opt(0).map(Zone::Fixed));
        }
    }
    // Numeric offsets only follow a time of day, so `2023-11-15` keeps its `-15`.
    if let Some(pos) = s.rfind(|c: char| c == '+' || c == '-') {
        let (head, tail) = s.split_at(pos);
        if head.contains(':') {
            if let Some(offset) = parse_offset(tail) {
                return (head.trim_end(), Some(Zone::Fixed(offset)));
            }
        }
    }
    (s, None)
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Rewrites an ISO-8601 decimal comma (`05:13:20,5`) to a decimal point.
fn decimal_point(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let comma = (1..bytes.len().saturating_sub(1)).find(|&i| {
        bytes[i] == b','
            && bytes[i - 1].is_ascii_digit()
            && bytes[i + 1].is_ascii_digit()
            && s[..i].contains(':')
    });
    match comma {
        Some(i) => Cow::Owned(format!("{}.{}", &s[..i], &s[i + 1..])),
        None => Cow::Borrowed(s),
    }
}

fn parse_str(s: &str) -> Result<Moment, NormalizeError> {
    let s = &*decimal_point(s);
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Moment::Instant(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(Moment::Instant(dt.with_timezone(&Utc)));
    }

    let (body, zone) = split_zone(s);
    let naive = parse_naive(body)
        .ok_or_else(|| unsupported(format!("unrecognized datetime string {:?}", s)))?;
    match zone {
        None => Ok(Moment::Local(naive)),
        Some(Zone::Fixed(offset)) => localize(&offset, naive).map(Moment::Instant),
        Some(Zone::Named(tz)) => localize(&tz, naive).map(Moment::Instant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BANGKOK: Tz = chrono_tz::Asia::Bangkok;

    fn render(value: Value) -> Value {
        normalize_value(&value, BANGKOK).unwrap()
    }

    #[test]
    fn epoch_seconds_are_rendered_in_target_zone() {
        assert_eq!(render(json!(1700000000)), json!("2023-11-15T05:13:20"));
        assert_eq!(render(json!(0)), json!("1970-01-01T07:00:00"));
    }

    #[test]
    fn fractional_epoch_keeps_fraction() {
        assert_eq!(render(json!(1700000000.5)), json!("2023-11-15T05:13:20.500"));
        assert_eq!(render(json!(1700000000.123456)), json!("2023-11-15T05:13:20.123456"));
    }

    #[test]
    fn null_and_empty_strings_stay_null() {
        assert_eq!(normalize(&Value::Null, BANGKOK), Ok(None));
        assert_eq!(render(json!("")), Value::Null);
        assert_eq!(render(json!("   ")), Value::Null);
    }

    #[test]
    fn offsets_are_converted_not_relabelled() {
        assert_eq!(render(json!("2023-11-14T22:13:20Z")), json!("2023-11-15T05:13:20"));
        assert_eq!(render(json!("2023-11-15T05:13:20+07:00")), json!("2023-11-15T05:13:20"));
        assert_eq!(render(json!("2023-11-14 17:13:20-05:00")), json!("2023-11-15T05:13:20"));
        assert_eq!(render(json!("2023-11-14T22:13:20.250+0000")), json!("2023-11-15T05:13:20.250"));
        assert_eq!(render(json!("2023-11-14 22:13:20 UTC")), json!("2023-11-15T05:13:20"));
    }

    #[test]
    fn named_zones_are_converted() {
        assert_eq!(
            render(json!("2023-11-14 17:13:20 America/New_York")),
            json!("2023-11-15T05:13:20")
        );
        assert_eq!(
            render(json!("Tue, 14 Nov 2023 22:13:20 GMT")),
            json!("2023-11-15T05:13:20")
        );
    }

    #[test]
    fn naive_strings_are_already_target_wall_clock() {
        assert_eq!(render(json!("2023-11-15 05:13:20")), json!("2023-11-15T05:13:20"));
        assert_eq!(render(json!("2023-11-15T05:13:20.5")), json!("2023-11-15T05:13:20.500"));
        assert_eq!(render(json!("2023-11-15")), json!("2023-11-15T00:00:00"));
    }

    #[test]
    fn human_readable_variants() {
        assert_eq!(render(json!("11/15/2023 05:13 AM")), json!("2023-11-15T05:13:00"));
        assert_eq!(render(json!("11/15/2023 5:13 PM")), json!("2023-11-15T17:13:00"));
        assert_eq!(render(json!("15 November 2023")), json!("2023-11-15T00:00:00"));
        assert_eq!(render(json!("November 15, 2023 05:13:20")), json!("2023-11-15T05:13:20"));
        assert_eq!(render(json!("2023/11/15 05:13")), json!("2023-11-15T05:13:00"));
        assert_eq!(render(json!("2023-11-15 5:13 PM")), json!("2023-11-15T17:13:00"));
        assert_eq!(render(json!("2023-11-15 05:13:20 AM")), json!("2023-11-15T05:13:20"));
    }

    #[test]
    fn day_first_dates_when_unambiguous() {
        assert_eq!(render(json!("15/11/2023 05:13:20")), json!("2023-11-15T05:13:20"));
        assert_eq!(render(json!("15/11/2023")), json!("2023-11-15T00:00:00"));
        // Ambiguous dates read month first.
        assert_eq!(render(json!("03/04/2023")), json!("2023-03-04T00:00:00"));
    }

    #[test]
    fn decimal_comma_fractions() {
        assert_eq!(render(json!("2023-11-15T05:13:20,5Z")), json!("2023-11-15T12:13:20.500"));
        assert_eq!(render(json!("2023-11-15 05:13:20,25")), json!("2023-11-15T05:13:20.250"));
        // Commas that are not fractions are left alone.
        assert_eq!(render(json!("November 15, 2023 05:13:20")), json!("2023-11-15T05:13:20"));
    }

    #[test]
    fn millisecond_epochs_are_rejected() {
        let result = normalize(&json!(1700000000000i64), BANGKOK);
        assert!(matches!(result, Err(NormalizeError::UnsupportedEncoding(_))), "{:?}", result);
    }

    #[test]
    fn structured_values() {
        let local = json!({"year": 2023, "month": 11, "day": 15, "hour": 5, "minute": 13, "second": 20});
        assert_eq!(render(local), json!("2023-11-15T05:13:20"));

        let utc = json!({"year": 2023, "month": 11, "day": 14, "hour": 22, "minute": 13, "second": 20, "utc_offset": "Z"});
        assert_eq!(render(utc), json!("2023-11-15T05:13:20"));

        let offset_secs = json!({"year": 2023, "month": 11, "day": 14, "hour": 17, "minute": 13, "second": 20, "utc_offset": -18000});
        assert_eq!(render(offset_secs), json!("2023-11-15T05:13:20"));

        let tokyo = json!({"year": 2023, "month": 11, "day": 15, "hour": 7, "minute": 13, "second": 20, "microsecond": 1500, "timezone": "Asia/Tokyo"});
        assert_eq!(render(tokyo), json!("2023-11-15T05:13:20.001500"));
    }

    #[test]
    fn canonical_output_is_a_fixed_point() {
        let once = render(json!("2023-11-14T22:13:20.125Z"));
        assert_eq!(render(once.clone()), once);
    }

    #[test]
    fn unrecognized_encodings_fail() {
        for value in [
            json!("not a date"),
            json!("2023-13-45"),
            json!("25:00"),
            json!(true),
            json!([2023, 11, 15]),
            json!({"when": "now"}),
            json!({"year": 2023, "month": 2, "day": 30}),
            json!({"year": 2023, "month": 11, "day": 15, "timezone": "Mars/Olympus"}),
            json!(1e300),
        ] {
            let result = normalize(&value, BANGKOK);
            assert!(
                matches!(result, Err(NormalizeError::UnsupportedEncoding(_))),
                "{} -> {:?}",
                value,
                result
            );
        }
    }

    #[test]
    fn nonexistent_local_time_fails() {
        // 02:30 is skipped when New York springs forward.
        let value = json!("2023-03-12 02:30:00 America/New_York");
        assert!(normalize(&value, BANGKOK).is_err());
    }
}
