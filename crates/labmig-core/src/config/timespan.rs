//! Human-editable duration encoding for configuration files.
//!
//! Durations are written as `[-][d.]hh:mm:ss[.fff]`, e.g. `00:30:00` or
//! `1.02:00:00`. On input a bare number is also accepted and read as seconds.
//! Durations are signed so that a zero or negative timeout survives parsing and
//! is reported by the validator instead of being rejected at load time.

use chrono::TimeDelta;
use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

/// Parse a timespan string.
///
/// Returns `None` for anything that is not a recognized timespan or number.
pub fn parse_timespan(input: &str) -> Option<TimeDelta> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return from_seconds_f64(seconds);
    }

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let (days, hours) = match parts[0].split_once('.') {
        Some((d, h)) => (d.parse::<i64>().ok()?, h.parse::<i64>().ok()?),
        None => (0, parts[0].parse::<i64>().ok()?),
    };
    let minutes = parts[1].parse::<i64>().ok()?;
    let (seconds, millis) = match parts[2].split_once('.') {
        Some((s, frac)) => {
            let s = s.parse::<i64>().ok()?;
            // Normalize the fraction to milliseconds, ignoring extra precision
            let padded = format!("{:0<3}", frac);
            let ms = padded.get(..3)?.parse::<i64>().ok()?;
            (s, ms)
        }
        None => (parts[2].parse::<i64>().ok()?, 0),
    };

    if days < 0 || hours < 0 || minutes < 0 || seconds < 0 || minutes >= 60 || seconds >= 60 {
        return None;
    }

    let total_ms = days
        .checked_mul(86_400_000)?
        .checked_add(hours.checked_mul(3_600_000)?)?
        .checked_add(minutes * 60_000)?
        .checked_add(seconds * 1_000)?
        .checked_add(millis)?;

    let delta = TimeDelta::try_milliseconds(total_ms)?;
    Some(if negative { -delta } else { delta })
}

/// Format a duration as `[-][d.]hh:mm:ss[.fff]`.
pub fn format_timespan(value: &TimeDelta) -> String {
    let total_ms = value.num_milliseconds();
    let sign = if total_ms < 0 { "-" } else { "" };
    let abs = total_ms.unsigned_abs();

    let days = abs / 86_400_000;
    let hours = (abs / 3_600_000) % 24;
    let minutes = (abs / 60_000) % 60;
    let seconds = (abs / 1_000) % 60;
    let millis = abs % 1_000;

    let mut out = String::from(sign);
    if days > 0 {
        out.push_str(&format!("{}.", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if millis > 0 {
        out.push_str(&format!(".{:03}", millis));
    }
    out
}

fn from_seconds_f64(seconds: f64) -> Option<TimeDelta> {
    if !seconds.is_finite() {
        return None;
    }
    let ms = (seconds * 1000.0).round();
    if ms.abs() > i64::MAX as f64 {
        return None;
    }
    TimeDelta::try_milliseconds(ms as i64)
}

pub fn serialize<S: Serializer>(value: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timespan(value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeDelta, D::Error> {
    deserializer.deserialize_any(TimespanVisitor)
}

/// `#[serde(with = "timespan::option")]` for optional durations.
pub mod option {
    use super::{format_timespan, TimespanVisitor};
    use chrono::TimeDelta;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<TimeDelta>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&format_timespan(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TimeDelta>, D::Error> {
        deserializer.deserialize_option(OptionVisitor)
    }

    struct OptionVisitor;

    impl<'de> serde::de::Visitor<'de> for OptionVisitor {
        type Value = Option<TimeDelta>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("an optional timespan")
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(TimespanVisitor).map(Some)
        }
    }
}

/// Convert a std duration, saturating at the largest representable delta.
pub fn from_std(value: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(value).unwrap_or(TimeDelta::MAX)
}

/// Convert to a std duration; zero and negative deltas map to `None`.
pub fn to_std_positive(value: &TimeDelta) -> Option<std::time::Duration> {
    if *value <= TimeDelta::zero() {
        return None;
    }
    value.to_std().ok()
}

struct TimespanVisitor;

impl<'de> Visitor<'de> for TimespanVisitor {
    type Value = TimeDelta;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a timespan string like \"00:30:00\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TimeDelta, E> {
        parse_timespan(v).ok_or_else(|| E::custom(format!("invalid timespan: {v:?}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TimeDelta, E> {
        TimeDelta::try_seconds(v).ok_or_else(|| E::custom("timespan out of range"))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TimeDelta, E> {
        i64::try_from(v)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| E::custom("timespan out of range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<TimeDelta, E> {
        from_seconds_f64(v).ok_or_else(|| E::custom("timespan out of range"))
    }
}
