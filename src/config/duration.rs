//! Human-friendly durations in configuration files
//!
//! Accepts `250ms`, `5s`, `2m`, `1h`, `1d`, combinations such as `1m30s`,
//! or a bare integer meaning seconds.

use eyre::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Parse a duration like `5s` or `1m30s`
///
/// Whitespace is allowed around the value and between unit groups
/// (`1h 15m`), never inside a number or between a number and its unit.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let text = input.trim();
    if text.is_empty() {
        eyre::bail!("Empty duration");
    }
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let unit = Regex::new(r"\s*(\d+)(ms|s|m|h|d)").context("Invalid duration pattern")?;
    let mut total = Duration::ZERO;
    let mut consumed = 0;

    for caps in unit.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        if whole.start != consumed {
            break;
        }
        consumed = whole.end;

        let amount: u64 = caps[1]
            .parse()
            .with_context(|| format!("Duration amount out of range in '{}'", input))?;
        let part = match &caps[2] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3_600)),
            _ => Duration::from_secs(amount.saturating_mul(86_400)),
        };
        total = total.saturating_add(part);
    }

    if consumed != text.len() {
        eyre::bail!(
            "Invalid duration '{}', expected e.g. 500ms, 5s, 1m30s or 2h",
            input
        );
    }
    Ok(total)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            RawDuration::Text(text) => parse_duration(&text).map_err(|e| E::custom(format!("{:#}", e))),
        }
    }
}

/// Serde adapter for required durations
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?.into_duration()
}

/// Serde adapter for optional durations
pub mod option {
    use super::RawDuration;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(RawDuration::into_duration)
            .transpose()
    }
}
