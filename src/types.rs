// src/types.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A duration written the way humans write it in config files.
///
/// Accepts a sequence of `<number><unit>` pairs where unit is one of
/// `ms`, `s`, `m`, `h`, `d`, e.g. `"250ms"`, `"10s"`, `"1h30m"`.
/// A bare number is read as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub const fn from_secs(secs: u64) -> Self {
        HumanDuration(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        HumanDuration(d)
    }
}

impl From<HumanDuration> for Duration {
    fn from(d: HumanDuration) -> Self {
        d.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err("empty duration".to_string());
        }

        if let Ok(secs) = input.parse::<u64>() {
            return Ok(HumanDuration(Duration::from_secs(secs)));
        }

        let mut total = Duration::ZERO;
        let mut rest = input;
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if digits == 0 {
                return Err(format!("invalid duration: {input}"));
            }
            let value: u64 = rest[..digits]
                .parse()
                .map_err(|e| format!("invalid duration {input}: {e}"))?;
            rest = &rest[digits..];

            let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            rest = &rest[unit_len..];

            let part = match unit {
                "ms" => Duration::from_millis(value),
                "s" => Duration::from_secs(value),
                "m" => Duration::from_secs(value * 60),
                "h" => Duration::from_secs(value * 3600),
                "d" => Duration::from_secs(value * 86_400),
                other => {
                    return Err(format!(
                        "invalid duration unit '{other}' in {input} (expected ms, s, m, h or d)"
                    ));
                }
            };
            total += part;
        }

        Ok(HumanDuration(total))
    }
}

impl TryFrom<String> for HumanDuration {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HumanDuration> for String {
    fn from(d: HumanDuration) -> Self {
        d.to_string()
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        if millis % 1000 != 0 {
            write!(f, "{millis}ms")
        } else {
            write!(f, "{}s", self.0.as_secs())
        }
    }
}

/// `now + d`, saturating at `now` if the addition is out of range.
pub fn time_after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}

/// Wall-clock time elapsed since `since`; zero if `since` is in the future.
pub fn elapsed_since(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_units() {
        assert_eq!("10s".parse::<HumanDuration>().unwrap().0, Duration::from_secs(10));
        assert_eq!("5m".parse::<HumanDuration>().unwrap().0, Duration::from_secs(300));
        assert_eq!("250ms".parse::<HumanDuration>().unwrap().0, Duration::from_millis(250));
        assert_eq!("42".parse::<HumanDuration>().unwrap().0, Duration::from_secs(42));
    }

    #[test]
    fn parses_compound() {
        let d: HumanDuration = "1h30m".parse().unwrap();
        assert_eq!(d.0, Duration::from_secs(5400));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("ten seconds".parse::<HumanDuration>().is_err());
        assert!("10y".parse::<HumanDuration>().is_err());
    }
}
