//! Time parsing and fixed-frequency helpers for model run dates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Naive formats tried after RFC 3339; all are read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a run date.
///
/// Supports:
/// - RFC 3339: "2024-01-15T12:00:00Z"
/// - Naive datetime (assumed UTC): "2024-01-15T12:00", "2024-01-15 12:00:00"
/// - Date only: "2024-01-15"
/// - Compact model-run form: "2024011512"
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, BatchError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if s.len() == 10 && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&format!("{s}00"), "%Y%m%d%H%M") {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(BatchError::InvalidInput(format!(
        "'{s}' is not a parsable date or datetime"
    )))
}

/// A fixed, positive time step such as "1h" or "30min".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Frequency(Duration);

impl Frequency {
    pub fn new(step: Duration) -> Result<Self, BatchError> {
        if step <= Duration::zero() || step.num_seconds() == 0 {
            return Err(BatchError::InvalidInput(format!(
                "frequency must be at least one second, got {step}"
            )));
        }
        Ok(Self(step))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Floor a time to a multiple of this frequency since the Unix epoch.
    pub fn floor(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.0.num_seconds();
        let floored = dt.timestamp().div_euclid(step) * step;
        Utc.timestamp_opt(floored, 0).single().unwrap_or(dt)
    }

    /// Inclusive range from `start` to `end` at this frequency.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut dates = Vec::new();
        let mut current = Some(start);
        while let Some(date) = current.filter(|d| *d <= end) {
            dates.push(date);
            // Past the representable range means past `end` as well
            current = date.checked_add_signed(self.0);
        }
        dates
    }

    /// `count` times at this frequency, oldest first, ending at `end`.
    ///
    /// Fails when the oldest time would fall outside the representable
    /// date range.
    pub fn trailing_window(
        &self,
        end: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, BatchError> {
        (0..count)
            .rev()
            .map(|i| {
                i32::try_from(i)
                    .ok()
                    .and_then(|i| self.0.checked_mul(i))
                    .and_then(|offset| end.checked_sub_signed(offset))
                    .ok_or_else(|| {
                        BatchError::InvalidInput(format!(
                            "{count} steps of {self} before {end} is out of range"
                        ))
                    })
            })
            .collect()
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self(Duration::hours(1))
    }
}

impl FromStr for Frequency {
    type Err = BatchError;

    /// Parses offsets such as "1h", "6H", "30min", "15T", "1d" and "10s".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (count, unit) = s.split_at(split);

        let count: i64 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| BatchError::InvalidInput(format!("invalid frequency '{s}'")))?
        };

        let seconds = match unit {
            "s" | "S" | "sec" => 1,
            "min" | "T" => 60,
            "h" | "H" => 3600,
            "d" | "D" => 86_400,
            _ => {
                return Err(BatchError::InvalidInput(format!(
                    "invalid frequency '{s}': unknown unit '{unit}'"
                )))
            }
        };

        let step = count
            .checked_mul(seconds)
            .and_then(Duration::try_seconds)
            .ok_or_else(|| BatchError::InvalidInput(format!("frequency '{s}' is too large")))?;
        Self::new(step)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.num_seconds();
        if secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 {
            write!(f, "{}min", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = BatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        value.to_string()
    }
}
