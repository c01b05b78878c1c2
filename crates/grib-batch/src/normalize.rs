//! Coerces caller date and lead inputs into ordered sequences.
//!
//! Neither normalizer sorts nor deduplicates: caller order defines the axes
//! used by [`Batch::as_table`](crate::Batch::as_table).

use std::ops::{Range, RangeInclusive};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{BatchError, Result};
use crate::time::{parse_datetime, Frequency};

/// Forecast leads as given by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadSpec {
    Single(u32),
    List(Vec<u32>),
    Range(LeadRange),
}

/// A stepped range of leads, end exclusive unless `inclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadRange {
    pub start: u32,
    pub end: u32,
    pub step: u32,
    pub inclusive: bool,
}

impl LeadRange {
    pub fn new(start: u32, end: u32, step: u32) -> Self {
        Self {
            start,
            end,
            step,
            inclusive: false,
        }
    }

    pub fn inclusive(start: u32, end: u32, step: u32) -> Self {
        Self {
            start,
            end,
            step,
            inclusive: true,
        }
    }

    fn leads(&self) -> Result<Vec<u32>> {
        if self.step == 0 {
            return Err(BatchError::InvalidInput(
                "lead range step must be positive".to_string(),
            ));
        }
        let leads = if self.inclusive {
            (self.start..=self.end).step_by(self.step as usize).collect()
        } else {
            (self.start..self.end).step_by(self.step as usize).collect()
        };
        Ok(leads)
    }
}

impl From<u32> for LeadSpec {
    fn from(lead: u32) -> Self {
        LeadSpec::Single(lead)
    }
}

impl From<Vec<u32>> for LeadSpec {
    fn from(leads: Vec<u32>) -> Self {
        LeadSpec::List(leads)
    }
}

impl From<&[u32]> for LeadSpec {
    fn from(leads: &[u32]) -> Self {
        LeadSpec::List(leads.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for LeadSpec {
    fn from(leads: [u32; N]) -> Self {
        LeadSpec::List(leads.to_vec())
    }
}

impl From<Range<u32>> for LeadSpec {
    fn from(range: Range<u32>) -> Self {
        LeadSpec::Range(LeadRange::new(range.start, range.end, 1))
    }
}

impl From<RangeInclusive<u32>> for LeadSpec {
    fn from(range: RangeInclusive<u32>) -> Self {
        LeadSpec::Range(LeadRange::inclusive(*range.start(), *range.end(), 1))
    }
}

impl From<LeadRange> for LeadSpec {
    fn from(range: LeadRange) -> Self {
        LeadSpec::Range(range)
    }
}

impl FromStr for LeadSpec {
    type Err = BatchError;

    /// Accepts "6", "0,6,12", "0..24:6" (end exclusive) and "0..=24:6".
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some((start, rest)) = s.split_once("..") {
            let (rest, step) = match rest.split_once(':') {
                Some((end, step)) => (end, parse_lead(step)?),
                None => (rest, 1),
            };
            let range = match rest.strip_prefix('=') {
                Some(end) => LeadRange::inclusive(parse_lead(start)?, parse_lead(end)?, step),
                None => LeadRange::new(parse_lead(start)?, parse_lead(rest)?, step),
            };
            return Ok(LeadSpec::Range(range));
        }

        if s.contains(',') {
            let leads = s.split(',').map(parse_lead).collect::<Result<Vec<_>>>()?;
            return Ok(LeadSpec::List(leads));
        }

        Ok(LeadSpec::Single(parse_lead(s)?))
    }
}

fn parse_lead(s: &str) -> Result<u32> {
    s.trim().parse::<u32>().map_err(|_| {
        BatchError::InvalidInput(format!(
            "forecast lead must be a non-negative integer, got '{}'",
            s.trim()
        ))
    })
}

/// Normalize leads into an ordered, non-empty sequence.
pub fn normalize_leads(leads: impl Into<LeadSpec>) -> Result<Vec<u32>> {
    let leads = match leads.into() {
        LeadSpec::Single(lead) => vec![lead],
        LeadSpec::List(leads) => leads,
        LeadSpec::Range(range) => range.leads()?,
    };

    if leads.is_empty() {
        return Err(BatchError::InvalidInput(
            "at least one forecast lead is required".to_string(),
        ));
    }
    Ok(leads)
}

/// One run date, either already typed or still text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInput {
    At(DateTime<Utc>),
    Text(String),
}

impl DateInput {
    fn resolve(&self) -> Result<DateTime<Utc>> {
        match self {
            DateInput::At(dt) => Ok(*dt),
            DateInput::Text(s) => parse_datetime(s),
        }
    }
}

impl From<DateTime<Utc>> for DateInput {
    fn from(dt: DateTime<Utc>) -> Self {
        DateInput::At(dt)
    }
}

impl From<NaiveDateTime> for DateInput {
    fn from(ndt: NaiveDateTime) -> Self {
        DateInput::At(Utc.from_utc_datetime(&ndt))
    }
}

impl From<NaiveDate> for DateInput {
    fn from(date: NaiveDate) -> Self {
        match date.and_hms_opt(0, 0, 0) {
            Some(ndt) => DateInput::At(Utc.from_utc_datetime(&ndt)),
            None => DateInput::Text(date.to_string()),
        }
    }
}

impl From<&str> for DateInput {
    fn from(s: &str) -> Self {
        DateInput::Text(s.to_string())
    }
}

impl From<String> for DateInput {
    fn from(s: String) -> Self {
        DateInput::Text(s)
    }
}

/// Run dates as given by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSpec {
    Single(DateInput),
    List(Vec<DateInput>),
    /// Inclusive `start..=end` at a fixed frequency.
    Range {
        start: DateInput,
        end: DateInput,
        freq: Frequency,
    },
}

impl From<DateInput> for DateSpec {
    fn from(date: DateInput) -> Self {
        DateSpec::Single(date)
    }
}

impl From<DateTime<Utc>> for DateSpec {
    fn from(dt: DateTime<Utc>) -> Self {
        DateSpec::Single(dt.into())
    }
}

impl From<NaiveDateTime> for DateSpec {
    fn from(ndt: NaiveDateTime) -> Self {
        DateSpec::Single(ndt.into())
    }
}

impl From<NaiveDate> for DateSpec {
    fn from(date: NaiveDate) -> Self {
        DateSpec::Single(date.into())
    }
}

impl From<&str> for DateSpec {
    fn from(s: &str) -> Self {
        DateSpec::Single(s.into())
    }
}

impl From<String> for DateSpec {
    fn from(s: String) -> Self {
        DateSpec::Single(s.into())
    }
}

impl<T: Into<DateInput>> From<Vec<T>> for DateSpec {
    fn from(dates: Vec<T>) -> Self {
        DateSpec::List(dates.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<DateInput>, const N: usize> From<[T; N]> for DateSpec {
    fn from(dates: [T; N]) -> Self {
        DateSpec::List(dates.into_iter().map(Into::into).collect())
    }
}

impl FromStr for DateSpec {
    type Err = BatchError;

    /// Accepts a single date, a comma separated list, or `start/end/freq`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.contains('/') {
            let parts: Vec<&str> = s.split('/').map(str::trim).collect();
            return match parts.as_slice() {
                [start, end] => Ok(DateSpec::Range {
                    start: (*start).into(),
                    end: (*end).into(),
                    freq: Frequency::default(),
                }),
                [start, end, freq] => Ok(DateSpec::Range {
                    start: (*start).into(),
                    end: (*end).into(),
                    freq: freq.parse()?,
                }),
                _ => Err(BatchError::InvalidInput(format!(
                    "date range must be 'start/end[/freq]', got '{s}'"
                ))),
            };
        }

        if s.contains(',') {
            return Ok(DateSpec::List(
                s.split(',').map(|d| DateInput::from(d.trim())).collect(),
            ));
        }

        Ok(DateSpec::Single(s.into()))
    }
}

/// Normalize dates into an ordered, non-empty sequence of UTC times.
pub fn normalize_dates(dates: impl Into<DateSpec>) -> Result<Vec<DateTime<Utc>>> {
    let dates = match dates.into() {
        DateSpec::Single(date) => vec![date.resolve()?],
        DateSpec::List(dates) => dates
            .iter()
            .map(DateInput::resolve)
            .collect::<Result<Vec<_>>>()?,
        DateSpec::Range { start, end, freq } => freq.range(start.resolve()?, end.resolve()?),
    };

    if dates.is_empty() {
        return Err(BatchError::InvalidInput(
            "at least one date is required".to_string(),
        ));
    }
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leads_single_list_range() {
        assert_eq!(normalize_leads(6u32).unwrap(), vec![6]);
        assert_eq!(normalize_leads(vec![12u32, 0, 12]).unwrap(), vec![12, 0, 12]);
        assert_eq!(normalize_leads(0u32..4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(normalize_leads(0u32..=6).unwrap().len(), 7);
        assert_eq!(
            normalize_leads(LeadRange::new(0, 24, 6)).unwrap(),
            vec![0, 6, 12, 18]
        );
    }

    #[test]
    fn test_leads_rejects_bad_input() {
        assert!(matches!(
            normalize_leads(Vec::<u32>::new()),
            Err(BatchError::InvalidInput(_))
        ));
        assert!(normalize_leads(LeadRange::new(0, 12, 0)).is_err());
        assert!("1.5".parse::<LeadSpec>().is_err());
        assert!("six".parse::<LeadSpec>().is_err());
        assert!("-3".parse::<LeadSpec>().is_err());
    }

    #[test]
    fn test_leads_from_str() {
        assert_eq!("6".parse::<LeadSpec>().unwrap(), LeadSpec::Single(6));
        assert_eq!(
            "0, 6,12".parse::<LeadSpec>().unwrap(),
            LeadSpec::List(vec![0, 6, 12])
        );
        assert_eq!(
            normalize_leads("0..24:6".parse::<LeadSpec>().unwrap()).unwrap(),
            vec![0, 6, 12, 18]
        );
        assert_eq!(
            normalize_leads("0..=24:6".parse::<LeadSpec>().unwrap()).unwrap(),
            vec![0, 6, 12, 18, 24]
        );
    }

    #[test]
    fn test_dates_wraps_scalar_string() {
        let dates = normalize_dates("2021-01-01").unwrap();
        assert_eq!(dates, vec![Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()]);
    }

    #[test]
    fn test_dates_preserve_order_and_duplicates() {
        let dates = normalize_dates(vec!["2024-01-02", "2024-01-01", "2024-01-02"]).unwrap();
        assert_eq!(dates.len(), 3);
        assert!(dates[0] > dates[1]);
        assert_eq!(dates[0], dates[2]);
    }

    #[test]
    fn test_dates_range_and_errors() {
        let spec: DateSpec = "2024-01-15T00:00/2024-01-15T12:00/6h".parse().unwrap();
        assert_eq!(normalize_dates(spec).unwrap().len(), 3);

        assert!(matches!(
            normalize_dates(vec!["2024-01-01", "not a date"]),
            Err(BatchError::InvalidInput(_))
        ));
        assert!(normalize_dates(Vec::<String>::new()).is_err());
        assert!("a/b/c/d".parse::<DateSpec>().is_err());
    }
}
