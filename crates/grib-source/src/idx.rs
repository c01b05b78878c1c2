//! wgrib2-style inventory (`.idx`) parsing.
//!
//! Each line describes one GRIB message:
//!
//! ```text
//! 7:3433009:d=2024011512:TMP:2 m above ground:6 hour fcst:
//! ```
//!
//! The message ends one byte before the next message with a larger start
//! byte; the last message runs to the end of the file.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use grib_batch::{HandleError, InventoryRow};
use regex::Regex;

/// Parse an index file into rows with byte ranges.
pub fn parse_index(text: &str) -> Result<Vec<InventoryRow>, HandleError> {
    let mut rows = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rows.push(parse_line(line).map_err(|reason| {
            HandleError::Index(format!("line {}: {} ({:?})", line_no + 1, reason, line))
        })?);
    }

    let starts: Vec<u64> = rows.iter().map(|r| r.start_byte).collect();
    for (i, row) in rows.iter_mut().enumerate() {
        row.end_byte = starts[i + 1..]
            .iter()
            .find(|&&next| next > row.start_byte)
            .map(|next| next - 1);
    }

    Ok(rows)
}

fn parse_line(line: &str) -> Result<InventoryRow, String> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 6 {
        return Err(format!("expected at least 6 fields, found {}", fields.len()));
    }

    let message = fields[0]
        .parse::<u32>()
        .map_err(|_| format!("bad message number '{}'", fields[0]))?;
    let start_byte = fields[1]
        .parse::<u64>()
        .map_err(|_| format!("bad start byte '{}'", fields[1]))?;
    let reference_time = parse_reference(fields[2])?;
    let variable = fields[3].to_string();
    let level = fields[4].to_string();
    let forecast_time = fields[5].to_string();

    Ok(InventoryRow {
        message,
        start_byte,
        end_byte: None,
        reference_time,
        valid_time: valid_time(reference_time, &forecast_time),
        search_this: format!(":{variable}:{level}:{forecast_time}"),
        variable,
        level,
        forecast_time,
        file: None,
    })
}

fn parse_reference(field: &str) -> Result<DateTime<Utc>, String> {
    let digits = field
        .strip_prefix("d=")
        .ok_or_else(|| format!("bad reference time '{field}'"))?;
    NaiveDateTime::parse_from_str(&format!("{digits}00"), "%Y%m%d%H%M")
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .map_err(|_| format!("bad reference time '{field}'"))
}

/// Valid time described by a forecast field such as "anl", "6 hour fcst",
/// "0-6 hour acc fcst" or "45 min fcst".
///
/// Time ranges use their end; unrecognised text falls back to the
/// reference time.
pub fn valid_time(reference: DateTime<Utc>, forecast: &str) -> DateTime<Utc> {
    let mut words = forecast.split_whitespace();
    let (Some(amount), Some(unit)) = (words.next(), words.next()) else {
        return reference;
    };
    let end = amount.rsplit('-').next().unwrap_or(amount);
    let Ok(n) = end.parse::<i64>() else {
        return reference;
    };

    let offset = match unit {
        "min" => Duration::minutes(n),
        "hour" => Duration::hours(n),
        "day" => Duration::days(n),
        _ => return reference,
    };
    reference + offset
}

/// Rows whose `search_this` matches the regular expression `search`.
pub fn filter_rows(
    rows: Vec<InventoryRow>,
    search: Option<&str>,
) -> Result<Vec<InventoryRow>, HandleError> {
    let Some(pattern) = search else {
        return Ok(rows);
    };
    let re = Regex::new(pattern)
        .map_err(|e| HandleError::InvalidSearch(format!("'{pattern}': {e}")))?;
    Ok(rows
        .into_iter()
        .filter(|row| re.is_match(&row.search_this))
        .collect())
}

/// Inclusive byte ranges covering `rows`, overlapping and adjacent
/// messages merged. Rows must be in file order.
pub fn byte_ranges(rows: &[InventoryRow]) -> Vec<(u64, Option<u64>)> {
    let mut ranges: Vec<(u64, Option<u64>)> = Vec::new();
    for row in rows {
        match ranges.last_mut() {
            Some((start, end))
                if *start <= row.start_byte
                    && end.map_or(true, |e| row.start_byte <= e + 1) =>
            {
                *end = match (*end, row.end_byte) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            }
            _ => ranges.push((row.start_byte, row.end_byte)),
        }
    }
    ranges
}

/// HTTP Range header value for a set of ranges.
pub fn range_header(ranges: &[(u64, Option<u64>)]) -> String {
    let parts: Vec<String> = ranges
        .iter()
        .map(|(start, end)| match end {
            Some(end) => format!("{start}-{end}"),
            None => format!("{start}-"),
        })
        .collect();
    format!("bytes={}", parts.join(","))
}
