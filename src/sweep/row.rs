//! Parsing of single `rtl_power` CSV rows.
//!
//! A row looks like this:
//!
//! ```plain
//! 2020-01-01, 12:00:00, 100000000, 100500000, 100000.00, 5, -10.5, -20.1, ...
//! ```
//!
//! date, time, lowest frequency (Hz), highest frequency (Hz), bin width (Hz),
//! number of samples, then one power reading (dB) per bin.

use std::{
    fmt::Display,
    str::FromStr,
};

use chrono::{
    DateTime,
    Local,
    LocalResult,
    NaiveDateTime,
    TimeZone,
};
use csv::StringRecord;
use serde_json::Number;
use spectrum_api_types::spectrum::bin_frequency;

const ROW_DATETIME_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

/// Number of columns before the power readings.
pub const FIXED_COLUMNS: usize = 6;

/// How the wall-clock date and time columns are turned into an instant.
///
/// `rtl_power` writes local time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeZoneMode {
    #[default]
    Local,
    Utc,
}

impl Display for TimeZoneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Utc => write!(f, "utc"),
        }
    }
}

impl FromStr for TimeZoneMode {
    type Err = TimeZoneModeFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "utc" => Ok(Self::Utc),
            _ => {
                Err(TimeZoneModeFromStrError {
                    input: s.to_owned(),
                })
            }
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("Invalid time zone mode: {input} (expected 'local' or 'utc')")]
pub struct TimeZoneModeFromStrError {
    pub input: String,
}

/// Seconds since the epoch for a `yyyy-MM-dd HH:mm:ss` date and time.
pub fn parse_unix_timestamp(
    date: &str,
    time: &str,
    time_zone: TimeZoneMode,
) -> Result<i64, RowErrorKind> {
    let value = format!("{date} {time}");

    let Ok(naive) = NaiveDateTime::parse_from_str(&value, ROW_DATETIME_FORMAT)
    else {
        return Err(RowErrorKind::InvalidDateTime { value });
    };

    match time_zone {
        TimeZoneMode::Utc => Ok(naive.and_utc().timestamp()),
        TimeZoneMode::Local => resolve_local(Local.from_local_datetime(&naive), value),
    }
}

/// Ambiguous times (DST ending) resolve to the first occurrence, times skipped
/// by DST don't exist.
fn resolve_local<Tz: TimeZone>(
    result: LocalResult<DateTime<Tz>>,
    value: String,
) -> Result<i64, RowErrorKind> {
    result
        .earliest()
        .map(|datetime| datetime.timestamp())
        .ok_or(RowErrorKind::InvalidDateTime { value })
}

#[derive(Clone, Debug, PartialEq)]
pub struct SweepRow {
    pub date: String,
    pub time: String,
    pub unix_timestamp: i64,
    pub frequency_low: u64,
    pub frequency_high: u64,
    /// Bin width, truncated to whole Hz.
    pub frequency_step: u64,
    pub num_samples: u64,
    pub powers: Vec<Number>,
}

impl SweepRow {
    pub fn from_record(record: &StringRecord, time_zone: TimeZoneMode) -> Result<Self, RowError> {
        let line = record.position().map_or(0, |position| position.line());
        Self::parse_fields(record, time_zone).map_err(|kind| RowError { line, kind })
    }

    fn parse_fields(record: &StringRecord, time_zone: TimeZoneMode) -> Result<Self, RowErrorKind> {
        if record.len() < FIXED_COLUMNS {
            return Err(RowErrorKind::MissingColumns {
                columns: record.len(),
            });
        }

        let date = record[0].to_owned();
        let time = record[1].to_owned();
        let unix_timestamp = parse_unix_timestamp(&date, &time, time_zone)?;

        let frequency_low = parse_column::<u64>(record, 2, "frequencyLow")?;
        let frequency_high = parse_column::<u64>(record, 3, "frequencyHigh")?;
        let frequency_step = parse_step(&record[4])?;
        let num_samples = parse_column::<u64>(record, 5, "numSamples")?;

        let powers = record
            .iter()
            .skip(FIXED_COLUMNS)
            .map(|value| {
                value.parse::<Number>().map_err(|_| {
                    RowErrorKind::InvalidNumber {
                        column: "power",
                        value: value.to_owned(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // every bin frequency has to fit, the last one is the largest.
        if let Some(last) = powers.len().checked_sub(1) {
            if bin_frequency(frequency_low, frequency_step, last).is_none() {
                return Err(RowErrorKind::FrequencyOverflow {
                    frequency_low,
                    frequency_step,
                    bins: powers.len(),
                });
            }
        }

        Ok(Self {
            date,
            time,
            unix_timestamp,
            frequency_low,
            frequency_high,
            frequency_step,
            num_samples,
            powers,
        })
    }
}

fn parse_column<T: FromStr>(
    record: &StringRecord,
    index: usize,
    column: &'static str,
) -> Result<T, RowErrorKind> {
    let value = &record[index];
    value.parse().map_err(|_| {
        RowErrorKind::InvalidNumber {
            column,
            value: value.to_owned(),
        }
    })
}

/// `rtl_power` prints the bin width with two decimals.
fn parse_step(value: &str) -> Result<u64, RowErrorKind> {
    let invalid = || {
        RowErrorKind::InvalidNumber {
            column: "frequencyStep",
            value: value.to_owned(),
        }
    };

    let step: f64 = value.parse().map_err(|_| invalid())?;
    if !step.is_finite() || step < 0.0 {
        return Err(invalid());
    }
    Ok(step as u64)
}

#[derive(Debug, thiserror::Error)]
#[error("invalid sweep row on line {line}: {kind}")]
pub struct RowError {
    pub line: u64,
    pub kind: RowErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum RowErrorKind {
    #[error("expected at least 6 columns, got {columns}")]
    MissingColumns { columns: usize },
    #[error("invalid {column}: {value:?}")]
    InvalidNumber { column: &'static str, value: String },
    #[error("invalid date/time: {value:?}")]
    InvalidDateTime { value: String },
    #[error("{bins} bins of {frequency_step} Hz from {frequency_low} Hz exceed the frequency range")]
    FrequencyOverflow {
        frequency_low: u64,
        frequency_step: u64,
        bins: usize,
    },
}
