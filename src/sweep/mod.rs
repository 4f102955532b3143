//! Aggregation of `rtl_power` CSV rows into integrations.
//!
//! `rtl_power` writes one row per frequency band and sweep pass. All rows of a
//! pass carry the same timestamp, so rows are grouped by timestamp into an
//! [`Integration`], each row becoming one [`MetricSeries`] in row order.

pub mod row;

use std::{
    collections::{
        BTreeMap,
        btree_map::Entry,
    },
    fs::File,
    io::{
        BufReader,
        Read,
    },
    path::Path,
};

use spectrum_api_types::spectrum::{
    Integration,
    MetricSeries,
    MetricValue,
};

pub use self::row::{
    SweepRow,
    TimeZoneMode,
};
use crate::Error;

/// Groups sweep rows by timestamp.
///
/// Integrations are keyed numerically, so they come out in ascending time
/// order regardless of how many digits the timestamps have.
#[derive(Debug, Default)]
pub struct Aggregator {
    integrations: BTreeMap<i64, Integration>,
    num_rows: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: SweepRow) {
        self.num_rows += 1;

        let metric_series = MetricSeries {
            frequency_low: row.frequency_low,
            frequency_high: row.frequency_high,
            frequency_step: row.frequency_step,
            metric_values: row
                .powers
                .into_iter()
                .enumerate()
                .map(|(index, power)| {
                    // parsed rows are checked not to overflow here
                    MetricValue {
                        frequency: row
                            .frequency_low
                            .saturating_add(row.frequency_step.saturating_mul(index as u64)),
                        power,
                    }
                })
                .collect(),
        };

        match self.integrations.entry(row.unix_timestamp) {
            Entry::Occupied(occupied) => {
                occupied.into_mut().metric_series.push(metric_series);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Integration {
                    unix_timestamp: row.unix_timestamp,
                    date: row.date,
                    time: row.time,
                    total_samples: row.num_samples,
                    metric_series: vec![metric_series],
                });
            }
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_integrations(&self) -> usize {
        self.integrations.len()
    }

    /// Returns the integrations in ascending timestamp order.
    ///
    /// A sweep without any rows is an error, not an empty document.
    pub fn finish(self) -> Result<Vec<Integration>, Error> {
        if self.integrations.is_empty() {
            return Err(Error::EmptySweep);
        }
        Ok(self.integrations.into_values().collect())
    }
}

/// Reads comma-space separated `rtl_power` output and aggregates it.
///
/// The first malformed row aborts the whole sweep.
pub fn aggregate_reader<R: Read>(
    reader: R,
    time_zone: TimeZoneMode,
) -> Result<Vec<Integration>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut aggregator = Aggregator::new();
    let mut record = csv::StringRecord::new();

    while reader.read_record(&mut record)? {
        let row = SweepRow::from_record(&record, time_zone)?;
        aggregator.push(row);
    }

    tracing::debug!(
        rows = aggregator.num_rows(),
        integrations = aggregator.num_integrations(),
        "aggregated sweep"
    );

    aggregator.finish()
}

pub fn aggregate_file(path: &Path, time_zone: TimeZoneMode) -> Result<Vec<Integration>, Error> {
    tracing::debug!(path = %path.display(), "reading sweep file");
    let reader = BufReader::new(File::open(path)?);
    aggregate_reader(reader, time_zone)
}
