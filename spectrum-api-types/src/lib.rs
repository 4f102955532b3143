use std::{
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
};

use chrono::{
    DateTime,
    Local,
    NaiveDateTime,
    TimeZone,
};
use serde::{
    Deserialize,
    Serialize,
};

pub mod device;
pub mod spectrum;

/// `yyyyMMdd-HHmmss`, used for batch identifiers and device report dates.
pub const COMPACT_DATETIME_FORMAT: &'static str = "%Y%m%d-%H%M%S";

pub fn format_compact_datetime<Tz: TimeZone>(datetime: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    datetime.format(COMPACT_DATETIME_FORMAT).to_string()
}

/// Identifies one sweep batch.
///
/// A batch identifier is the wall-clock time the batch was started, formatted
/// as `yyyyMMdd-HHmmss`. The CSV written by `rtl_power` and the JSON document
/// produced from it are both named after it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId(String);

impl BatchId {
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    pub fn from_datetime<Tz: TimeZone>(datetime: &DateTime<Tz>) -> Self
    where
        Tz::Offset: Display,
    {
        Self(format_compact_datetime(datetime))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this batch's artifact with the given extension, e.g.
    /// `20200101-120000.csv`.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.0)
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BatchId({})", self.0)
    }
}

impl FromStr for BatchId {
    type Err = BatchIdFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || {
            BatchIdFromStrError {
                input: s.to_owned(),
            }
        };

        // chrono accepts unpadded fields, so check that the value survives a
        // round trip.
        let datetime = NaiveDateTime::parse_from_str(s, COMPACT_DATETIME_FORMAT).map_err(|_| err())?;
        if datetime.format(COMPACT_DATETIME_FORMAT).to_string() != s {
            return Err(err());
        }

        Ok(Self(s.to_owned()))
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("Invalid batch ID: {input}")]
pub struct BatchIdFromStrError {
    pub input: String,
}

impl TryFrom<String> for BatchId {
    type Error = BatchIdFromStrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BatchId> for String {
    fn from(value: BatchId) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}
