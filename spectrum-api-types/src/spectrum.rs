//! Spectrum document uploaded to `/addrecord/spectrum`.
//!
//! Scalars are sent as JSON strings of their decimal value, except power
//! readings which are plain numbers.

use std::fmt;

use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
    de::{
        self,
        IgnoredAny,
        MapAccess,
        Unexpected,
        Visitor,
    },
    ser::SerializeMap,
};
use serde_json::Number;
use serde_with::{
    DisplayFromStr,
    serde_as,
};

use crate::BatchId;

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumDocument {
    #[serde(rename = "BATCH_ID")]
    pub batch_id: BatchId,

    #[serde_as(as = "DisplayFromStr")]
    pub altitude: f32,

    #[serde_as(as = "DisplayFromStr")]
    pub latitude: f64,

    #[serde_as(as = "DisplayFromStr")]
    pub longitude: f64,

    /// Free-form label, e.g. `10s`.
    pub integration_interval: String,

    pub integrations: Vec<Integration>,
}

/// All frequency bands recorded during one sweep pass.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    #[serde_as(as = "DisplayFromStr")]
    pub unix_timestamp: i64,

    /// Date column as written by `rtl_power`.
    pub date: String,

    /// Time column as written by `rtl_power`.
    pub time: String,

    #[serde_as(as = "DisplayFromStr")]
    pub total_samples: u64,

    pub metric_series: Vec<MetricSeries>,
}

/// One CSV row: a frequency band and its power readings.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    #[serde_as(as = "DisplayFromStr")]
    pub frequency_low: u64,

    #[serde_as(as = "DisplayFromStr")]
    pub frequency_high: u64,

    #[serde_as(as = "DisplayFromStr")]
    pub frequency_step: u64,

    pub metric_values: Vec<MetricValue>,
}

impl MetricSeries {
    /// Absolute frequency of the `index`-th bin in Hz.
    pub fn frequency_at(&self, index: usize) -> Option<u64> {
        bin_frequency(self.frequency_low, self.frequency_step, index)
    }
}

/// `low + step * index`, or `None` if that doesn't fit in a `u64`.
pub fn bin_frequency(low: u64, step: u64, index: usize) -> Option<u64> {
    u64::try_from(index)
        .ok()
        .and_then(|index| step.checked_mul(index))
        .and_then(|offset| low.checked_add(offset))
}

/// A power reading in dB, tagged with the frequency of its bin.
///
/// Encoded as a single-entry object: `{"100000000":-10.5}`.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricValue {
    pub frequency: u64,
    pub power: Number,
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.frequency.to_string(), &self.power)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MetricValueVisitor;

        impl<'de> Visitor<'de> for MetricValueVisitor {
            type Value = MetricValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an object with a single frequency key")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let (frequency, power): (String, Number) = map
                    .next_entry()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;

                if map.next_key::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(2, &self));
                }

                let frequency = frequency
                    .parse()
                    .map_err(|_| de::Error::invalid_value(Unexpected::Str(&frequency), &self))?;

                Ok(MetricValue { frequency, power })
            }
        }

        deserializer.deserialize_map(MetricValueVisitor)
    }
}
