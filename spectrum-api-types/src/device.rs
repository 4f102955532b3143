use std::fmt::Display;

use chrono::{
    DateTime,
    TimeZone,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_with::{
    DisplayFromStr,
    serde_as,
};

use crate::{
    Position,
    format_compact_datetime,
};

/// Periodic report sent to `/addrecord/device` so the server knows where a
/// device was last seen and which push token reaches it.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub token: String,

    #[serde(rename = "deviceID")]
    pub device_id: String,

    #[serde_as(as = "DisplayFromStr")]
    pub latitude: f64,

    #[serde_as(as = "DisplayFromStr")]
    pub longitude: f64,

    /// `yyyyMMdd-HHmmss`
    pub date: String,
}

impl DeviceReport {
    pub fn new<Tz: TimeZone>(
        token: impl Into<String>,
        device_id: impl Into<String>,
        position: Position,
        time: &DateTime<Tz>,
    ) -> Self
    where
        Tz::Offset: Display,
    {
        Self {
            token: token.into(),
            device_id: device_id.into(),
            latitude: position.latitude,
            longitude: position.longitude,
            date: format_compact_datetime(time),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };
    use serde_json::json;

    use crate::{
        Position,
        device::DeviceReport,
    };

    #[test]
    fn it_serializes_like_the_ingestion_server_expects() {
        let report = DeviceReport::new(
            "push-token",
            "device-1",
            Position {
                latitude: -27.5,
                longitude: 153.0,
            },
            &Utc.with_ymd_and_hms(2017, 3, 26, 14, 0, 1).unwrap(),
        );

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "token": "push-token",
                "deviceID": "device-1",
                "latitude": "-27.5",
                "longitude": "153",
                "date": "20170326-140001",
            })
        );
    }
}
