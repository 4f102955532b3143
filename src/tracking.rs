//! Periodic device report.
//!
//! Independent of the sweeps: every few minutes the collector tells the server
//! where it is and which push token reaches it.

use std::time::Duration;

use chrono::Local;
use spectrum_api_client::ApiClient;
use spectrum_api_types::{
    Position,
    device::DeviceReport,
};
use tokio_util::sync::CancellationToken;

use crate::Error;

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Where the device currently is.
pub trait LocationSource {
    /// Returns `None` if there is no position fix yet.
    fn position(&self) -> Option<Position>;
}

/// A stationary collector with a configured position.
#[derive(Clone, Copy, Debug)]
pub struct FixedLocation(pub Position);

impl LocationSource for FixedLocation {
    fn position(&self) -> Option<Position> {
        Some(self.0)
    }
}

#[derive(Debug)]
pub struct DeviceTracker<L> {
    client: ApiClient,
    location: L,
    device_id: String,
    token: String,
    interval: Duration,
}

impl<L: LocationSource> DeviceTracker<L> {
    pub fn new(
        client: ApiClient,
        location: L,
        device_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            location,
            device_id: device_id.into(),
            token: token.into(),
            interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sends one report. Returns the server's response, or `None` if there
    /// was no position to report.
    pub async fn report_once(&self) -> Result<Option<String>, Error> {
        let Some(position) = self.location.position()
        else {
            tracing::debug!("no position fix, skipping device report");
            return Ok(None);
        };

        let report = DeviceReport::new(&self.token, &self.device_id, position, &Local::now());
        let response = self.client.post_device(&report).await?;
        tracing::info!(device_id = %self.device_id, %response, "device reported");

        Ok(Some(response))
    }

    /// Reports every `interval` until cancelled. Failed reports are logged
    /// and retried on the next round.
    pub async fn run(&self, cancel: &CancellationToken) {
        tracing::info!(
            device_id = %self.device_id,
            interval = %humantime::format_duration(self.interval),
            "device tracking started"
        );

        while !cancel.is_cancelled() {
            if let Err(error) = self.report_once().await {
                tracing::error!(?error, "device report failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("device tracking stopped");
    }
}
