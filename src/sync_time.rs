//! Coarse start-time alignment.
//!
//! The server hands out the instant at which all collectors should start
//! their next sweep. There is no round-trip compensation and no retry; if the
//! server can't be asked, the sweep just starts right away.

use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use spectrum_api_client::ApiClient;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The wait is split into this many sleeps, with the cancellation token
/// checked before each one.
pub const SYNC_WAIT_SLICES: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Waited until the server's start time.
    Waited(Duration),
    /// The server couldn't be asked, so there was no wait.
    Skipped,
    Cancelled,
}

pub async fn sync_start_time(client: &ApiClient, cancel: &CancellationToken) -> SyncOutcome {
    tracing::debug!("synchronising with server");

    let start_time = match client.sync_time().await {
        Ok(start_time) => start_time,
        Err(error) => {
            tracing::warn!(?error, "time sync failed, starting without waiting");
            return SyncOutcome::Skipped;
        }
    };

    let delay = delay_until(start_time, Utc::now());
    tracing::info!(%start_time, delay = %humantime::format_duration(delay), "waiting for sync time");

    wait_sliced(delay, cancel).await
}

/// Time left until `start_time`, zero if it already passed.
pub fn delay_until(start_time: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (start_time - now).to_std().unwrap_or_default()
}

/// Sleeps for `delay` in [`SYNC_WAIT_SLICES`] steps, returning early when
/// `cancel` fires.
pub async fn wait_sliced(delay: Duration, cancel: &CancellationToken) -> SyncOutcome {
    let start = Instant::now();

    for i in 1..=SYNC_WAIT_SLICES {
        let deadline = start + delay * i / SYNC_WAIT_SLICES;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("sync wait cancelled");
                return SyncOutcome::Cancelled;
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    SyncOutcome::Waited(delay)
}

#[cfg(test)]
mod tests {
    use std::time::{
        Duration,
        Instant,
    };

    use axum::{
        Router,
        routing,
    };
    use chrono::{
        TimeDelta,
        TimeZone,
        Utc,
    };
    use spectrum_api_client::ApiClient;
    use tokio_util::sync::CancellationToken;

    use crate::{
        sync_time::{
            SyncOutcome,
            delay_until,
            sync_start_time,
            wait_sliced,
        },
        util::test::{
            serve,
            unreachable_url,
        },
    };

    #[test]
    fn it_does_not_wait_for_past_start_times() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            delay_until(now - TimeDelta::seconds(5), now),
            Duration::ZERO
        );
        assert_eq!(
            delay_until(now + TimeDelta::milliseconds(1500), now),
            Duration::from_millis(1500)
        );
    }

    #[tokio::test]
    async fn it_waits_the_whole_delay() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let outcome = wait_sliced(Duration::from_millis(60), &cancel).await;

        assert_eq!(outcome, SyncOutcome::Waited(Duration::from_millis(60)));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn it_stops_waiting_when_cancelled() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        });

        let outcome = wait_sliced(Duration::from_secs(30), &cancel).await;

        assert_eq!(outcome, SyncOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn it_skips_the_wait_when_the_server_is_unreachable() {
        let client = ApiClient::from_url(unreachable_url().await);
        let outcome = sync_start_time(&client, &CancellationToken::new()).await;
        assert_eq!(outcome, SyncOutcome::Skipped);
    }

    #[tokio::test]
    async fn it_waits_for_the_server_start_time() {
        let router = Router::new().route(
            "/synctime",
            routing::get(|| {
                async {
                    (Utc::now() + TimeDelta::milliseconds(100))
                        .timestamp_millis()
                        .to_string()
                }
            }),
        );
        let client = ApiClient::from_url(serve(router).await);
        let start = Instant::now();

        let outcome = sync_start_time(&client, &CancellationToken::new()).await;

        assert!(matches!(outcome, SyncOutcome::Waited(_)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
