use std::{
    path::PathBuf,
    time::Duration,
};

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Error,
    bail,
};
use rtl_power_collector::{
    batch::{
        Batch,
        BatchMetadata,
    },
    pipeline::Pipeline,
    rtl_power::{
        FrequencyRange,
        RtlPower,
        SweepConfig,
        SweepRunner,
    },
    sweep::TimeZoneMode,
    sync_time::sync_start_time,
    tracking::{
        DeviceTracker,
        FixedLocation,
    },
    util::http_client,
};
use spectrum_api_client::{
    ApiClient,
    DEFAULT_API_URL,
};
use spectrum_api_types::{
    BatchId,
    Position,
};
use tokio_util::sync::CancellationToken;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let client = ApiClient::new(http_client(), args.api_url);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, shutting down");
                cancel.cancel();
            }
        }
    });

    let pipeline = Pipeline::new(client.clone(), &args.directory, args.time_zone);

    match args.command {
        Command::Run {
            sweep,
            metadata,
            no_sync,
            repeat,
            track,
            tracking,
        } => {
            let pipeline = pipeline
                .with_sync_time(!no_sync)
                .with_sweep_runner(sweep.rtl_power());
            let batch_metadata = metadata.batch_metadata(sweep.interval);
            let batches = run_batches(
                &pipeline,
                &batch_metadata,
                repeat,
                sweep.interval,
                &cancel,
            );

            if track {
                let tracker = tracking.tracker(client, metadata.position.position())?;
                let tracking_cancel = cancel.child_token();
                let (result, ()) = tokio::join!(
                    async {
                        let result = batches.await;
                        tracking_cancel.cancel();
                        result
                    },
                    tracker.run(&tracking_cancel),
                );
                result?;
            }
            else {
                batches.await?;
            }
        }
        Command::Convert {
            batch_id,
            metadata,
            interval,
        } => {
            let batch = Batch::with_id(
                batch_id,
                &args.directory,
                metadata.batch_metadata(interval),
            );
            let conversion = pipeline.convert(&batch).await?;
            println!(
                "{} ({} integrations)",
                conversion.json_path.display(),
                conversion.integrations
            );
        }
        Command::Upload { batch_id } => {
            let response = pipeline.upload(&batch_id).await?;
            println!("{response}");
        }
        Command::SyncTime => {
            let outcome = sync_start_time(&client, &cancel).await;
            println!("{outcome:?}");
        }
        Command::Track { position, tracking } => {
            let tracker = tracking.tracker(client, position.position())?;
            tracker.run(&cancel).await;
        }
        Command::BatchId => {
            println!("{}", BatchId::now());
        }
    }

    Ok(())
}

/// Runs one batch, or batches until cancelled if `repeat` is set.
async fn run_batches<S: SweepRunner>(
    pipeline: &Pipeline<S>,
    metadata: &BatchMetadata,
    repeat: bool,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    if repeat {
        pipeline.run_batches(metadata, retry_delay, cancel).await;
        return Ok(());
    }

    match pipeline.run_batch(metadata, cancel).await {
        Ok(report) => {
            tracing::info!(
                batch_id = %report.batch_id,
                integrations = report.integrations,
                response = %report.response,
                "batch uploaded"
            );
            Ok(())
        }
        Err(error) if error.is_cancelled() => {
            tracing::info!(stage = %error.stage, "batch cancelled");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

#[derive(Debug, Parser)]
pub struct Args {
    /// Base URL of the spectrum database.
    #[clap(long, env = "SPECTRUM_API_URL", default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// Directory holding the sweep CSVs and spectrum documents.
    #[clap(short, long, env = "RTL_POWER_DIR", default_value = "RTL_POWER")]
    directory: PathBuf,

    /// Time zone `rtl_power` wrote its timestamps in: `local` or `utc`.
    #[clap(long, env = "RTL_POWER_TIME_ZONE", default_value_t = TimeZoneMode::Local)]
    time_zone: TimeZoneMode,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sweep, convert and upload.
    Run {
        #[clap(flatten)]
        sweep: SweepArgs,

        #[clap(flatten)]
        metadata: MetadataArgs,

        /// Start sweeping right away instead of waiting for the server's
        /// start time.
        #[clap(long)]
        no_sync: bool,

        /// Keep running batches until interrupted. A failed batch is retried
        /// after the integration interval.
        #[clap(long)]
        repeat: bool,

        /// Report the device location while sweeping.
        #[clap(long)]
        track: bool,

        #[clap(flatten)]
        tracking: TrackingArgs,
    },
    /// Convert an existing `<batch_id>.csv` to `<batch_id>.json`.
    Convert {
        batch_id: BatchId,

        #[clap(flatten)]
        metadata: MetadataArgs,

        /// Integration interval the sweep was made with.
        #[clap(short, long, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
    },
    /// Upload an existing `<batch_id>.json`.
    Upload { batch_id: BatchId },
    /// Wait for the server's start time.
    SyncTime,
    /// Only report the device location.
    Track {
        #[clap(flatten)]
        position: PositionArgs,

        #[clap(flatten)]
        tracking: TrackingArgs,
    },
    /// Print a batch ID for the current time.
    BatchId,
}

#[derive(Debug, clap::Args)]
pub struct SweepArgs {
    /// Frequency range as `low:high:bin_width`.
    #[clap(short, long, env = "RTL_POWER_FREQUENCY", default_value = "88M:108M:125k")]
    frequency: FrequencyRange,

    /// Integration interval.
    #[clap(short, long, env = "RTL_POWER_INTERVAL", value_parser = humantime::parse_duration, default_value = "10s")]
    interval: Duration,

    /// Keep sweeping instead of stopping after one pass.
    #[clap(long)]
    continuous: bool,

    /// Stop sweeping after this long.
    #[clap(short, long, value_parser = humantime::parse_duration)]
    exit_timer: Option<Duration>,

    /// Tuner gain in dB. Automatic if not set.
    #[clap(short, long, env = "RTL_POWER_GAIN")]
    gain: Option<f32>,

    /// Device index.
    #[clap(short = 'D', long, env = "RTL_POWER_DEVICE")]
    device: Option<u32>,

    /// Path to the `rtl_power` binary.
    #[clap(long, env = "RTL_POWER_BIN", default_value = "rtl_power")]
    rtl_power: PathBuf,
}

impl SweepArgs {
    fn rtl_power(&self) -> RtlPower {
        RtlPower::new(
            &self.rtl_power,
            SweepConfig {
                frequency_range: self.frequency,
                integration_interval: self.interval,
                single_shot: !self.continuous,
                exit_timer: self.exit_timer,
                gain: self.gain,
                device_index: self.device,
            },
        )
    }
}

#[derive(Debug, clap::Args)]
pub struct PositionArgs {
    #[clap(long, env = "LATITUDE", allow_negative_numbers = true)]
    latitude: f64,

    #[clap(long, env = "LONGITUDE", allow_negative_numbers = true)]
    longitude: f64,
}

impl PositionArgs {
    fn position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct MetadataArgs {
    /// Altitude in meters.
    #[clap(long, env = "ALTITUDE", default_value = "0", allow_negative_numbers = true)]
    altitude: f32,

    #[clap(flatten)]
    position: PositionArgs,
}

impl MetadataArgs {
    fn batch_metadata(&self, integration_interval: Duration) -> BatchMetadata {
        BatchMetadata::new(self.altitude, self.position.position(), integration_interval)
    }
}

#[derive(Debug, clap::Args)]
pub struct TrackingArgs {
    #[clap(long, env = "DEVICE_ID")]
    device_id: Option<String>,

    /// Push token the server can reach this device with.
    #[clap(long, env = "PUSH_TOKEN")]
    push_token: Option<String>,

    /// Time between device reports.
    #[clap(long, env = "TRACKING_INTERVAL", value_parser = humantime::parse_duration, default_value = "3m")]
    tracking_interval: Duration,
}

impl TrackingArgs {
    fn tracker(self, client: ApiClient, position: Position) -> Result<DeviceTracker<FixedLocation>, Error> {
        let Some(device_id) = self.device_id
        else {
            bail!("Device tracking needs --device-id.");
        };
        let Some(push_token) = self.push_token
        else {
            bail!("Device tracking needs --push-token.");
        };

        Ok(
            DeviceTracker::new(client, FixedLocation(position), device_id, push_token)
                .with_interval(self.tracking_interval),
        )
    }
}
