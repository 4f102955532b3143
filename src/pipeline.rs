//! Runs a batch stage by stage.

use std::{
    fmt::Display,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use spectrum_api_client::ApiClient;
use spectrum_api_types::BatchId;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    Error,
    batch::{
        Batch,
        BatchMetadata,
        CSV_EXTENSION,
        locate,
    },
    document::{
        assemble,
        persist,
    },
    rtl_power::SweepRunner,
    sweep::{
        TimeZoneMode,
        aggregate_file,
    },
    sync_time::{
        SyncOutcome,
        sync_start_time,
    },
};

/// Shortest pause after a failed batch. Batch IDs have a resolution of one
/// second, so a retry within the same second would reuse the file names.
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    SyncTime,
    Sweep,
    Locate,
    Aggregate,
    Persist,
    Upload,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SyncTime => "time sync",
            Self::Sweep => "sweep",
            Self::Locate => "locating sweep file",
            Self::Aggregate => "aggregation",
            Self::Persist => "writing spectrum document",
            Self::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// A batch stopped at `stage`. Later stages didn't run.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<Error>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|error| {
            PipelineError {
                stage,
                source: error.into(),
            }
        })
    }
}

fn check_cancelled(cancel: &CancellationToken, next: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled).at(next)
    }
    else {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Conversion {
    pub json_path: PathBuf,
    pub integrations: usize,
}

#[derive(Clone, Debug)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub json_path: PathBuf,
    pub integrations: usize,
    /// What the server answered to the upload.
    pub response: String,
}

#[derive(Clone, Debug)]
pub struct Pipeline<S = ()> {
    client: ApiClient,
    directory: PathBuf,
    time_zone: TimeZoneMode,
    sync_time: bool,
    sweep_runner: S,
}

impl Pipeline {
    pub fn new(client: ApiClient, directory: impl Into<PathBuf>, time_zone: TimeZoneMode) -> Self {
        Self {
            client,
            directory: directory.into(),
            time_zone,
            sync_time: true,
            sweep_runner: (),
        }
    }
}

impl<S> Pipeline<S> {
    pub fn with_sweep_runner<T>(self, sweep_runner: T) -> Pipeline<T> {
        Pipeline {
            client: self.client,
            directory: self.directory,
            time_zone: self.time_zone,
            sync_time: self.sync_time,
            sweep_runner,
        }
    }

    /// Whether to wait for the server's start time before each sweep.
    pub fn with_sync_time(mut self, sync_time: bool) -> Self {
        self.sync_time = sync_time;
        self
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn new_batch(&self, metadata: BatchMetadata) -> Batch {
        Batch::new(&self.directory, metadata)
    }

    /// Turns the batch's CSV into its JSON document.
    pub async fn convert(&self, batch: &Batch) -> Result<Conversion, PipelineError> {
        let csv_path = locate(&self.directory, &batch.id, CSV_EXTENSION).at(Stage::Locate)?;
        tracing::debug!(path = %csv_path.display(), "aggregating sweep file");

        let time_zone = self.time_zone;
        let integrations = tokio::task::spawn_blocking(move || aggregate_file(&csv_path, time_zone))
            .await
            .at(Stage::Aggregate)?
            .at(Stage::Aggregate)?;
        let num_integrations = integrations.len();
        tracing::debug!(integrations = num_integrations, "aggregated sweep file");

        let document = assemble(batch, integrations);
        let json_path = batch.json_path();
        tokio::task::spawn_blocking({
            let json_path = json_path.clone();
            move || persist(&document, &json_path)
        })
        .await
        .at(Stage::Persist)?
        .at(Stage::Persist)?;

        Ok(Conversion {
            json_path,
            integrations: num_integrations,
        })
    }

    /// Uploads an already written `<batch_id>.json`.
    pub async fn upload(&self, batch_id: &BatchId) -> Result<String, PipelineError> {
        crate::upload::upload(&self.client, &self.directory, batch_id)
            .await
            .at(Stage::Upload)
    }
}

impl<S: SweepRunner> Pipeline<S> {
    /// Syncs, sweeps, converts and uploads one batch.
    pub async fn run_batch(
        &self,
        metadata: &BatchMetadata,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        if self.sync_time {
            check_cancelled(cancel, Stage::SyncTime)?;
            if sync_start_time(&self.client, cancel).await == SyncOutcome::Cancelled {
                return Err(Error::Cancelled).at(Stage::SyncTime);
            }
        }

        let batch = self.new_batch(metadata.clone());
        let span = tracing::info_span!("batch", batch_id = %batch.id);
        self.sweep_and_upload(&batch, cancel).instrument(span).await
    }

    /// Runs batches back to back until cancelled.
    ///
    /// A failed batch is logged, and the next one starts after `retry_delay`
    /// (at least [`MIN_RETRY_DELAY`]).
    pub async fn run_batches(
        &self,
        metadata: &BatchMetadata,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) {
        let retry_delay = retry_delay.max(MIN_RETRY_DELAY);

        while !cancel.is_cancelled() {
            match self.run_batch(metadata, cancel).await {
                Ok(report) => {
                    tracing::info!(
                        batch_id = %report.batch_id,
                        integrations = report.integrations,
                        response = %report.response,
                        "batch uploaded"
                    );
                }
                Err(error) if error.is_cancelled() => {
                    tracing::info!(stage = %error.stage, "batch cancelled");
                    break;
                }
                Err(error) => {
                    tracing::error!(
                        stage = %error.stage,
                        error = ?error.source,
                        retry_in = %humantime::format_duration(retry_delay),
                        "batch failed"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                }
            }
        }
    }

    async fn sweep_and_upload(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        check_cancelled(cancel, Stage::Sweep)?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .at(Stage::Sweep)?;
        self.sweep_runner
            .run(&batch.csv_path(), cancel)
            .await
            .at(Stage::Sweep)?;

        check_cancelled(cancel, Stage::Locate)?;
        let conversion = self.convert(batch).await?;

        check_cancelled(cancel, Stage::Upload)?;
        let response = self.upload(&batch.id).await?;

        Ok(BatchReport {
            batch_id: batch.id.clone(),
            json_path: conversion.json_path,
            integrations: conversion.integrations,
            response,
        })
    }
}
