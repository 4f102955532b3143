//! # rtl_power sweep collector
//!
//! Runs `rtl_power`, turns the CSV it writes into a spectrum document and
//! uploads that document to the spectrum database. A batch goes through these
//! stages, each starting only after the previous one succeeded:
//!
//! 1. optional start-time synchronisation with the server ([`sync_time`])
//! 2. the sweep itself ([`rtl_power`])
//! 3. locating `<batch>.csv` ([`batch::locate`])
//! 4. aggregating rows into integrations ([`sweep`])
//! 5. assembling and persisting `<batch>.json` ([`document`])
//! 6. uploading the document ([`upload`])
//!
//! [`pipeline::Pipeline`] strings them together. [`tracking`] runs the
//! unrelated periodic device report.

pub mod batch;
pub mod document;
pub mod pipeline;
pub mod rtl_power;
pub mod sweep;
pub mod sync_time;
pub mod tracking;
pub mod upload;
pub mod util;

use std::{
    path::PathBuf,
    process::ExitStatus,
};

use spectrum_api_types::BatchId;

#[derive(Debug, thiserror::Error)]
#[error("rtl-power-collector error")]
pub enum Error {
    Io(#[from] std::io::Error),
    Csv(#[from] csv::Error),
    Json(#[from] serde_json::Error),
    Api(#[from] spectrum_api_client::Error),
    Join(#[from] tokio::task::JoinError),
    InvalidRow(#[from] crate::sweep::row::RowError),
    #[error("{extension} file for batch {batch_id} not found in {}", directory.display())]
    InputNotFound {
        directory: PathBuf,
        batch_id: BatchId,
        extension: &'static str,
    },
    #[error("sweep file contains no rows")]
    EmptySweep,
    #[error("failed to start {}", program.display())]
    SpawnSweep {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rtl_power exited with {status}")]
    SweepFailed { status: ExitStatus },
    #[error("cancelled")]
    Cancelled,
}
