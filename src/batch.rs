use std::{
    io::ErrorKind,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use humantime::format_duration;
use spectrum_api_types::{
    BatchId,
    Position,
};

use crate::Error;

pub const CSV_EXTENSION: &'static str = "csv";
pub const JSON_EXTENSION: &'static str = "json";

/// Scalar metadata attached to every spectrum document of a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchMetadata {
    /// Altitude in meters.
    pub altitude: f32,
    pub position: Position,
    /// Label for the integration interval, e.g. `10s`.
    pub integration_interval: String,
}

impl BatchMetadata {
    pub fn new(altitude: f32, position: Position, integration_interval: Duration) -> Self {
        Self {
            altitude,
            position,
            integration_interval: format_duration(integration_interval).to_string(),
        }
    }
}

/// One sweep-acquisition-and-upload unit.
#[derive(Clone, Debug)]
pub struct Batch {
    pub id: BatchId,
    pub directory: PathBuf,
    pub metadata: BatchMetadata,
}

impl Batch {
    /// Creates a batch identified by the current local time.
    pub fn new(directory: impl Into<PathBuf>, metadata: BatchMetadata) -> Self {
        Self::with_id(BatchId::now(), directory, metadata)
    }

    pub fn with_id(id: BatchId, directory: impl Into<PathBuf>, metadata: BatchMetadata) -> Self {
        Self {
            id,
            directory: directory.into(),
            metadata,
        }
    }

    /// Where the sweep binary is told to write its output.
    pub fn csv_path(&self) -> PathBuf {
        self.directory.join(self.id.file_name(CSV_EXTENSION))
    }

    pub fn json_path(&self) -> PathBuf {
        self.directory.join(self.id.file_name(JSON_EXTENSION))
    }
}

/// Finds `<batch_id>.<extension>` in `directory`.
///
/// This lists the directory once. A missing directory is reported the same
/// way as a missing file.
pub fn locate(
    directory: &Path,
    batch_id: &BatchId,
    extension: &'static str,
) -> Result<PathBuf, Error> {
    let file_name = batch_id.file_name(extension);
    let not_found = || {
        Error::InputNotFound {
            directory: directory.to_owned(),
            batch_id: batch_id.clone(),
            extension,
        }
    };

    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(error) => return Err(error.into()),
    };

    for result in entries {
        let dir_entry = result?;
        if dir_entry.file_name().to_str() == Some(file_name.as_str())
            && dir_entry.file_type()?.is_file()
        {
            return Ok(dir_entry.path());
        }
    }

    Err(not_found())
}
