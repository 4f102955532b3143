use std::{
    fs::File,
    io::{
        BufWriter,
        Write,
    },
    path::Path,
};

use spectrum_api_types::spectrum::{
    Integration,
    SpectrumDocument,
};

use crate::{
    Error,
    batch::Batch,
};

/// Wraps aggregated integrations with the batch's metadata.
pub fn assemble(batch: &Batch, integrations: Vec<Integration>) -> SpectrumDocument {
    SpectrumDocument {
        batch_id: batch.id.clone(),
        altitude: batch.metadata.altitude,
        latitude: batch.metadata.position.latitude,
        longitude: batch.metadata.position.longitude,
        integration_interval: batch.metadata.integration_interval.clone(),
        integrations,
    }
}

/// Writes the document to `path`.
///
/// The JSON goes to a temporary file next to `path` first, which is then
/// renamed, so `path` either holds a complete document or doesn't exist.
pub fn persist(document: &SpectrumDocument, path: &Path) -> Result<(), Error> {
    let temp_path = path.with_extension("json.partial");

    let result = write_json(document, &temp_path).and_then(|()| {
        std::fs::rename(&temp_path, path)?;
        Ok(())
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    else {
        tracing::info!(path = %path.display(), "spectrum document written");
    }

    result
}

fn write_json(document: &SpectrumDocument, path: &Path) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, document)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use spectrum_api_types::{
        Position,
        spectrum::SpectrumDocument,
    };
    use tempfile::tempdir;

    use crate::{
        batch::{
            Batch,
            BatchMetadata,
        },
        document::{
            assemble,
            persist,
        },
        sweep::{
            TimeZoneMode,
            aggregate_reader,
        },
    };

    fn batch(directory: &std::path::Path) -> Batch {
        Batch::with_id(
            "20200101-120000".parse().unwrap(),
            directory,
            BatchMetadata::new(
                41.5,
                Position {
                    latitude: -37.81,
                    longitude: 144.96,
                },
                Duration::from_secs(10),
            ),
        )
    }

    #[test]
    fn it_writes_the_document_with_batch_metadata() {
        let dir = tempdir().unwrap();
        let batch = batch(dir.path());

        let integrations = aggregate_reader(
            "2020-01-01, 12:00:00, 100000000, 100500000, 100000, 5, -10, -20, -30, -40, -50\n"
                .as_bytes(),
            TimeZoneMode::Utc,
        )
        .unwrap();
        let document = assemble(&batch, integrations);
        persist(&document, &batch.json_path()).unwrap();

        let json = std::fs::read_to_string(batch.json_path()).unwrap();
        assert!(json.starts_with(
            r#"{"BATCH_ID":"20200101-120000","altitude":"41.5","latitude":"-37.81","longitude":"144.96","integrationInterval":"10s","integrations":[{"unixTimestamp":"1577880000","date":"2020-01-01","time":"12:00:00","totalSamples":"5","metricSeries":[{"frequencyLow":"100000000""#
        ));

        let parsed: SpectrumDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, document);

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn it_leaves_nothing_behind_when_writing_fails() {
        let dir = tempdir().unwrap();
        let batch = batch(&dir.path().join("missing"));
        let document = assemble(&batch, vec![]);

        assert!(persist(&document, &batch.json_path()).is_err());
        assert!(!batch.json_path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
