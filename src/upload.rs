use std::path::Path;

use spectrum_api_client::ApiClient;
use spectrum_api_types::BatchId;

use crate::{
    Error,
    batch::{
        JSON_EXTENSION,
        locate,
    },
};

/// Uploads `<batch_id>.json` from `directory` as is.
///
/// Returns the server's response body. There are no retries.
pub async fn upload(
    client: &ApiClient,
    directory: &Path,
    batch_id: &BatchId,
) -> Result<String, Error> {
    let path = locate(directory, batch_id, JSON_EXTENSION)?;
    tracing::info!(%batch_id, path = %path.display(), "uploading spectrum document");

    let json = tokio::fs::read_to_string(&path).await?;
    let response = client.post_spectrum(json).await?;
    tracing::info!(%batch_id, %response, "server response");

    Ok(response)
}
