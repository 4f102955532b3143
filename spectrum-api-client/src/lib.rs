//! Client for the spectrum database ingestion API.
//!
//! The server accepts JSON documents as `text/plain` bodies and answers with
//! opaque text, so the client doesn't use reqwest's JSON helpers.

use chrono::{
    DateTime,
    Utc,
};
use reqwest::header::{
    ACCEPT,
    CONTENT_TYPE,
};
use spectrum_api_types::device::DeviceReport;
use url::Url;

pub const DEFAULT_API_URL: &'static str = "http://spectrumdatabase.org/";

const SPECTRUM_PATH: &'static str = "addrecord/spectrum";
const DEVICE_PATH: &'static str = "addrecord/device";
const SYNC_TIME_PATH: &'static str = "synctime";

const BODY_CONTENT_TYPE: &'static str = "text/plain; charset=utf-8";

#[derive(Debug, thiserror::Error)]
#[error("spectrum-api-client error")]
pub enum Error {
    Http(#[from] reqwest::Error),
    Json(#[from] serde_json::Error),
    Url(#[from] url::ParseError),
    #[error("invalid sync time: {body:?}")]
    InvalidSyncTime { body: String },
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    api_url: Url,
}

impl ApiClient {
    pub fn new(client: reqwest::Client, mut api_url: Url) -> Self {
        // make sure relative paths are joined below the base path instead of
        // replacing its last segment.
        if let Ok(mut path_segments) = api_url.path_segments_mut() {
            path_segments.pop_if_empty().push("");
        }

        Self { client, api_url }
    }

    pub fn from_url(api_url: Url) -> Self {
        Self::new(Default::default(), api_url)
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Uploads a spectrum document (the raw JSON text) and returns the
    /// server's response body.
    pub async fn post_spectrum(&self, json: String) -> Result<String, Error> {
        self.post_text(SPECTRUM_PATH, json).await
    }

    /// Reports device location and push token. Returns the server's response
    /// body.
    pub async fn post_device(&self, report: &DeviceReport) -> Result<String, Error> {
        let json = serde_json::to_string(report)?;
        self.post_text(DEVICE_PATH, json).await
    }

    /// Asks the server when the next sweep should start.
    pub async fn sync_time(&self) -> Result<DateTime<Utc>, Error> {
        let url = self.api_url.join(SYNC_TIME_PATH)?;
        tracing::debug!(%url, "requesting sync time");

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        // plain decimal milliseconds since the epoch
        match body
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
        {
            Some(sync_time) => Ok(sync_time),
            None => Err(Error::InvalidSyncTime { body }),
        }
    }

    async fn post_text(&self, path: &str, body: String) -> Result<String, Error> {
        let url = self.api_url.join(path)?;
        tracing::debug!(%url, length = body.len(), "sending POST request");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, BODY_CONTENT_TYPE)
            .header(ACCEPT, "*/*")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(status = %response.status());

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::{
            HeaderMap,
            StatusCode,
            header::CONTENT_TYPE,
        },
        routing,
    };
    use chrono::DateTime;
    use spectrum_api_types::device::DeviceReport;
    use tokio::net::TcpListener;
    use url::Url;

    use crate::{
        ApiClient,
        Error,
    };

    async fn serve(router: Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{address}/").parse().unwrap()
    }

    async fn echo(headers: HeaderMap, body: String) -> (StatusCode, String) {
        match headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()) {
            Some("text/plain; charset=utf-8") => (StatusCode::OK, format!("received {body}")),
            _ => (StatusCode::UNSUPPORTED_MEDIA_TYPE, String::new()),
        }
    }

    #[test]
    fn it_keeps_the_base_path_when_joining() {
        let client = ApiClient::from_url("http://localhost:9000/api".parse().unwrap());
        assert_eq!(client.api_url().as_str(), "http://localhost:9000/api/");
        assert_eq!(
            client.api_url().join("synctime").unwrap().as_str(),
            "http://localhost:9000/api/synctime"
        );

        let client = ApiClient::from_url("http://localhost:9000/".parse().unwrap());
        assert_eq!(client.api_url().as_str(), "http://localhost:9000/");
    }

    #[tokio::test]
    async fn it_posts_spectrum_documents_as_text() {
        let url = serve(Router::new().route("/addrecord/spectrum", routing::post(echo))).await;
        let client = ApiClient::from_url(url);

        let response = client
            .post_spectrum(r#"{"BATCH_ID":"20200101-120000"}"#.to_owned())
            .await
            .unwrap();
        assert_eq!(response, r#"received {"BATCH_ID":"20200101-120000"}"#);
    }

    #[tokio::test]
    async fn it_posts_device_reports() {
        let url = serve(Router::new().route("/addrecord/device", routing::post(echo))).await;
        let client = ApiClient::from_url(url);

        let report = DeviceReport {
            token: "abc".to_owned(),
            device_id: "dev".to_owned(),
            latitude: 1.5,
            longitude: 2.0,
            date: "20170326-140001".to_owned(),
        };
        let response = client.post_device(&report).await.unwrap();
        let body = response.strip_prefix("received ").unwrap();
        let received: DeviceReport = serde_json::from_str(body).unwrap();
        assert_eq!(received, report);
    }

    #[tokio::test]
    async fn it_fails_on_error_status() {
        let url = serve(Router::new().route(
            "/addrecord/spectrum",
            routing::post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let client = ApiClient::from_url(url);

        let result = client.post_spectrum("{}".to_owned()).await;
        assert!(matches!(result, Err(Error::Http(_))));
    }

    #[tokio::test]
    async fn it_parses_the_sync_time() {
        let url = serve(Router::new().route(
            "/synctime",
            routing::get(|| async { "1577880000123\n" }),
        ))
        .await;
        let client = ApiClient::from_url(url);

        let sync_time = client.sync_time().await.unwrap();
        assert_eq!(
            sync_time,
            DateTime::from_timestamp_millis(1577880000123).unwrap()
        );
    }

    #[tokio::test]
    async fn it_rejects_garbage_sync_times() {
        let url = serve(Router::new().route("/synctime", routing::get(|| async { "soon" }))).await;
        let client = ApiClient::from_url(url);

        match client.sync_time().await {
            Err(Error::InvalidSyncTime { body }) => assert_eq!(body, "soon"),
            result => panic!("unexpected result: {result:?}"),
        }
    }
}
