//! reqwest-backed transport.

use super::{JobToken, PollResponse, PollStatus, Transport, TransportFactory, UploadResponse, poll_url};
use crate::error::{SegmaskError, SegmaskResult, map_http_error};
use crate::files::upload_mime_type;
use crate::params::ProcessingParameters;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeouts applied to every request of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(60), connect_timeout: Duration::from_secs(10) }
    }
}

impl HttpSettings {
    pub(crate) fn build_client(&self) -> SegmaskResult<Client> {
        Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| SegmaskError::Config(format!("failed to build HTTP client: {}", e)))
    }
}

/// One HTTP session. The underlying connection pool is reused for every call
/// made through the same instance.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> SegmaskResult<Self> {
        Ok(Self { client: settings.build_client()? })
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> SegmaskResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(map_http_error(status, &body, operation));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            SegmaskError::protocol(format!("invalid JSON in {} response: {}", operation, e))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self, file_path, parameters), fields(file = %file_path.display()))]
    async fn upload(
        &self,
        file_path: &Path,
        endpoint: &str,
        parameters: &ProcessingParameters,
    ) -> SegmaskResult<JobToken> {
        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|source| SegmaskError::FileRead { path: file_path.to_path_buf(), source })?;

        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SegmaskError::validation(format!("invalid file name: {}", file_path.display())))?
            .to_string();

        let image = Part::bytes(bytes).file_name(file_name).mime_str(upload_mime_type(file_path))?;
        let form = parameters
            .form_fields()
            .into_iter()
            .fold(Form::new().part("image", image), |form, (name, value)| form.text(name, value));

        debug!(endpoint = %endpoint, "Uploading image");
        let response = self.client.post(endpoint).multipart(form).send().await?;
        let body: UploadResponse = Self::read_json(response, "upload").await?;

        let token = body
            .image_token
            .ok_or_else(|| SegmaskError::protocol("upload response has no image_token"))?;
        debug!(token = %token, "Received job token");
        Ok(JobToken(token))
    }

    #[tracing::instrument(skip(self, token), fields(token = %token))]
    async fn poll(&self, endpoint: &str, token: &JobToken) -> SegmaskResult<PollStatus> {
        let url = poll_url(endpoint, token);
        let response = self.client.get(&url).send().await?;
        let body: PollResponse = Self::read_json(response, "poll").await?;
        let status = PollStatus::from(body);
        debug!(ready = matches!(status, PollStatus::Ready(_)), "Polled job");
        Ok(status)
    }

    /// Marks the end of the session. The connection pool itself is released
    /// when the last `Arc` to this transport is dropped.
    fn close(&self) {
        debug!("Closing HTTP session");
    }
}

/// Creates a new [`HttpTransport`] per batch so sessions are never shared.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportFactory {
    settings: HttpSettings,
}

impl HttpTransportFactory {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self) -> SegmaskResult<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(&self.settings)?))
    }
}
