//! Transport abstraction for the remote segmentation API.
//!
//! A transport performs exactly one upload or one poll exchange per call and
//! never retries on its own; retry policy belongs to the [`JobPoller`].
//!
//! [`JobPoller`]: crate::poller::JobPoller

mod http;
mod mock;

pub use http::{HttpSettings, HttpTransport, HttpTransportFactory};
pub use mock::{MockCall, MockPoll, MockTransport, MockUpload};

use crate::error::SegmaskResult;
use crate::params::ProcessingParameters;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Opaque job identifier returned by the upload call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobToken(pub String);

impl JobToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// State of a job as reported by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Ready(Vec<String>),
}

/// Body of a successful upload response.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    #[serde(default)]
    pub image_token: Option<String>,
}

/// Body of a poll response. A missing, null, or empty `result_images` means
/// the job is still running.
#[derive(Debug, Deserialize)]
pub(crate) struct PollResponse {
    #[serde(default)]
    pub result_images: Option<Vec<String>>,
}

impl From<PollResponse> for PollStatus {
    fn from(response: PollResponse) -> Self {
        match response.result_images {
            Some(urls) if !urls.is_empty() => Self::Ready(urls),
            _ => Self::Pending,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Uploads one image with the batch parameters and returns its job token.
    async fn upload(
        &self,
        file_path: &Path,
        endpoint: &str,
        parameters: &ProcessingParameters,
    ) -> SegmaskResult<JobToken>;

    /// Queries the job once.
    async fn poll(&self, endpoint: &str, token: &JobToken) -> SegmaskResult<PollStatus>;

    /// Releases the session. Called once when a batch run ends.
    fn close(&self) {}
}

/// Opens a fresh transport session for each batch.
pub trait TransportFactory: Send + Sync {
    fn connect(&self) -> SegmaskResult<Arc<dyn Transport>>;
}

/// Poll URL: the token is appended to the endpoint verbatim.
pub fn poll_url(endpoint: &str, token: &JobToken) -> String {
    format!("{}{}", endpoint, token)
}
