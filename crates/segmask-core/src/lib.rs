//! Segmask Core
//!
//! Batch client for a remote image segmentation service:
//! - Validating input files and processing parameters
//! - Uploading each image and polling for its result (`Transport`, `JobPoller`)
//! - Running a batch in the background with cancellation (`BatchRunner`)
//! - Reporting progress to front ends (`EventSink`, `BatchEvent`)
//! - Saving result images to disk (`ResultDownloader`)

pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod files;
pub mod outcome;
pub mod params;
pub mod poller;
pub mod runner;
pub mod transport;

pub use config::SegmaskConfig;
pub use download::{DownloadReport, ResultDownloader, result_file_name};
pub use error::{ErrorKind, SegmaskError, SegmaskResult};
pub use events::{BatchEvent, ChannelEventSink, EventSink, channel};
pub use files::{InputSelection, SUPPORTED_EXTENSIONS, collect_inputs, is_supported_image, validate_batch};
pub use outcome::{BatchOutcome, ItemFailure, ItemResult};
pub use params::ProcessingParameters;
pub use poller::{JobPoller, PollOutcome, PollPolicy};
pub use runner::{BatchHandle, BatchRunner, BatchTerminal, RunState, RunnerLimits, progress_percent};
pub use transport::{
    HttpSettings, HttpTransport, HttpTransportFactory, JobToken, MockTransport, PollStatus, Transport,
    TransportFactory,
};
