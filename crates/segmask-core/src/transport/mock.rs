//! Scripted transport for tests and offline runs.
//!
//! Upload responses are keyed by file name, poll responses by token. Each
//! queue is consumed front to back and its last entry repeats once the queue
//! is down to one item, so a single `MockPoll::Pending` models a job that never
//! finishes.

use super::{JobToken, PollStatus, Transport, TransportFactory};
use crate::error::{SegmaskError, SegmaskResult};
use crate::params::ProcessingParameters;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Scripted upload result.
#[derive(Debug, Clone)]
pub enum MockUpload {
    Token(String),
    /// Non-2xx status.
    Status(u16),
    /// 2xx response without `image_token`.
    MissingToken,
}

/// Scripted poll result.
#[derive(Debug, Clone)]
pub enum MockPoll {
    Pending,
    Ready(Vec<String>),
    /// Network-level failure.
    Error(String),
}

/// A call recorded by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Upload { path: PathBuf, endpoint: String, parameters: ProcessingParameters },
    Poll { endpoint: String, token: String },
}

#[derive(Default)]
struct Script {
    uploads: HashMap<String, VecDeque<MockUpload>>,
    polls: HashMap<String, VecDeque<MockPoll>>,
    calls: Vec<MockCall>,
}

/// In-memory [`Transport`] that also acts as its own [`TransportFactory`].
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Scripts the upload of the file with this name.
    pub fn on_upload(&self, file_name: &str, response: MockUpload) -> &Self {
        self.script().uploads.entry(file_name.to_string()).or_default().push_back(response);
        self
    }

    /// Scripts one poll answer for this token.
    pub fn on_poll(&self, token: &str, response: MockPoll) -> &Self {
        self.script().polls.entry(token.to_string()).or_default().push_back(response);
        self
    }

    /// Scripts a file that uploads as `token` and is ready on the first poll.
    pub fn succeed(&self, file_name: &str, token: &str, urls: &[&str]) -> &Self {
        self.on_upload(file_name, MockUpload::Token(token.to_string()));
        self.on_poll(token, MockPoll::Ready(urls.iter().map(|u| (*u).to_string()).collect()))
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.script().calls.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, MockCall::Upload { .. })).count()
    }

    pub fn poll_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, MockCall::Poll { .. })).count()
    }

    /// Number of sessions handed out through [`TransportFactory::connect`].
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn upload(
        &self,
        file_path: &Path,
        endpoint: &str,
        parameters: &ProcessingParameters,
    ) -> SegmaskResult<JobToken> {
        let file_name =
            file_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

        let scripted = {
            let mut script = self.script();
            script.calls.push(MockCall::Upload {
                path: file_path.to_path_buf(),
                endpoint: endpoint.to_string(),
                parameters: *parameters,
            });
            script.uploads.get_mut(&file_name).and_then(next_scripted)
        };

        match scripted {
            Some(MockUpload::Token(token)) => Ok(JobToken(token)),
            Some(MockUpload::Status(status)) => Err(SegmaskError::Transport {
                status: Some(status),
                message: format!("server returned {} for upload", status),
            }),
            Some(MockUpload::MissingToken) => {
                Err(SegmaskError::protocol("upload response has no image_token"))
            }
            None => Err(SegmaskError::Transport {
                status: None,
                message: format!("no mock upload configured for {}", file_name),
            }),
        }
    }

    async fn poll(&self, endpoint: &str, token: &JobToken) -> SegmaskResult<PollStatus> {
        let scripted = {
            let mut script = self.script();
            script.calls.push(MockCall::Poll {
                endpoint: endpoint.to_string(),
                token: token.to_string(),
            });
            script.polls.get_mut(token.as_str()).and_then(next_scripted)
        };

        match scripted {
            Some(MockPoll::Pending) | None => Ok(PollStatus::Pending),
            Some(MockPoll::Ready(urls)) => Ok(PollStatus::Ready(urls)),
            Some(MockPoll::Error(message)) => Err(SegmaskError::Transport { status: None, message }),
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl TransportFactory for MockTransport {
    fn connect(&self) -> SegmaskResult<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}
