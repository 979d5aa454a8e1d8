//! Batch runner: uploads files one at a time, waits for each job, and reports
//! progress through an [`EventSink`].
//!
//! A runner owns at most one running batch. Each batch runs on its own tokio
//! task with a fresh transport session and a [`CancellationToken`] that the
//! caller can trigger through [`BatchRunner::request_cancel`] or
//! [`BatchHandle::request_cancel`]. Cancellation is cooperative: it is checked
//! before each upload and while polling, and an in-flight request is allowed
//! to finish.

use crate::error::{SegmaskError, SegmaskResult};
use crate::events::{BatchEvent, EventSink};
use crate::files::validate_batch;
use crate::outcome::{BatchOutcome, ItemFailure, ItemResult};
use crate::params::ProcessingParameters;
use crate::poller::{JobPoller, PollOutcome, PollPolicy};
use crate::transport::{Transport, TransportFactory};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of the most recent batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Limits enforced at submission time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerLimits {
    pub max_batch_size: Option<usize>,
}

/// How a batch ended, as seen by the code holding the [`BatchHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchTerminal {
    Finished(BatchOutcome),
    /// Stopped early; holds whatever was processed before the stop.
    Cancelled(BatchOutcome),
    Failed(String),
}

impl BatchTerminal {
    pub fn outcome(&self) -> Option<&BatchOutcome> {
        match self {
            Self::Finished(outcome) | Self::Cancelled(outcome) => Some(outcome),
            Self::Failed(_) => None,
        }
    }

    fn state(&self) -> RunState {
        match self {
            Self::Finished(_) => RunState::Completed,
            Self::Cancelled(_) => RunState::Cancelled,
            Self::Failed(_) => RunState::Failed,
        }
    }

    fn into_event(self) -> BatchEvent {
        match self {
            Self::Finished(outcome) => BatchEvent::Finished { outcome },
            Self::Cancelled(_) => BatchEvent::Cancelled,
            Self::Failed(message) => BatchEvent::Failed { message },
        }
    }
}

struct Shared {
    state: RunState,
    cancel: Option<CancellationToken>,
}

/// Handle to one submitted batch.
pub struct BatchHandle {
    cancel: CancellationToken,
    join: JoinHandle<BatchTerminal>,
}

impl BatchHandle {
    /// Asks the batch to stop. Idempotent.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the terminal state. The terminal event has already been
    /// delivered to the sink when this returns.
    pub async fn wait(self) -> BatchTerminal {
        match self.join.await {
            Ok(terminal) => terminal,
            Err(e) => BatchTerminal::Failed(format!("batch supervisor stopped: {}", e)),
        }
    }
}

pub struct BatchRunner {
    factory: Arc<dyn TransportFactory>,
    poller: JobPoller,
    limits: RunnerLimits,
    runtime: Handle,
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl BatchRunner {
    /// Creates a runner that spawns batches on `runtime`.
    pub fn new(factory: Arc<dyn TransportFactory>, runtime: Handle) -> Self {
        Self {
            factory,
            poller: JobPoller::default(),
            limits: RunnerLimits::default(),
            runtime,
            shared: Arc::new(Mutex::new(Shared { state: RunState::Idle, cancel: None })),
        }
    }

    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poller = JobPoller::new(policy);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: RunnerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn state(&self) -> RunState {
        lock(&self.shared).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Cancels the running batch. Returns `false` when nothing is running.
    pub fn request_cancel(&self) -> bool {
        let shared = lock(&self.shared);
        match (&shared.state, &shared.cancel) {
            (RunState::Running, Some(token)) => {
                if !token.is_cancelled() {
                    info!("Cancellation requested");
                }
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Validates the batch and starts it in the background.
    ///
    /// Rejected submissions (empty or ineligible files, bad parameters, a poll
    /// policy with no attempts, a batch already running) return an error
    /// without touching the network or the sink. Otherwise exactly one terminal event reaches `sink`.
    pub fn submit(
        &self,
        files: Vec<PathBuf>,
        endpoint: impl Into<String>,
        parameters: ProcessingParameters,
        sink: Arc<dyn EventSink>,
    ) -> SegmaskResult<BatchHandle> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(SegmaskError::validation("no API endpoint configured"));
        }
        validate_batch(&files, self.limits.max_batch_size)?;
        parameters.validate()?;
        self.poller.policy().validate()?;

        let cancel = CancellationToken::new();
        {
            let mut shared = lock(&self.shared);
            if shared.state == RunState::Running {
                return Err(SegmaskError::AlreadyRunning);
            }
            shared.state = RunState::Running;
            shared.cancel = Some(cancel.clone());
        }

        info!(files = files.len(), endpoint = %endpoint, "Submitting batch");

        let run = BatchRun {
            factory: Arc::clone(&self.factory),
            poller: self.poller.clone(),
            files,
            endpoint,
            parameters,
            cancel: cancel.clone(),
            sink: Arc::clone(&sink),
        };
        let shared = Arc::clone(&self.shared);

        let join = self.runtime.spawn(async move {
            let terminal = match tokio::spawn(run.execute()).await {
                Ok(terminal) => terminal,
                Err(e) => {
                    error!(error = %e, "Batch task aborted");
                    BatchTerminal::Failed(format!("batch task aborted: {}", e))
                }
            };

            // Publish the final state before the terminal event so a sink can
            // submit the next batch straight from its handler.
            {
                let mut shared = lock(&shared);
                shared.state = terminal.state();
                shared.cancel = None;
            }
            sink.on_event(terminal.clone().into_event());
            terminal
        });

        Ok(BatchHandle { cancel, join })
    }
}

/// Closes the transport session when the run ends, on every path.
struct SessionGuard(Arc<dyn Transport>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

enum ItemStep {
    Succeeded(Vec<String>),
    Failed(SegmaskError),
    Cancelled,
}

struct BatchRun {
    factory: Arc<dyn TransportFactory>,
    poller: JobPoller,
    files: Vec<PathBuf>,
    endpoint: String,
    parameters: ProcessingParameters,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
}

impl BatchRun {
    async fn execute(self) -> BatchTerminal {
        let session = match self.factory.connect() {
            Ok(transport) => SessionGuard(transport),
            Err(e) => {
                error!(error = %e, "Failed to open transport session");
                return BatchTerminal::Failed(format!("failed to open transport session: {}", e));
            }
        };

        let total = self.files.len();
        let mut outcome = BatchOutcome::default();
        self.sink.on_event(BatchEvent::Started { total });

        for (index, path) in self.files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(processed = index, total, "Batch cancelled before next upload");
                break;
            }

            info!(file = %path.display(), "Processing file {}/{}", index + 1, total);

            match self.process_item(session.0.as_ref(), path).await {
                ItemStep::Succeeded(urls) => {
                    let result =
                        ItemResult { source_path: path.clone(), result_image_urls: urls };
                    outcome.succeeded.push(result.clone());
                    self.sink.on_event(BatchEvent::ItemSucceeded { index, result });
                }
                ItemStep::Failed(err) => {
                    warn!(file = %path.display(), error = %err, "File failed");
                    let failure = ItemFailure::from_error(path.clone(), &err);
                    outcome.failed.push(failure.clone());
                    self.sink.on_event(BatchEvent::ItemFailed { index, failure });
                }
                ItemStep::Cancelled => {
                    info!(file = %path.display(), "Batch cancelled while waiting for result");
                    break;
                }
            }

            self.sink.on_event(BatchEvent::Progress { percent: progress_percent(index, total) });
        }

        if self.cancel.is_cancelled() {
            info!(summary = %outcome.summary(), "Batch cancelled");
            BatchTerminal::Cancelled(outcome)
        } else {
            info!(summary = %outcome.summary(), "Batch completed");
            BatchTerminal::Finished(outcome)
        }
    }

    async fn process_item(&self, transport: &dyn Transport, path: &Path) -> ItemStep {
        let token = match transport.upload(path, &self.endpoint, &self.parameters).await {
            Ok(token) => token,
            Err(e) => return ItemStep::Failed(e),
        };
        debug!(file = %path.display(), token = %token, "Upload accepted");

        match self.poller.wait(transport, &self.endpoint, &token, &self.cancel).await {
            PollOutcome::Ready(urls) => ItemStep::Succeeded(urls),
            PollOutcome::TimedOut { attempts } => ItemStep::Failed(SegmaskError::Timeout { attempts }),
            PollOutcome::Cancelled => ItemStep::Cancelled,
        }
    }
}

/// Overall progress after finishing the item at `index`. Truncates, so the
/// last item always reports exactly 100.
pub fn progress_percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (index + 1).min(total) * 100 / total;
    u8::try_from(percent).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::BatchEvent;
    use crate::transport::{MockCall, MockPoll, MockTransport, MockUpload};
    use std::time::Duration;

    const ENDPOINT: &str = "http://seg.test/image/";

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<BatchEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<BatchEvent> {
            self.events.lock().unwrap().clone()
        }

        fn progress(&self) -> Vec<u8> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    BatchEvent::Progress { percent } => Some(percent),
                    _ => None,
                })
                .collect()
        }

        fn item_events(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| {
                    matches!(e, BatchEvent::ItemSucceeded { .. } | BatchEvent::ItemFailed { .. })
                })
                .count()
        }

        fn terminal_events(&self) -> Vec<BatchEvent> {
            self.events().into_iter().filter(BatchEvent::is_terminal).collect()
        }
    }

    impl EventSink for RecordingSink {
        fn on_event(&self, event: BatchEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn runner(mock: &MockTransport) -> BatchRunner {
        BatchRunner::new(Arc::new(mock.clone()), Handle::current()).with_poll_policy(PollPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(1),
        })
    }

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/imgs/{n}"))).collect()
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_going() {
        let mock = MockTransport::new();
        mock.succeed("one.png", "t1", &["http://r/one.png"]);
        mock.on_upload("two.png", MockUpload::Status(500));
        mock.succeed("three.jpg", "t3", &["http://r/three.png"]);

        let sink = Arc::new(RecordingSink::default());
        let handle = runner(&mock)
            .submit(files(&["one.png", "two.png", "three.jpg"]), ENDPOINT, Default::default(), sink.clone())
            .unwrap();

        let outcome = match handle.wait().await {
            BatchTerminal::Finished(outcome) => outcome,
            other => panic!("expected finished batch, got {other:?}"),
        };

        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.succeeded[0].source_path, PathBuf::from("/imgs/one.png"));
        assert_eq!(outcome.succeeded[1].source_path, PathBuf::from("/imgs/three.jpg"));
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].source_path, PathBuf::from("/imgs/two.png"));
        assert_eq!(outcome.failed[0].kind, ErrorKind::Transport);

        let events = sink.events();
        let order: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::ItemSucceeded { .. } => Some("ok"),
                BatchEvent::ItemFailed { .. } => Some("err"),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["ok", "err", "ok"]);
        assert_eq!(sink.progress(), vec![33, 66, 100]);
        assert_eq!(sink.terminal_events(), vec![BatchEvent::Finished { outcome }]);
        assert!(matches!(events.last(), Some(BatchEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn test_never_ready_is_a_timeout() {
        let mock = MockTransport::new();
        mock.on_upload("slow.png", MockUpload::Token("t1".to_string()));
        mock.on_poll("t1", MockPoll::Pending);

        let sink = Arc::new(RecordingSink::default());
        let handle =
            runner(&mock).submit(files(&["slow.png"]), ENDPOINT, Default::default(), sink.clone()).unwrap();
        let terminal = handle.wait().await;

        let outcome = terminal.outcome().unwrap();
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].kind, ErrorKind::Timeout);
        assert!(outcome.failed[0].message.contains("no result received"));
        assert_eq!(mock.poll_count(), 3);

        let failures = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, BatchEvent::ItemFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(sink.progress(), vec![100]);
    }

    #[tokio::test]
    async fn test_missing_token_is_protocol_failure() {
        let mock = MockTransport::new();
        mock.on_upload("a.png", MockUpload::MissingToken);

        let sink = Arc::new(RecordingSink::default());
        let terminal = runner(&mock)
            .submit(files(&["a.png"]), ENDPOINT, Default::default(), sink.clone())
            .unwrap()
            .wait()
            .await;

        let outcome = terminal.outcome().unwrap();
        assert_eq!(outcome.failed[0].kind, ErrorKind::Protocol);
        assert_eq!(mock.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected_without_network() {
        let mock = MockTransport::new();
        let sink = Arc::new(RecordingSink::default());

        let err = runner(&mock).submit(Vec::new(), ENDPOINT, Default::default(), sink.clone()).err();
        assert!(matches!(err, Some(SegmaskError::Validation(_))));
        assert_eq!(mock.connect_count(), 0);
        assert!(mock.calls().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_rejected() {
        let mock = MockTransport::new();
        let sink = Arc::new(RecordingSink::default());

        let err = runner(&mock)
            .submit(files(&["a.png", "b.gif"]), ENDPOINT, Default::default(), sink)
            .err();
        assert!(matches!(err, Some(SegmaskError::Validation(_))));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_limit_is_enforced() {
        let mock = MockTransport::new();
        let runner = runner(&mock).with_limits(RunnerLimits { max_batch_size: Some(1) });
        let sink = Arc::new(RecordingSink::default());

        let err = runner.submit(files(&["a.png", "b.png"]), ENDPOINT, Default::default(), sink).err();
        assert!(matches!(err, Some(SegmaskError::Validation(_))));
    }

    #[tokio::test]
    async fn test_second_submit_while_running_is_rejected() {
        let mock = MockTransport::new();
        mock.on_upload("a.png", MockUpload::Token("t1".to_string()));
        mock.on_poll("t1", MockPoll::Pending);
        let runner = BatchRunner::new(Arc::new(mock.clone()), Handle::current()).with_poll_policy(
            PollPolicy { max_attempts: 1000, interval: Duration::from_millis(5) },
        );

        let sink = Arc::new(RecordingSink::default());
        let handle = runner.submit(files(&["a.png"]), ENDPOINT, Default::default(), sink.clone()).unwrap();
        assert!(runner.is_running());

        let second = runner.submit(files(&["a.png"]), ENDPOINT, Default::default(), sink.clone());
        assert!(matches!(second, Err(SegmaskError::AlreadyRunning)));

        while mock.upload_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(runner.request_cancel());
        assert!(matches!(handle.wait().await, BatchTerminal::Cancelled(_)));
        assert_eq!(runner.state(), RunState::Cancelled);
        assert!(!runner.request_cancel());
        assert_eq!(mock.upload_count(), 1);

        // Interrupted mid-poll: the item is neither a success nor a failure.
        assert_eq!(sink.item_events(), 0);
        assert!(sink.progress().is_empty());
        assert_eq!(sink.terminal_events(), vec![BatchEvent::Cancelled]);
    }

    #[tokio::test]
    async fn test_zero_attempt_poll_policy_is_rejected() {
        let mock = MockTransport::new();
        let runner = BatchRunner::new(Arc::new(mock.clone()), Handle::current())
            .with_poll_policy(PollPolicy { max_attempts: 0, interval: Duration::from_millis(1) });
        let sink = Arc::new(RecordingSink::default());

        let err = runner.submit(files(&["a.png"]), ENDPOINT, Default::default(), sink.clone()).err();
        assert!(matches!(err, Some(SegmaskError::Validation(ref m)) if m.contains("max_attempts")));
        assert_eq!(mock.connect_count(), 0);
        assert!(sink.events().is_empty());
        assert_eq!(runner.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_after_first_item_stops_uploads() {
        let mock = MockTransport::new();
        mock.succeed("a.png", "t1", &["http://r/a.png"]);
        mock.succeed("b.png", "t2", &["http://r/b.png"]);
        mock.succeed("c.png", "t3", &["http://r/c.png"]);

        let cancel_slot: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
        let recorder = Arc::new(RecordingSink::default());
        let sink = {
            let cancel_slot = Arc::clone(&cancel_slot);
            let recorder = Arc::clone(&recorder);
            move |event: BatchEvent| {
                if matches!(event, BatchEvent::ItemSucceeded { index: 0, .. }) {
                    if let Some(token) = cancel_slot.lock().unwrap().as_ref() {
                        token.cancel();
                    }
                }
                recorder.on_event(event);
            }
        };

        let runner = runner(&mock);
        // Hold the slot lock until the token is stored so the sink cannot miss it.
        let handle = {
            let mut slot = cancel_slot.lock().unwrap();
            let handle = runner
                .submit(files(&["a.png", "b.png", "c.png"]), ENDPOINT, Default::default(), Arc::new(sink))
                .unwrap();
            *slot = Some(handle.cancellation_token());
            handle
        };

        let outcome = match handle.wait().await {
            BatchTerminal::Cancelled(outcome) => outcome,
            other => panic!("expected cancelled batch, got {other:?}"),
        };
        assert_eq!(outcome.succeeded.len(), 1);
        assert_eq!(mock.upload_count(), 1);
        assert_eq!(recorder.item_events(), 1);
        assert_eq!(recorder.terminal_events(), vec![BatchEvent::Cancelled]);
        assert_eq!(runner.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_session_closed_once_per_batch() {
        let mock = MockTransport::new();
        mock.succeed("a.png", "t1", &["http://r/a.png"]);
        let runner = runner(&mock);

        for _ in 0..2 {
            let sink = Arc::new(RecordingSink::default());
            let handle =
                runner.submit(files(&["a.png"]), ENDPOINT, Default::default(), sink).unwrap();
            handle.wait().await;
        }

        assert_eq!(mock.connect_count(), 2);
        assert_eq!(mock.close_count(), 2);
        assert_eq!(runner.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_all_failed_still_finishes() {
        let mock = MockTransport::new();
        mock.on_upload("a.png", MockUpload::Status(503));
        mock.on_upload("b.png", MockUpload::Status(404));

        let sink = Arc::new(RecordingSink::default());
        let terminal = runner(&mock)
            .submit(files(&["a.png", "b.png"]), ENDPOINT, Default::default(), sink.clone())
            .unwrap()
            .wait()
            .await;

        let outcome = match terminal {
            BatchTerminal::Finished(outcome) => outcome,
            other => panic!("expected finished batch, got {other:?}"),
        };
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(sink.terminal_events().len(), 1);
        assert_eq!(sink.progress(), vec![50, 100]);
    }

    #[tokio::test]
    async fn test_parameters_sent_with_every_upload() {
        let mock = MockTransport::new();
        mock.succeed("a.png", "t1", &["http://r/a.png"]);
        mock.succeed("b.png", "t2", &["http://r/b.png"]);
        let params = ProcessingParameters::new(4, -3, true).unwrap();

        runner(&mock)
            .submit(files(&["a.png", "b.png"]), ENDPOINT, params, Arc::new(RecordingSink::default()))
            .unwrap()
            .wait()
            .await;

        let uploads: Vec<_> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Upload { parameters, endpoint, .. } => Some((parameters, endpoint)),
                MockCall::Poll { .. } => None,
            })
            .collect();
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|(p, e)| *p == params && e == ENDPOINT));
    }

    struct BrokenFactory;

    impl TransportFactory for BrokenFactory {
        fn connect(&self) -> SegmaskResult<Arc<dyn Transport>> {
            Err(SegmaskError::Config("no TLS backend".to_string()))
        }
    }

    #[tokio::test]
    async fn test_session_failure_is_fatal() {
        let runner = BatchRunner::new(Arc::new(BrokenFactory), Handle::current());
        let sink = Arc::new(RecordingSink::default());

        let terminal =
            runner.submit(files(&["a.png"]), ENDPOINT, Default::default(), sink.clone()).unwrap().wait().await;

        assert!(matches!(terminal, BatchTerminal::Failed(ref msg) if msg.contains("no TLS backend")));
        assert_eq!(runner.state(), RunState::Failed);
        assert_eq!(sink.terminal_events().len(), 1);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 3), 33);
        assert_eq!(progress_percent(1, 3), 66);
        assert_eq!(progress_percent(2, 3), 100);
        assert_eq!(progress_percent(0, 1), 100);
        assert_eq!(progress_percent(0, 0), 0);
    }
}
