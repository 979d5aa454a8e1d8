//! Events delivered to the presentation layer.
//!
//! The runner never touches UI code. It pushes [`BatchEvent`]s into an
//! [`EventSink`]; front ends either implement the trait directly or consume
//! the channel returned by [`channel`].

use crate::outcome::{BatchOutcome, ItemFailure, ItemResult};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started { total: usize },
    /// Overall progress, 0-100, non-decreasing within a batch.
    Progress { percent: u8 },
    ItemSucceeded { index: usize, result: ItemResult },
    ItemFailed { index: usize, failure: ItemFailure },
    Finished { outcome: BatchOutcome },
    Cancelled,
    /// The run aborted on an unrecoverable error.
    Failed { message: String },
}

impl BatchEvent {
    /// Whether this event ends the batch lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Cancelled | Self::Failed { .. })
    }
}

pub trait EventSink: Send + Sync {
    fn on_event(&self, event: BatchEvent);
}

impl<F> EventSink for F
where
    F: Fn(BatchEvent) + Send + Sync,
{
    fn on_event(&self, event: BatchEvent) {
        self(event);
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<BatchEvent>,
}

impl EventSink for ChannelEventSink {
    fn on_event(&self, event: BatchEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

pub fn channel() -> (ChannelEventSink, mpsc::UnboundedReceiver<BatchEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelEventSink { tx }, rx)
}
