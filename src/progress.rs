//! Progress protocol shared by build, extract, validate and restore
//!
//! Every long-running operation reports through a [`ProgressReporter`], which
//! guarantees the two properties callers rely on:
//!
//! - `InProgress.processed_count` never decreases
//! - exactly one terminal event (`Completed` or `Error`) is delivered
//!
//! Callers receive events through any `FnMut(ProgressEvent)`. To consume an
//! operation as an iterator instead, run it through [`progress_channel`] and
//! iterate the returned [`ProgressStream`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// One event in an operation's progress stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    InProgress {
        processed_count: usize,
        total_count: usize,
        current_item: String,
        /// 0.0..=1.0
        fraction: f64,
    },
    Completed {
        count: usize,
        total_bytes: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_path: Option<PathBuf>,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::InProgress { .. })
    }
}

/// Enforces ordering and single-termination on top of a raw event sink
pub struct ProgressReporter<'a> {
    sink: &'a mut dyn FnMut(ProgressEvent),
    last_processed: usize,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        Self {
            sink,
            last_processed: 0,
            finished: false,
        }
    }

    /// Report that `processed` of `total` items are done
    ///
    /// A `processed` value lower than one already reported is raised to the
    /// previous value so the stream stays monotonic.
    pub fn advance(&mut self, processed: usize, total: usize, current_item: impl Into<String>) {
        if self.finished {
            tracing::debug!("progress event after terminal event dropped");
            return;
        }

        let processed = processed.max(self.last_processed);
        self.last_processed = processed;

        let fraction = if total > 0 {
            (processed as f64 / total as f64).min(1.0)
        } else {
            1.0
        };

        (self.sink)(ProgressEvent::InProgress {
            processed_count: processed,
            total_count: total,
            current_item: current_item.into(),
            fraction,
        });
    }

    /// Emit the `Completed` terminal event
    pub fn complete(&mut self, count: usize, total_bytes: u64, output_path: Option<PathBuf>) {
        self.finish(ProgressEvent::Completed {
            count,
            total_bytes,
            output_path,
        });
    }

    /// Emit the `Error` terminal event
    pub fn fail(&mut self, message: impl Into<String>) {
        self.finish(ProgressEvent::Error {
            message: message.into(),
        });
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, event: ProgressEvent) {
        if self.finished {
            tracing::debug!(?event, "second terminal event dropped");
            return;
        }
        self.finished = true;
        (self.sink)(event);
    }
}

/// Shared cancellation flag, checked only at safe boundaries
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Iterator over the events of an operation running on another thread
///
/// Ends after the terminal event, or when the producing side is dropped.
pub struct ProgressStream {
    receiver: Receiver<ProgressEvent>,
    done: bool,
}

impl Iterator for ProgressStream {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let event = self.receiver.recv().ok()?;
        if event.is_terminal() {
            self.done = true;
        }
        Some(event)
    }
}

/// Sending half of a progress channel
#[derive(Clone)]
pub struct ProgressSender {
    sender: Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Forward one event; a disconnected receiver is ignored
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

/// Create an ordered event channel
pub fn progress_channel() -> (ProgressSender, ProgressStream) {
    let (sender, receiver) = mpsc::channel();
    (
        ProgressSender { sender },
        ProgressStream {
            receiver,
            done: false,
        },
    )
}
