use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::info;

/// Job-wide count of images that are done (written, resumed or skipped).
/// Cloning shares the same counter.
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    done: Arc<AtomicUsize>,
    total: usize,
}

impl ProgressCounter {
    pub fn new(total: usize) -> Self {
        Self {
            done: Arc::new(AtomicUsize::new(0)),
            total,
        }
    }

    /// Adds one and returns the new value.
    pub fn increment(&self) -> usize {
        self.done.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            done: self.done.load(Ordering::Acquire),
            total: self.total,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub done: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.done as f64 * 100.0 / self.total as f64
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} complete ({:.1}%)",
            self.done,
            self.total,
            self.percent()
        )
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: ProgressSnapshot);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _snapshot: ProgressSnapshot) {}
}

/// Renders progress through the `log` facade.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, snapshot: ProgressSnapshot) {
        info!("Progress: {}", snapshot);
    }
}

/// Polls a [`ProgressCounter`] at a fixed interval while workers run.
pub struct ProgressMonitor {
    counter: ProgressCounter,
    interval: Duration,
}

impl ProgressMonitor {
    pub fn new(counter: ProgressCounter, interval: Duration) -> Self {
        Self { counter, interval }
    }

    /// Renders progress until `expected` completion messages have arrived on
    /// `finished` or every sender is gone. Returns the messages in arrival
    /// order.
    pub fn run<T>(
        &self,
        finished: &Receiver<T>,
        expected: usize,
        reporter: &dyn ProgressReporter,
    ) -> Vec<T> {
        let mut received = Vec::with_capacity(expected);
        let mut last_done = None;

        while received.len() < expected {
            let snapshot = self.counter.snapshot();
            if last_done != Some(snapshot.done) {
                reporter.report(snapshot);
                last_done = Some(snapshot.done);
            }

            match finished.recv_timeout(self.interval) {
                Ok(message) => received.push(message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let snapshot = self.counter.snapshot();
        if last_done != Some(snapshot.done) || !snapshot.is_complete() {
            reporter.report(snapshot);
        }

        received
    }
}
