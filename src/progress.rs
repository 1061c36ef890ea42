//! Progress reporting and cooperative cancellation.
//!
//! Long-running entry points take two injected collaborators instead of
//! talking to any UI directly:
//! - a [`ProgressSink`] that receives [`ProgressState`] snapshots
//! - a [`Stop`] implementation polled once per scan row
//!
//! Pass [`NoProgress`] and [`Unstoppable`] when neither is needed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

// ============================================================================
// Progress
// ============================================================================

/// Snapshot pushed to observers while a stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    /// Units processed so far (pixels for scans, keys for densification).
    pub processed: u64,
    /// Units in the whole stage.
    pub total: u64,
    /// Stage label, e.g. `"scan"` or `"apply"`.
    pub status: String,
}

impl ProgressState {
    /// Completion in percent, 100 for an empty stage.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }
}

/// Receiver of progress snapshots.
pub trait ProgressSink: Send + Sync {
    /// Called with every emitted snapshot, in non-decreasing `processed` order.
    fn report(&self, state: &ProgressState);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressState) + Send + Sync,
{
    fn report(&self, state: &ProgressState) {
        self(state)
    }
}

/// Sink that drops every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _state: &ProgressState) {}
}

/// Throttles progress emission to a fixed fraction of the stage total.
///
/// Guarantees monotonic `processed` values and a final snapshot with
/// `processed == total`.
pub struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    status: String,
    total: u64,
    interval: u64,
    next_emit: u64,
    last_emitted: Option<u64>,
}

impl<'a> ProgressReporter<'a> {
    /// Create a reporter emitting roughly every `interval_permille / 1000` of `total`.
    pub fn new(
        sink: &'a dyn ProgressSink,
        status: impl Into<String>,
        total: u64,
        interval_permille: u32,
    ) -> Self {
        let interval = (total.saturating_mul(interval_permille.max(1) as u64) / 1000).max(1);
        Self {
            sink,
            status: status.into(),
            total,
            interval,
            next_emit: interval,
            last_emitted: None,
        }
    }

    /// Record that `processed` units are done; emits when the next threshold is crossed.
    pub fn update(&mut self, processed: u64) {
        let processed = processed.min(self.total);
        if processed < self.next_emit || processed >= self.total {
            return;
        }
        self.emit(processed);
        self.next_emit = (processed / self.interval + 1) * self.interval;
    }

    /// Emit the closing `processed == total` snapshot.
    pub fn finish(&mut self) {
        self.emit(self.total);
    }

    fn emit(&mut self, processed: u64) {
        if self.last_emitted.is_some_and(|last| processed < last) {
            return;
        }
        if self.last_emitted == Some(processed) && processed != self.total {
            return;
        }
        self.last_emitted = Some(processed);
        self.sink.report(&ProgressState {
            processed,
            total: self.total,
            status: self.status.clone(),
        });
    }
}

// ============================================================================
// Cancellation
// ============================================================================

pub use enough::{Stop, StopReason, Unstoppable};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it on its next check.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Stop for CancelToken {
    fn check(&self) -> Result<(), StopReason> {
        if self.is_cancelled() {
            Err(StopReason::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Run control
// ============================================================================

/// Collaborators handed to every long-running entry point.
#[derive(Clone, Copy)]
pub struct RunControl<'a> {
    /// Polled once per row.
    pub stop: &'a (dyn Stop + Sync),
    /// Receives throttled progress snapshots.
    pub progress: &'a dyn ProgressSink,
    /// Progress cadence in per-mille of the stage total.
    pub interval_permille: u32,
}

impl<'a> RunControl<'a> {
    /// Control with the default cadence of one snapshot per 0.1%.
    pub fn new(stop: &'a (dyn Stop + Sync), progress: &'a dyn ProgressSink) -> Self {
        Self {
            stop,
            progress,
            interval_permille: 1,
        }
    }

    /// Override the progress cadence.
    pub fn with_interval(mut self, interval_permille: u32) -> Self {
        self.interval_permille = interval_permille;
        self
    }

    /// Start a throttled reporter for one stage.
    pub fn reporter(&self, status: &str, total: u64) -> ProgressReporter<'a> {
        ProgressReporter::new(self.progress, status, total, self.interval_permille)
    }
}

impl RunControl<'static> {
    /// Never stops and reports nowhere.
    pub fn unattended() -> Self {
        Self::new(&Unstoppable, &NoProgress)
    }
}

impl fmt::Debug for RunControl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("interval_permille", &self.interval_permille)
            .finish_non_exhaustive()
    }
}
