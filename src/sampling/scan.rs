//! Row-major scans over an [`ImageSet`].

use std::collections::VecDeque;

use tracing::debug;

use super::sample::{ImageSet, Sample, SampleMode};
use crate::error::Result;
use crate::progress::RunControl;

// ============================================================================
// Lazy iterator
// ============================================================================

/// Iterator over the samples of an image set in row-major order.
///
/// Neither reports progress nor checks cancellation; use [`scan_samples`]
/// for long scans.
#[derive(Debug, Clone)]
pub struct SampleStream<'a> {
    images: ImageSet<'a>,
    step: usize,
    x: usize,
    y: usize,
    remaining: u64,
}

impl<'a> SampleStream<'a> {
    pub fn new(images: ImageSet<'a>, mode: SampleMode) -> Self {
        let remaining = mode.sample_count(images.width(), images.height());
        Self {
            images,
            step: mode.step(),
            x: 0,
            y: 0,
            remaining,
        }
    }
}

impl Iterator for SampleStream<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.remaining == 0 {
            return None;
        }
        let sample = self.images.sample_at(self.y, self.x);
        self.remaining -= 1;
        self.x += self.step;
        if self.x >= self.images.width() {
            self.x = 0;
            self.y += self.step;
        }
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

// ============================================================================
// Visitor scan
// ============================================================================

/// Progress status reported by the main original/target scan.
pub const SCAN_STAGE: &str = "scan";

/// Visit every sample selected by `mode`, row by row, reporting progress
/// under [`SCAN_STAGE`].
///
/// Cancellation is checked at the start of each row and progress is reported
/// after each row, throttled to `control.interval_permille`.
///
/// # Arguments
/// * `images` - Validated original/target (and optional enhanced) rasters
/// * `mode` - Exhaustive or grid
/// * `control` - Stop flag and progress sink
/// * `visit` - Called once per sample; an `Err` aborts the scan
///
/// # Returns
/// Number of samples visited.
pub fn scan_samples<F>(
    images: &ImageSet<'_>,
    mode: SampleMode,
    control: &RunControl<'_>,
    visit: F,
) -> Result<u64>
where
    F: FnMut(&Sample) -> Result<()>,
{
    scan_samples_as(images, mode, control, SCAN_STAGE, visit)
}

/// [`scan_samples`] with its own progress status, for secondary passes.
pub fn scan_samples_as<F>(
    images: &ImageSet<'_>,
    mode: SampleMode,
    control: &RunControl<'_>,
    stage: &str,
    mut visit: F,
) -> Result<u64>
where
    F: FnMut(&Sample) -> Result<()>,
{
    let step = mode.step();
    let total = mode.sample_count(images.width(), images.height());
    let mut reporter = control.reporter(stage, total);
    let mut visited = 0u64;

    for y in (0..images.height()).step_by(step) {
        control.stop.check()?;
        for x in (0..images.width()).step_by(step) {
            visit(&images.sample_at(y, x))?;
            visited += 1;
        }
        reporter.update(visited);
    }

    reporter.finish();
    debug!(visited, step, stage, "scan complete");
    Ok(visited)
}

/// Collect every sample selected by `mode` into a vector.
pub fn extract_samples(
    images: &ImageSet<'_>,
    mode: SampleMode,
    control: &RunControl<'_>,
) -> Result<Vec<Sample>> {
    let capacity = usize::try_from(mode.sample_count(images.width(), images.height())).unwrap_or(0);
    let mut samples = Vec::with_capacity(capacity);
    scan_samples(images, mode, control, |s| {
        samples.push(*s);
        Ok(())
    })?;
    Ok(samples)
}

// ============================================================================
// Bounded log
// ============================================================================

/// Keeps the first and last `cap` samples of a scan plus the total count.
#[derive(Debug, Clone, Default)]
pub struct SampleLog {
    cap: usize,
    head: Vec<Sample>,
    tail: VecDeque<Sample>,
    total: u64,
}

impl SampleLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            head: Vec::with_capacity(cap.min(4096)),
            tail: VecDeque::with_capacity(cap.min(4096)),
            total: 0,
        }
    }

    pub fn push(&mut self, sample: &Sample) {
        self.total += 1;
        if self.head.len() < self.cap {
            self.head.push(*sample);
            return;
        }
        if self.cap == 0 {
            return;
        }
        if self.tail.len() == self.cap {
            self.tail.pop_front();
        }
        self.tail.push_back(*sample);
    }

    /// Samples seen first, in scan order.
    pub fn first(&self) -> &[Sample] {
        &self.head
    }

    /// Samples seen last, in scan order. Never overlaps [`SampleLog::first`].
    pub fn last(&self) -> impl Iterator<Item = &Sample> {
        self.tail.iter()
    }

    /// Samples pushed in total.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// True when samples between the first and last window were dropped.
    pub fn is_truncated(&self) -> bool {
        self.total > (self.head.len() + self.tail.len()) as u64
    }
}
