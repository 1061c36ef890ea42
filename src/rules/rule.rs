//! Processing rules, their application and the statistics they record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ndarray::{Array2, ArrayView2, ArrayViewMut1};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use super::transform::{RuleKind, RuleParameters, Transform};
use crate::error::{Error, Result};
use crate::image::Region;
use crate::progress::RunControl;
use crate::sampling::Sample;
use crate::stats::{RunningStats, SafeSum};

/// Before/after statistics of one rule application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStatistics {
    pub processed_count: u64,
    pub average_change: f64,
    pub min_change: i32,
    pub max_change: i32,
    pub change_std_dev: f64,
    pub before_mean: f64,
    pub after_mean: f64,
    pub elapsed: Duration,
    /// A sum or variance hit its ceiling; values are approximate.
    pub saturated: bool,
}

/// A named transform with an optional region, plus what its last
/// application recorded.
#[derive(Debug, Clone)]
pub struct ProcessingRule {
    /// Assigned by [`RuleHistory::push`]; 0 until then.
    pub id: u64,
    pub name: String,
    pub transform: Option<Transform>,
    /// Defaults to the whole image.
    pub region: Option<Region>,
    /// Written once per successful application.
    pub statistics: Option<ProcessingStatistics>,
    /// First `detail_cap` pixels of the last application, as before/after samples.
    pub pixel_details: Option<Vec<Sample>>,
    /// Per-pixel details to keep; 0 disables them.
    pub detail_cap: usize,
}

impl ProcessingRule {
    pub fn new(name: impl Into<String>, transform: Transform) -> Self {
        Self {
            id: 0,
            name: name.into(),
            transform: Some(transform),
            region: None,
            statistics: None,
            pixel_details: None,
            detail_cap: 0,
        }
    }

    /// Rule without a transform yet. Applying it fails with `InvalidRule`.
    pub fn unset(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            transform: None,
            region: None,
            statistics: None,
            pixel_details: None,
            detail_cap: 0,
        }
    }

    /// Restrict application to a region.
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Keep up to `cap` per-pixel changes.
    pub fn with_details(mut self, cap: usize) -> Self {
        self.detail_cap = cap;
        self
    }

    pub fn kind(&self) -> Option<RuleKind> {
        self.transform.as_ref().map(Transform::kind)
    }

    pub fn parameters(&self) -> Option<RuleParameters> {
        self.transform.as_ref().map(Transform::parameters)
    }
}

/// Apply a rule to an image, returning a new buffer.
///
/// Pixels outside the rule's region are copied unchanged; a region partly
/// outside the image is clipped. Rows are transformed on the rayon pool and
/// their statistics merged in row order, so results do not depend on
/// scheduling. Cancellation is checked once per row and a cancelled
/// application leaves the rule's statistics untouched.
///
/// # Arguments
/// * `image` - Source raster, never modified
/// * `rule` - Rule to apply; receives statistics and pixel details
/// * `control` - Stop flag and progress sink
///
/// # Returns
/// The transformed copy, `InvalidRule` without a transform, or
/// `InvalidRegion` when the region misses the image entirely.
pub fn apply_rule(
    image: ArrayView2<'_, u16>,
    rule: &mut ProcessingRule,
    control: &RunControl<'_>,
) -> Result<Array2<u16>> {
    let transform = rule
        .transform
        .as_ref()
        .ok_or_else(|| Error::InvalidRule(rule.name.clone()))?;

    let (height, width) = image.dim();
    let (rows, cols) = match rule.region {
        None => (0..height, 0..width),
        Some(region) => region.clip(width, height).ok_or(Error::InvalidRegion {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            image_width: width,
            image_height: height,
        })?,
    };

    let start = Instant::now();
    let table = transform.to_lut();
    let mut output = image.to_owned();

    let width_in = cols.len();
    let total = (rows.len() * width_in) as u64;
    let first_row = rows.start;
    let cap = rule.detail_cap;
    let done = AtomicU64::new(0);
    let reporter = Mutex::new(control.reporter("apply", total));

    let targets: Vec<(usize, ArrayViewMut1<'_, u16>)> = output
        .outer_iter_mut()
        .enumerate()
        .filter(|(y, _)| rows.contains(y))
        .collect();

    // Rows run on the rayon pool; partials are merged in row order afterwards
    let partials: Vec<RowPartial> = targets
        .into_par_iter()
        .map(|(y, mut row)| -> Result<RowPartial> {
            control.stop.check()?;
            let keep = cap.saturating_sub((y - first_row) * width_in).min(width_in);
            let mut part = RowPartial::new(keep);
            for x in cols.clone() {
                let v = image[[y, x]];
                let t = table.get(v);
                row[x] = t;
                part.observe(x, y, v, t);
            }
            let processed = done.fetch_add(width_in as u64, Ordering::Relaxed) + width_in as u64;
            if let Ok(mut r) = reporter.lock() {
                r.update(processed);
            }
            Ok(part)
        })
        .collect::<Result<_>>()?;

    if let Ok(mut r) = reporter.into_inner() {
        r.finish();
    }

    let mut change = RunningStats::new();
    let mut before = SafeSum::new();
    let mut after = SafeSum::new();
    let mut details = Vec::with_capacity(cap.min(4096));
    for part in &partials {
        change.merge(&part.change);
        before.merge(&part.before);
        after.merge(&part.after);
        details.extend_from_slice(&part.details);
    }
    let processed = change.count();

    let std_dev = change.std_dev();
    let before_mean = before.mean();
    let after_mean = after.mean();
    let saturated = std_dev.saturated || before_mean.saturated || after_mean.saturated;
    if saturated {
        warn!(rule = %rule.name, "statistics saturated; values are approximate");
    }

    let statistics = ProcessingStatistics {
        processed_count: processed,
        average_change: change.mean(),
        min_change: change.min() as i32,
        max_change: change.max() as i32,
        change_std_dev: std_dev.value,
        before_mean: before_mean.value,
        after_mean: after_mean.value,
        elapsed: start.elapsed(),
        saturated,
    };
    debug!(
        rule = %rule.name,
        processed,
        average_change = statistics.average_change,
        "rule applied"
    );

    rule.statistics = Some(statistics);
    rule.pixel_details = (rule.detail_cap > 0).then_some(details);
    Ok(output)
}

/// Statistics of one row, merged into the rule totals in row order.
struct RowPartial {
    change: RunningStats,
    before: SafeSum,
    after: SafeSum,
    details: Vec<Sample>,
    keep: usize,
}

impl RowPartial {
    fn new(keep: usize) -> Self {
        Self {
            change: RunningStats::new(),
            before: SafeSum::new(),
            after: SafeSum::new(),
            details: Vec::with_capacity(keep),
            keep,
        }
    }

    #[inline]
    fn observe(&mut self, x: usize, y: usize, v: u16, t: u16) {
        self.change.push(t as f64 - v as f64);
        self.before.add(v as i64);
        self.after.add(t as i64);
        if self.details.len() < self.keep {
            self.details.push(Sample::new(x as u32, y as u32, v, t));
        }
    }
}

// ============================================================================
// History
// ============================================================================

/// Ordered list of rules; assigns ids on insertion.
#[derive(Debug, Clone, Default)]
pub struct RuleHistory {
    rules: Vec<ProcessingRule>,
    next_id: u64,
}

impl RuleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule and return its new id (starting at 1).
    pub fn push(&mut self, mut rule: ProcessingRule) -> u64 {
        self.next_id += 1;
        rule.id = self.next_id;
        self.rules.push(rule);
        self.next_id
    }

    pub fn get(&self, id: u64) -> Option<&ProcessingRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ProcessingRule> {
        self.rules.iter_mut().find(|r| r.id == id)
    }

    /// Remove a rule; ids of the others are unchanged.
    pub fn remove(&mut self, id: u64) -> Option<ProcessingRule> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(pos))
    }

    pub fn rules(&self) -> &[ProcessingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order, each to the previous rule's output.
    pub fn apply_all(
        &mut self,
        image: ArrayView2<'_, u16>,
        control: &RunControl<'_>,
    ) -> Result<Array2<u16>> {
        let mut current = image.to_owned();
        for rule in &mut self.rules {
            current = apply_rule(current.view(), rule, control)?;
        }
        Ok(current)
    }
}
