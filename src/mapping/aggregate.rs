//! Reduction of samples to a sparse [`Mapping`].
//!
//! All per-key state is integer counts and sums, so partial accumulators
//! merged in any order produce the same mapping. The parallel build relies
//! on this to match the sequential build bit for bit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::table::{Mapping, MappingEntry, LUT_SIZE};
use crate::error::Result;
use crate::progress::RunControl;
use crate::sampling::{scan_samples_as, ImageSet, Sample, SampleMode, SCAN_STAGE};

/// How the targets observed for one original value are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    /// Arithmetic mean, rounded half away from zero.
    #[default]
    Mean,
    /// Lower median.
    Median,
    /// Most frequent target; ties go to the smallest target.
    Majority,
}

impl AggregateKind {
    fn needs_tallies(self) -> bool {
        !matches!(self, AggregateKind::Mean)
    }
}

/// Mergeable per-key accumulator.
#[derive(Debug, Clone)]
pub struct MappingAccumulator {
    kind: AggregateKind,
    counts: Vec<u64>,
    sums: Vec<u64>,
    min_target: Vec<u16>,
    max_target: Vec<u16>,
    /// `(original, target) -> occurrences`, only for median/majority.
    tallies: BTreeMap<(u16, u16), u64>,
    saturated: bool,
}

impl MappingAccumulator {
    pub fn new(kind: AggregateKind) -> Self {
        Self {
            kind,
            counts: vec![0; LUT_SIZE],
            sums: vec![0; LUT_SIZE],
            min_target: vec![u16::MAX; LUT_SIZE],
            max_target: vec![0; LUT_SIZE],
            tallies: BTreeMap::new(),
            saturated: false,
        }
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    /// Record one `(original, target)` observation.
    #[inline]
    pub fn observe(&mut self, original: u16, target: u16) {
        let k = original as usize;
        self.counts[k] += 1;
        match self.sums[k].checked_add(target as u64) {
            Some(s) => self.sums[k] = s,
            None => self.saturated = true,
        }
        self.min_target[k] = self.min_target[k].min(target);
        self.max_target[k] = self.max_target[k].max(target);
        if self.kind.needs_tallies() {
            *self.tallies.entry((original, target)).or_insert(0) += 1;
        }
    }

    /// Record a sample's original/target pair.
    #[inline]
    pub fn observe_sample(&mut self, sample: &Sample) {
        self.observe(sample.original, sample.target);
    }

    /// Fold another accumulator into this one. Commutative and associative.
    pub fn merge(&mut self, other: &MappingAccumulator) {
        for k in 0..LUT_SIZE {
            if other.counts[k] == 0 {
                continue;
            }
            self.counts[k] += other.counts[k];
            match self.sums[k].checked_add(other.sums[k]) {
                Some(s) => self.sums[k] = s,
                None => self.saturated = true,
            }
            self.min_target[k] = self.min_target[k].min(other.min_target[k]);
            self.max_target[k] = self.max_target[k].max(other.max_target[k]);
        }
        for (&key, &n) in &other.tallies {
            *self.tallies.entry(key).or_insert(0) += n;
        }
        self.saturated |= other.saturated;
    }

    /// Total observations.
    pub fn sample_count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Reduce to a sparse mapping over the observed keys.
    pub fn finish(&self) -> Mapping {
        let mut entries = Vec::new();
        for k in 0..LUT_SIZE {
            let count = self.counts[k];
            if count == 0 {
                continue;
            }
            let original = k as u16;
            let target = match self.kind {
                AggregateKind::Mean => rounded_mean(self.sums[k], count),
                AggregateKind::Median => self.lower_median(original, count),
                AggregateKind::Majority => self.majority(original),
            };
            entries.push(MappingEntry {
                original,
                target,
                count,
                min_target: self.min_target[k],
                max_target: self.max_target[k],
            });
        }

        if self.saturated {
            warn!("target sums saturated while aggregating; means are approximate");
        }
        debug!(
            keys = entries.len(),
            kind = ?self.kind,
            "mapping aggregated"
        );
        Mapping::from_sorted(entries, self.saturated)
    }

    fn targets_of(&self, original: u16) -> impl Iterator<Item = (u16, u64)> + '_ {
        self.tallies
            .range((original, 0)..=(original, u16::MAX))
            .map(|(&(_, t), &n)| (t, n))
    }

    fn lower_median(&self, original: u16, count: u64) -> u16 {
        let rank = (count - 1) / 2;
        let mut seen = 0u64;
        for (target, n) in self.targets_of(original) {
            seen += n;
            if seen > rank {
                return target;
            }
        }
        self.max_target[original as usize]
    }

    fn majority(&self, original: u16) -> u16 {
        let mut best = (self.min_target[original as usize], 0u64);
        for (target, n) in self.targets_of(original) {
            if n > best.1 {
                best = (target, n);
            }
        }
        best.0
    }
}

/// `sum / count` rounded half away from zero (all terms are non-negative).
#[inline]
fn rounded_mean(sum: u64, count: u64) -> u16 {
    let q = match sum.checked_mul(2).and_then(|s| s.checked_add(count)) {
        Some(twice) => twice / (2 * count),
        None => (sum as f64 / count as f64).round() as u64,
    };
    q.min(u16::MAX as u64) as u16
}

// ============================================================================
// Builders
// ============================================================================

/// Aggregate an in-memory sample list.
///
/// An empty list yields an empty mapping; [`super::densify`] rejects it.
pub fn build_mapping(samples: &[Sample], kind: AggregateKind) -> Mapping {
    let mut acc = MappingAccumulator::new(kind);
    for s in samples {
        acc.observe_sample(s);
    }
    acc.finish()
}

/// Aggregate directly from rasters, without materializing samples.
///
/// With `parallel` set, rows are distributed over the rayon pool; each row
/// checks cancellation before it starts and adds its sample count to a
/// shared progress counter. The result is identical to the sequential build.
///
/// # Arguments
/// * `images` - Validated rasters
/// * `mode` - Exhaustive or grid
/// * `kind` - Aggregate used per key
/// * `control` - Stop flag and progress sink
/// * `parallel` - Use the rayon pool
/// * `stage` - Progress status for this pass, e.g. [`SCAN_STAGE`]
pub fn build_mapping_from_images(
    images: &ImageSet<'_>,
    mode: SampleMode,
    kind: AggregateKind,
    control: &RunControl<'_>,
    parallel: bool,
    stage: &str,
) -> Result<Mapping> {
    let acc = if parallel {
        accumulate_parallel(images, mode, kind, control, stage)?
    } else {
        let mut acc = MappingAccumulator::new(kind);
        scan_samples_as(images, mode, control, stage, |s| {
            acc.observe_sample(s);
            Ok(())
        })?;
        acc
    };
    Ok(acc.finish())
}

fn accumulate_parallel(
    images: &ImageSet<'_>,
    mode: SampleMode,
    kind: AggregateKind,
    control: &RunControl<'_>,
    stage: &str,
) -> Result<MappingAccumulator> {
    let step = mode.step();
    let width = images.width();
    let total = mode.sample_count(width, images.height());
    let per_row = width.div_ceil(step) as u64;
    let rows: Vec<usize> = (0..images.height()).step_by(step).collect();

    let processed = AtomicU64::new(0);
    let reporter = Mutex::new(control.reporter(stage, total));

    let acc = rows
        .par_iter()
        .try_fold(
            || MappingAccumulator::new(kind),
            |mut acc, &y| -> Result<MappingAccumulator> {
                control.stop.check()?;
                for x in (0..width).step_by(step) {
                    acc.observe_sample(&images.sample_at(y, x));
                }
                let done = processed.fetch_add(per_row, Ordering::Relaxed) + per_row;
                if let Ok(mut r) = reporter.lock() {
                    r.update(done);
                }
                Ok(acc)
            },
        )
        .try_reduce(
            || MappingAccumulator::new(kind),
            |mut a, b| {
                a.merge(&b);
                Ok(a)
            },
        )?;

    if let Ok(mut r) = reporter.into_inner() {
        r.finish();
    }
    Ok(acc)
}
