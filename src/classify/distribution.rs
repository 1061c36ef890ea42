//! How samples spread over the mapping and over the image.
//!
//! A global tone curve maps every original value to a single target. When
//! many keys map to several targets, and those targets differ a lot, the
//! output depends on pixel neighbourhoods as well (local contrast, Retinex).

use std::collections::BTreeSet;

use serde::Serialize;

use crate::mapping::Mapping;
use crate::sampling::Sample;
use crate::stats::RunningStats;

/// Key-level statistics of a mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingDistribution {
    /// Distinct original values observed.
    pub unique_originals: usize,
    /// Distinct aggregated target values.
    pub unique_targets: usize,
    /// Keys that only ever produced one target.
    pub one_to_one: usize,
    /// Keys that produced more than one target.
    pub one_to_many: usize,
    /// Mean of `max_target - min_target` over all keys.
    pub mean_spread: f64,
    /// Largest `max_target - min_target`.
    pub max_spread: u16,
    /// Samples behind the mapping.
    pub sample_count: u64,
}

impl MappingDistribution {
    /// Share of keys with more than one target, 0 for an empty mapping.
    pub fn one_to_many_fraction(&self) -> f64 {
        if self.unique_originals == 0 {
            0.0
        } else {
            self.one_to_many as f64 / self.unique_originals as f64
        }
    }
}

/// Summarize one-to-one versus one-to-many behaviour of a mapping.
pub fn mapping_distribution(mapping: &Mapping) -> MappingDistribution {
    let entries = mapping.entries();
    let targets: BTreeSet<u16> = entries.iter().map(|e| e.target).collect();
    let one_to_many = entries.iter().filter(|e| e.is_one_to_many()).count();
    let spread_sum: u64 = entries.iter().map(|e| e.spread() as u64).sum();

    MappingDistribution {
        unique_originals: entries.len(),
        unique_targets: targets.len(),
        one_to_one: entries.len() - one_to_many,
        one_to_many,
        mean_spread: if entries.is_empty() {
            0.0
        } else {
            spread_sum as f64 / entries.len() as f64
        },
        max_spread: entries.iter().map(|e| e.spread()).max().unwrap_or(0),
        sample_count: mapping.sample_count(),
    }
}

/// Whether the distribution points at neighbourhood-dependent processing.
pub fn is_local_contrast(dist: &MappingDistribution, min_fraction: f64, min_spread: f64) -> bool {
    dist.one_to_many_fraction() > min_fraction && dist.mean_spread > min_spread
}

// ============================================================================
// Position profile
// ============================================================================

/// Delta statistics of one vertical band of the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionStats {
    /// First column of the band.
    pub x_start: u32,
    /// One past the last column.
    pub x_end: u32,
    pub count: u64,
    pub mean_delta: f64,
    pub std_delta: f64,
}

/// Streaming per-band delta statistics along the X axis.
#[derive(Debug, Clone)]
pub struct PositionProfile {
    width: u32,
    bands: Vec<RunningStats>,
}

impl PositionProfile {
    /// Profile with `bands` equal-width bands over an image `width` pixels wide.
    pub fn new(width: u32, bands: usize) -> Self {
        Self {
            width: width.max(1),
            bands: vec![RunningStats::new(); bands.max(1)],
        }
    }

    #[inline]
    fn band_of(&self, x: u32) -> usize {
        let n = self.bands.len() as u64;
        ((x.min(self.width - 1) as u64 * n) / self.width as u64) as usize
    }

    pub fn observe(&mut self, sample: &Sample) {
        let band = self.band_of(sample.x);
        self.bands[band].push(sample.delta() as f64);
    }

    /// Per-band results, left to right.
    pub fn regions(&self) -> Vec<RegionStats> {
        let n = self.bands.len() as u64;
        self.bands
            .iter()
            .enumerate()
            .map(|(i, stats)| RegionStats {
                x_start: (i as u64 * self.width as u64 / n) as u32,
                x_end: ((i as u64 + 1) * self.width as u64 / n) as u32,
                count: stats.count(),
                mean_delta: stats.mean(),
                std_delta: stats.std_dev().value,
            })
            .collect()
    }

    /// Largest difference between band mean deltas.
    pub fn mean_delta_spread(&self) -> f64 {
        let means: Vec<f64> = self
            .bands
            .iter()
            .filter(|b| b.count() > 0)
            .map(|b| b.mean())
            .collect();
        let max = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = means.iter().copied().fold(f64::INFINITY, f64::min);
        if means.is_empty() {
            0.0
        } else {
            max - min
        }
    }
}
