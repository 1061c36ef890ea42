//! Sparse mapping and dense 65536-entry lookup table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of distinct 16-bit values.
pub const LUT_SIZE: usize = 1 << 16;

/// Aggregated target for one observed original value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub original: u16,
    /// Aggregated target value.
    pub target: u16,
    /// Samples observed with this original value.
    pub count: u64,
    /// Smallest target observed for this original value.
    pub min_target: u16,
    /// Largest target observed for this original value.
    pub max_target: u16,
}

impl MappingEntry {
    /// `target - original`.
    #[inline]
    pub fn delta(&self) -> i32 {
        self.target as i32 - self.original as i32
    }

    /// Whether more than one distinct target was observed.
    #[inline]
    pub fn is_one_to_many(&self) -> bool {
        self.min_target != self.max_target
    }

    /// `max_target - min_target`.
    #[inline]
    pub fn spread(&self) -> u16 {
        self.max_target - self.min_target
    }
}

/// Ordered `original -> target` mapping over the observed original values.
///
/// Keys are unique and sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mapping {
    entries: Vec<MappingEntry>,
    saturated: bool,
}

impl Mapping {
    /// Build from entries already sorted by unique `original`.
    pub(crate) fn from_sorted(entries: Vec<MappingEntry>, saturated: bool) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].original < w[1].original));
        Self { entries, saturated }
    }

    /// Build a mapping from `(original, target)` pairs, one observation each.
    ///
    /// Later pairs with a duplicate original replace earlier ones.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u16, u16)>,
    {
        let mut map = std::collections::BTreeMap::new();
        for (original, target) in pairs {
            map.insert(original, target);
        }
        let entries = map
            .into_iter()
            .map(|(original, target)| MappingEntry {
                original,
                target,
                count: 1,
                min_target: target,
                max_target: target,
            })
            .collect();
        Self {
            entries,
            saturated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by original value.
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Entry for `original`, if it was observed.
    pub fn get(&self, original: u16) -> Option<&MappingEntry> {
        self.entries
            .binary_search_by_key(&original, |e| e.original)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Total number of samples behind the mapping.
    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Whether a sum hit its ceiling while aggregating.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Originals and aggregated targets as parallel `f64` columns.
    pub fn columns(&self) -> (Vec<f64>, Vec<f64>) {
        self.entries
            .iter()
            .map(|e| (e.original as f64, e.target as f64))
            .unzip()
    }
}

// ============================================================================
// Dense LUT
// ============================================================================

/// Fully populated 16-bit lookup table.
#[derive(Clone, PartialEq, Eq)]
pub struct DenseLut {
    table: Box<[u16]>,
}

impl DenseLut {
    /// The identity table.
    pub fn identity() -> Self {
        Self {
            table: (0..LUT_SIZE).map(|v| v as u16).collect(),
        }
    }

    /// Wrap a table of exactly 65536 entries.
    pub fn from_vec(table: Vec<u16>) -> Result<Self> {
        if table.len() != LUT_SIZE {
            return Err(Error::InvalidInput(format!(
                "lookup table needs {} entries, got {}",
                LUT_SIZE,
                table.len()
            )));
        }
        Ok(Self {
            table: table.into_boxed_slice(),
        })
    }

    /// Look up a value.
    #[inline]
    pub fn get(&self, value: u16) -> u16 {
        self.table[value as usize]
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.table
    }

    pub fn min(&self) -> u16 {
        self.table.iter().copied().min().unwrap_or(0)
    }

    pub fn max(&self) -> u16 {
        self.table.iter().copied().max().unwrap_or(0)
    }

    /// `(max - min) / 65535`.
    pub fn dynamic_range(&self) -> f64 {
        (self.max() - self.min()) as f64 / u16::MAX as f64
    }
}

impl fmt::Debug for DenseLut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseLut")
            .field("first", &self.table.first())
            .field("last", &self.table.last())
            .field("min", &self.min())
            .field("max", &self.max())
            .finish()
    }
}

/// Fill every 16-bit key from a sparse mapping.
///
/// Unobserved keys between two observed keys are linearly interpolated
/// (rounded half away from zero); keys below the first or above the last
/// observed key take that key's target. One pass over the sorted keys.
///
/// # Returns
/// `EmptyMapping` when the mapping has no keys.
pub fn densify(mapping: &Mapping) -> Result<DenseLut> {
    let entries = mapping.entries();
    let (first, last) = match (entries.first(), entries.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(Error::EmptyMapping("no observed original values to densify")),
    };

    let mut table = vec![0u16; LUT_SIZE];
    table[..=first.original as usize].fill(first.target);

    for pair in entries.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let lo_key = lo.original as usize;
        let hi_key = hi.original as usize;
        let span = (hi_key - lo_key) as f64;
        let rise = hi.target as f64 - lo.target as f64;

        table[lo_key] = lo.target;
        for (offset, slot) in table[lo_key + 1..hi_key].iter_mut().enumerate() {
            let t = lo.target as f64 + rise * (offset + 1) as f64 / span;
            *slot = t.round() as u16;
        }
    }

    table[last.original as usize..].fill(last.target);

    DenseLut::from_vec(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_densify_interpolates_midpoint() {
        let mapping = Mapping::from_pairs([(0, 0), (65535, 50000)]);
        let lut = densify(&mapping).unwrap();

        assert_eq!(lut.as_slice().len(), LUT_SIZE);
        assert_eq!(lut.get(0), 0);
        assert_eq!(lut.get(65535), 50000);
        assert!((lut.get(32767) as i32 - 25000).abs() <= 1);
    }

    #[test]
    fn test_densify_flat_extrapolation() {
        let mapping = Mapping::from_pairs([(100, 1000), (200, 3000)]);
        let lut = densify(&mapping).unwrap();

        assert_eq!(lut.get(0), 1000);
        assert_eq!(lut.get(99), 1000);
        assert_eq!(lut.get(150), 2000);
        assert_eq!(lut.get(201), 3000);
        assert_eq!(lut.get(65535), 3000);
    }

    #[test]
    fn test_densify_keeps_observed_keys_and_decreasing_runs() {
        let mapping = Mapping::from_pairs([(10, 500), (12, 100), (14, 900)]);
        let lut = densify(&mapping).unwrap();

        assert_eq!(lut.get(10), 500);
        assert_eq!(lut.get(11), 300);
        assert_eq!(lut.get(12), 100);
        assert_eq!(lut.get(13), 500);
        assert_eq!(lut.get(14), 900);
    }

    #[test]
    fn test_densify_single_key() {
        let lut = densify(&Mapping::from_pairs([(42, 7)])).unwrap();
        assert!(lut.as_slice().iter().all(|&v| v == 7));
        assert_eq!(lut.dynamic_range(), 0.0);
    }

    #[test]
    fn test_densify_empty_fails() {
        let err = densify(&Mapping::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyMapping(_)));
    }

    #[test]
    fn test_mapping_lookup() {
        let mapping = Mapping::from_pairs([(5, 1), (1, 9), (5, 2)]);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.entries()[0].original, 1);
        assert_eq!(mapping.get(5).map(|e| e.target), Some(2));
        assert!(mapping.get(3).is_none());
        let (xs, ys) = mapping.columns();
        assert_eq!(xs, vec![1.0, 5.0]);
        assert_eq!(ys, vec![9.0, 2.0]);
    }

    #[test]
    fn test_lut_from_vec_length_checked() {
        assert!(DenseLut::from_vec(vec![0; 10]).is_err());
        let id = DenseLut::identity();
        assert_eq!(id.get(1234), 1234);
        assert_eq!(id.dynamic_range(), 1.0);
    }
}
