//! Sample records, sampling modes and the co-registered image set.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One co-located observation: the same pixel in the original, target and
/// (optionally) enhanced rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    pub x: u32,
    pub y: u32,
    pub original: u16,
    pub target: u16,
    pub enhanced: Option<u16>,
}

impl Sample {
    /// Sample without an enhanced value.
    pub fn new(x: u32, y: u32, original: u16, target: u16) -> Self {
        Self {
            x,
            y,
            original,
            target,
            enhanced: None,
        }
    }

    /// `target - original`.
    #[inline]
    pub fn delta(&self) -> i32 {
        self.target as i32 - self.original as i32
    }

    /// `delta / original * 100`, 0 when the original value is 0.
    #[inline]
    pub fn percent_delta(&self) -> f64 {
        if self.original == 0 {
            0.0
        } else {
            self.delta() as f64 * 100.0 / self.original as f64
        }
    }
}

/// Which pixels a scan visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    /// Every pixel.
    #[default]
    Exhaustive,
    /// Every `step`-th pixel in both axes, starting at (0, 0).
    Grid { step: usize },
}

impl SampleMode {
    /// Grid mode approximating a sampling rate in (0, 1].
    ///
    /// The step is `round(1 / sqrt(rate))`, at least 1; a step of 1 is exhaustive.
    pub fn from_rate(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
            return Err(Error::InvalidInput(format!(
                "sampling rate must be in (0, 1], got {}",
                rate
            )));
        }
        let step = (1.0 / rate.sqrt()).round().max(1.0) as usize;
        Ok(if step == 1 {
            SampleMode::Exhaustive
        } else {
            SampleMode::Grid { step }
        })
    }

    /// Step between visited pixels in each axis.
    #[inline]
    pub fn step(&self) -> usize {
        match *self {
            SampleMode::Exhaustive => 1,
            SampleMode::Grid { step } => step.max(1),
        }
    }

    /// Number of samples a scan of a `width` x `height` raster produces.
    pub fn sample_count(&self, width: usize, height: usize) -> u64 {
        let step = self.step();
        (width.div_ceil(step) as u64) * (height.div_ceil(step) as u64)
    }
}

/// Original and target rasters (plus an optional enhanced one) validated to
/// share the same dimensions.
#[derive(Debug, Clone, Copy)]
pub struct ImageSet<'a> {
    original: ArrayView2<'a, u16>,
    target: ArrayView2<'a, u16>,
    enhanced: Option<ArrayView2<'a, u16>>,
}

impl<'a> ImageSet<'a> {
    /// Pair an original with its target.
    ///
    /// # Returns
    /// `InvalidInput` when the target's shape differs from the original's.
    pub fn new(original: ArrayView2<'a, u16>, target: ArrayView2<'a, u16>) -> Result<Self> {
        check_dims("target", &original, &target)?;
        Ok(Self {
            original,
            target,
            enhanced: None,
        })
    }

    /// Attach a third, enhanced raster.
    pub fn with_enhanced(mut self, enhanced: ArrayView2<'a, u16>) -> Result<Self> {
        check_dims("enhanced", &self.original, &enhanced)?;
        self.enhanced = Some(enhanced);
        Ok(self)
    }

    pub fn width(&self) -> usize {
        self.original.ncols()
    }

    pub fn height(&self) -> usize {
        self.original.nrows()
    }

    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn original(&self) -> ArrayView2<'a, u16> {
        self.original
    }

    pub fn target(&self) -> ArrayView2<'a, u16> {
        self.target
    }

    pub fn enhanced(&self) -> Option<ArrayView2<'a, u16>> {
        self.enhanced
    }

    /// Sample at row `y`, column `x`. Caller guarantees the position is in bounds.
    #[inline]
    pub(crate) fn sample_at(&self, y: usize, x: usize) -> Sample {
        Sample {
            x: x as u32,
            y: y as u32,
            original: self.original[[y, x]],
            target: self.target[[y, x]],
            enhanced: self.enhanced.map(|e| e[[y, x]]),
        }
    }
}

fn check_dims(
    what: &'static str,
    original: &ArrayView2<'_, u16>,
    other: &ArrayView2<'_, u16>,
) -> Result<()> {
    let (h, w) = original.dim();
    let (oh, ow) = other.dim();
    if (h, w) != (oh, ow) {
        return Err(Error::InvalidInput(format!(
            "dimension mismatch: {} is {}x{}, expected {}x{}",
            what, ow, oh, w, h
        )));
    }
    Ok(())
}
