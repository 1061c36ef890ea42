//! Raster boundary: validation of the 16-bit buffers handed in by the
//! external image-loading collaborator.
//!
//! The engine works on `ndarray` views of shape `(height, width)`. Buffers
//! arriving with the `(height, width, channels)` layout used elsewhere in
//! the image stack are accepted as long as they carry exactly one channel.

use ndarray::{ArrayView2, ArrayView3, Axis, ShapeBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Layout metadata accompanying a raw sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterLayout {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Samples between the starts of consecutive rows (>= width).
    pub stride: usize,
    /// Samples per pixel. Must be 1.
    pub channels: usize,
    /// Bits per sample. Must be 16.
    pub bit_depth: u8,
}

impl RasterLayout {
    /// Tightly packed single-channel 16-bit layout.
    pub fn gray16(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            stride: width,
            channels: 1,
            bit_depth: 16,
        }
    }

    /// Total pixel count.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Wrap a raw buffer as a `(height, width)` view after validating its layout.
///
/// # Arguments
/// * `data` - Sample buffer, row-major, `stride` samples per row
/// * `layout` - Width/height/stride plus channel count and bit depth
///
/// # Returns
/// A borrowed view over `data`, or `InvalidInput` when the layout is not
/// single-channel 16-bit or does not fit in `data`.
pub fn gray16_view<'a>(data: &'a [u16], layout: &RasterLayout) -> Result<ArrayView2<'a, u16>> {
    if layout.channels != 1 {
        return Err(Error::InvalidInput(format!(
            "expected 1 channel, got {}",
            layout.channels
        )));
    }
    if layout.bit_depth != 16 {
        return Err(Error::InvalidInput(format!(
            "expected 16-bit samples, got {}-bit",
            layout.bit_depth
        )));
    }
    if layout.width == 0 || layout.height == 0 {
        return Err(Error::InvalidInput(format!(
            "empty raster {}x{}",
            layout.width, layout.height
        )));
    }
    if layout.stride < layout.width {
        return Err(Error::InvalidInput(format!(
            "stride {} shorter than width {}",
            layout.stride, layout.width
        )));
    }

    ArrayView2::from_shape(
        (layout.height, layout.width).strides((layout.stride, 1)),
        data,
    )
    .map_err(|e| Error::InvalidInput(format!("buffer does not match layout: {}", e)))
}

/// Accept a `(height, width, channels)` array only if it has a single channel.
pub fn single_channel(input: ArrayView3<'_, u16>) -> Result<ArrayView2<'_, u16>> {
    let (height, width, channels) = input.dim();
    if channels != 1 {
        return Err(Error::InvalidInput(format!(
            "expected 1 channel, got {} ({}x{})",
            channels, width, height
        )));
    }
    Ok(input.index_axis_move(Axis(2), 0))
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Region {
    /// Create a region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip against an image of `width` x `height`.
    ///
    /// # Returns
    /// Row and column ranges `(y0..y1, x0..x1)`, or `None` when the region
    /// lies entirely outside the image or is empty.
    pub fn clip(
        &self,
        width: usize,
        height: usize,
    ) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let x0 = self.x as usize;
        let y0 = self.y as usize;
        let x1 = (x0 + self.width as usize).min(width);
        let y1 = (y0 + self.height as usize).min(height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((y0..y1, x0..x1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_gray16_view_respects_stride() {
        // 2x3 image stored with a stride of 4 (one padding sample per row)
        let data: Vec<u16> = vec![1, 2, 3, 0, 4, 5, 6, 0];
        let layout = RasterLayout {
            stride: 4,
            ..RasterLayout::gray16(3, 2)
        };

        let view = gray16_view(&data, &layout).unwrap();

        assert_eq!(view.dim(), (2, 3));
        assert_eq!(view[[1, 0]], 4);
        assert_eq!(view[[1, 2]], 6);
    }

    #[test]
    fn test_gray16_view_rejects_rgb() {
        let data = vec![0u16; 12];
        let layout = RasterLayout {
            channels: 3,
            ..RasterLayout::gray16(2, 2)
        };

        assert!(matches!(gray16_view(&data, &layout), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_gray16_view_rejects_8bit() {
        let data = vec![0u16; 4];
        let layout = RasterLayout {
            bit_depth: 8,
            ..RasterLayout::gray16(2, 2)
        };

        assert!(matches!(gray16_view(&data, &layout), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_gray16_view_rejects_short_buffer() {
        let data = vec![0u16; 3];
        assert!(gray16_view(&data, &RasterLayout::gray16(2, 2)).is_err());
    }

    #[test]
    fn test_single_channel() {
        let img = Array3::<u16>::from_elem((2, 3, 1), 7);
        let view = single_channel(img.view()).unwrap();
        assert_eq!(view.dim(), (2, 3));

        let rgb = Array3::<u16>::zeros((2, 3, 3));
        assert!(single_channel(rgb.view()).is_err());
    }

    #[test]
    fn test_region_clip() {
        let region = Region::new(2, 1, 10, 10);
        let (rows, cols) = region.clip(4, 4).unwrap();
        assert_eq!(rows, 1..4);
        assert_eq!(cols, 2..4);

        assert!(Region::new(5, 0, 2, 2).clip(4, 4).is_none());
        assert!(Region::new(0, 0, 0, 2).clip(4, 4).is_none());
    }
}
