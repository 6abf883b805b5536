//! Crop-region calculation.
//!
//! A detection box is grown by half the margin on every side, clamped to the image and
//! snapped to whole pixels. The result always covers at least one pixel.

use crate::postprocess::DetectionBox;
use crate::preprocess::ImageSize;

/// Integer crop region `[xmin, xmax) x [ymin, ymax)` in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> u32 {
        self.ymax - self.ymin
    }
}

/// Compute the margin-expanded crop region for `bbox` inside an image of `size`.
///
/// Coordinates are floored after clamping, so `xmax <= width` and `ymax <= height`. A box
/// lying entirely outside the image collapses onto the nearest edge pixel.
pub fn crop_region(bbox: &DetectionBox, size: ImageSize, margin: u32) -> BoundingBox {
    let half = margin as f32 / 2.0;
    let (xmin, xmax) = axis_span(bbox.x1, bbox.x2, half, size.width);
    let (ymin, ymax) = axis_span(bbox.y1, bbox.y2, half, size.height);
    BoundingBox {
        xmin,
        ymin,
        xmax,
        ymax,
    }
}

fn axis_span(lo: f32, hi: f32, half: f32, extent: usize) -> (u32, u32) {
    let extent = u32::try_from(extent).unwrap_or(u32::MAX).max(1);
    // NaN falls to 0 on the low side and to `extent` on the high side.
    let lo = (lo - half).max(0.0).floor();
    let hi = (hi + half).min(extent as f32).floor();

    let start = (lo as u32).min(extent - 1);
    let mut end = (hi as u32).min(extent);
    if end <= start {
        end = start + 1;
    }
    (start, end)
}
