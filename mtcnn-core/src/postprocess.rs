//! Candidate boxes and the geometry applied between cascade stages.
//!
//! Boxes are pixel-inclusive (`x2 - x1 + 1` pixels wide), matching how the cascade
//! networks were trained.

use std::cmp::Ordering;

/// Facial landmark in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

/// Float box `(x1, y1)`–`(x2, y2)` in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl DetectionBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Inclusive pixel width.
    pub fn width(&self) -> f32 {
        self.x2 - self.x1 + 1.0
    }

    /// Inclusive pixel height.
    pub fn height(&self) -> f32 {
        self.y2 - self.y1 + 1.0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Center point `(x, y)`.
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    fn intersection(&self, other: &Self) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1) + 1.0).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1) + 1.0).max(0.0);
        w * h
    }

    /// Overlap of two boxes under the given NMS criterion.
    pub fn overlap(&self, other: &Self, mode: NmsMode) -> f32 {
        let inter = self.intersection(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let denom = match mode {
            NmsMode::Union => self.area() + other.area() - inter,
            NmsMode::Min => self.area().min(other.area()),
        };
        if denom <= 0.0 { 0.0 } else { inter / denom }
    }

    /// Apply the network's box regression offsets, expressed as fractions of the inclusive
    /// box size. R-Net and O-Net were trained this way.
    pub fn regressed(&self, offsets: [f32; 4]) -> Self {
        self.shifted(offsets, self.width(), self.height())
    }

    /// Same as [`DetectionBox::regressed`] but scaled by `x2 - x1` and `y2 - y1`, as P-Net
    /// proposals are.
    pub fn regressed_exclusive(&self, offsets: [f32; 4]) -> Self {
        self.shifted(offsets, self.x2 - self.x1, self.y2 - self.y1)
    }

    fn shifted(&self, offsets: [f32; 4], w: f32, h: f32) -> Self {
        Self {
            x1: self.x1 + offsets[0] * w,
            y1: self.y1 + offsets[1] * h,
            x2: self.x2 + offsets[2] * w,
            y2: self.y2 + offsets[3] * h,
        }
    }

    /// Expand the shorter side so the box becomes square around the same center.
    pub fn squared(&self) -> Self {
        let w = self.x2 - self.x1;
        let h = self.y2 - self.y1;
        let side = w.max(h);
        let x1 = self.x1 + w * 0.5 - side * 0.5;
        let y1 = self.y1 + h * 0.5 - side * 0.5;
        Self {
            x1,
            y1,
            x2: x1 + side,
            y2: y1 + side,
        }
    }

    /// Truncate every coordinate toward zero.
    pub fn truncated(&self) -> Self {
        Self {
            x1: self.x1.trunc(),
            y1: self.y1.trunc(),
            x2: self.x2.trunc(),
            y2: self.y2.trunc(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// A candidate face returned by a detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: DetectionBox,
    pub score: f32,
    /// Eyes, nose, mouth corners; only the final cascade stage produces these.
    pub landmarks: Option<[Landmark; 5]>,
    /// Regression offsets predicted for this box by the stage that scored it.
    pub(crate) offsets: [f32; 4],
}

impl Detection {
    pub fn new(bbox: DetectionBox, score: f32) -> Self {
        Self {
            bbox,
            score,
            landmarks: None,
            offsets: [0.0; 4],
        }
    }

    pub fn with_landmarks(mut self, landmarks: [Landmark; 5]) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub(crate) fn with_offsets(mut self, offsets: [f32; 4]) -> Self {
        self.offsets = offsets;
        self
    }

    /// Move the box by its pending regression offsets and clear them.
    pub(crate) fn apply_regression(&mut self) {
        self.bbox = self.bbox.regressed(self.offsets);
        self.offsets = [0.0; 4];
    }

    /// P-Net variant of [`Detection::apply_regression`] using the exclusive box size.
    pub(crate) fn apply_proposal_regression(&mut self) {
        self.bbox = self.bbox.regressed_exclusive(self.offsets);
        self.offsets = [0.0; 4];
    }
}

/// Overlap criterion for non-maximum suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmsMode {
    /// Intersection over union.
    Union,
    /// Intersection over the smaller box; suppresses boxes nested inside others.
    Min,
}

/// Keep the highest-scoring detections, dropping any that overlap a kept one by more than
/// `threshold`. The result is sorted by descending score.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    threshold: f32,
    mode: NmsMode,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for detection in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.bbox.overlap(&detection.bbox, mode) > threshold);
        if !suppressed {
            kept.push(detection);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
        Detection::new(DetectionBox::new(x1, y1, x2, y2), score)
    }

    #[test]
    fn inclusive_area_and_union_overlap() {
        let a = DetectionBox::new(0.0, 0.0, 9.0, 9.0);
        let b = DetectionBox::new(5.0, 0.0, 14.0, 9.0);
        assert_eq!(a.area(), 100.0);
        // 5 x 10 intersection, union 150
        assert!((a.overlap(&b, NmsMode::Union) - 50.0 / 150.0).abs() < 1e-6);
        assert!((a.overlap(&b, NmsMode::Min) - 0.5).abs() < 1e-6);
        let far = DetectionBox::new(100.0, 100.0, 110.0, 110.0);
        assert_eq!(a.overlap(&far, NmsMode::Union), 0.0);
    }

    #[test]
    fn nms_keeps_best_of_overlapping_pair() {
        let kept = non_max_suppression(
            vec![
                det(1.0, 1.0, 10.0, 10.0, 0.8),
                det(0.0, 0.0, 10.0, 10.0, 0.95),
                det(50.0, 50.0, 60.0, 60.0, 0.7),
            ],
            0.5,
            NmsMode::Union,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.95);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn min_mode_suppresses_nested_box() {
        let outer = det(0.0, 0.0, 99.0, 99.0, 0.9);
        let inner = det(40.0, 40.0, 49.0, 49.0, 0.8);
        assert_eq!(
            non_max_suppression(vec![outer.clone(), inner.clone()], 0.7, NmsMode::Union).len(),
            2
        );
        assert_eq!(
            non_max_suppression(vec![outer, inner], 0.7, NmsMode::Min).len(),
            1
        );
    }

    #[test]
    fn squared_keeps_center() {
        let b = DetectionBox::new(10.0, 20.0, 30.0, 60.0).squared();
        assert_eq!(b.x2 - b.x1, 40.0);
        assert_eq!(b.y2 - b.y1, 40.0);
        assert_eq!(b.center(), (20.0, 40.0));
    }

    #[test]
    fn regression_scales_with_box_size() {
        let mut d = det(0.0, 0.0, 9.0, 19.0, 0.9).with_offsets([0.1, -0.1, 0.2, 0.0]);
        d.apply_regression();
        assert!((d.bbox.x1 - 1.0).abs() < 1e-6);
        assert!((d.bbox.y1 + 2.0).abs() < 1e-6);
        assert!((d.bbox.x2 - 11.0).abs() < 1e-6);
        assert_eq!(d.bbox.y2, 19.0);
        assert_eq!(d.offsets, [0.0; 4]);
    }

    #[test]
    fn proposal_regression_uses_exclusive_size() {
        let offsets = [0.1, 0.0, -0.1, 0.5];
        let mut proposal = det(0.0, 0.0, 10.0, 20.0, 0.9).with_offsets(offsets);
        proposal.apply_proposal_regression();
        assert_eq!(proposal.bbox, DetectionBox::new(1.0, 0.0, 9.0, 30.0));

        let refined = DetectionBox::new(0.0, 0.0, 10.0, 20.0).regressed(offsets);
        assert!((refined.x1 - 1.1).abs() < 1e-6);
        assert!((refined.y2 - 30.5).abs() < 1e-6);
    }
}
