//! Choosing which detections get cropped.

use std::{cmp::Ordering, num::NonZeroUsize};

use log::debug;
use mtcnn_utils::SelectionMode;

use crate::postprocess::Detection;
use crate::preprocess::ImageSize;

/// Upper bound on the number of faces returned; `None` keeps all of them.
pub type FaceLimit = Option<NonZeroUsize>;

/// Return every detected face.
pub const NO_LIMIT: FaceLimit = None;

/// Convert a settings value into a [`FaceLimit`]. Zero means no limit.
pub fn face_limit_from(value: Option<usize>) -> FaceLimit {
    value.and_then(NonZeroUsize::new)
}

/// How detections are filtered before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Keep every detection in detector order. The face limit is not applied.
    #[default]
    All,
    /// Prefer large faces near the image center, keeping at most the face limit.
    LargestCentered,
}

impl From<SelectionMode> for SelectionStrategy {
    fn from(mode: SelectionMode) -> Self {
        match mode {
            SelectionMode::All => SelectionStrategy::All,
            SelectionMode::LargestCentered => SelectionStrategy::LargestCentered,
        }
    }
}

impl SelectionStrategy {
    /// Filter `detections` for an image of `size`.
    pub fn select(
        self,
        detections: Vec<Detection>,
        size: ImageSize,
        limit: FaceLimit,
    ) -> Vec<Detection> {
        match self {
            SelectionStrategy::All => {
                if let Some(limit) = limit.filter(|l| detections.len() > l.get()) {
                    debug!(
                        "face limit {limit} ignored by the `all` strategy; keeping {} faces",
                        detections.len()
                    );
                }
                detections
            }
            SelectionStrategy::LargestCentered => largest_centered(detections, size, limit),
        }
    }
}

/// `area - 2 * (distance from image center)^2`; larger is better.
fn centrality_score(detection: &Detection, size: ImageSize) -> f32 {
    let (cx, cy) = detection.bbox.center();
    let dx = cx - size.width as f32 / 2.0;
    let dy = cy - size.height as f32 / 2.0;
    detection.bbox.area() - 2.0 * (dx * dx + dy * dy)
}

fn largest_centered(
    detections: Vec<Detection>,
    size: ImageSize,
    limit: FaceLimit,
) -> Vec<Detection> {
    let mut ranked: Vec<(f32, Detection)> = detections
        .into_iter()
        .map(|d| (centrality_score(&d, size), d))
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    if let Some(limit) = limit {
        ranked.truncate(limit.get());
    }
    ranked.into_iter().map(|(_, d)| d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::DetectionBox;

    const SIZE: ImageSize = ImageSize {
        height: 200,
        width: 200,
    };

    fn faces() -> Vec<Detection> {
        vec![
            // small, corner
            Detection::new(DetectionBox::new(0.0, 0.0, 19.0, 19.0), 0.99),
            // large, centered
            Detection::new(DetectionBox::new(60.0, 60.0, 139.0, 139.0), 0.90),
            // large, off center
            Detection::new(DetectionBox::new(110.0, 110.0, 189.0, 189.0), 0.95),
        ]
    }

    #[test]
    fn all_ignores_limit_and_keeps_order() {
        let kept = SelectionStrategy::All.select(faces(), SIZE, NonZeroUsize::new(1));
        assert_eq!(kept, faces());
    }

    #[test]
    fn largest_centered_prefers_central_face() {
        let kept = SelectionStrategy::LargestCentered.select(faces(), SIZE, NonZeroUsize::new(1));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.90);
    }

    #[test]
    fn largest_centered_without_limit_ranks_everything() {
        let kept = SelectionStrategy::LargestCentered.select(faces(), SIZE, NO_LIMIT);
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.90, 0.95, 0.99]);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        assert_eq!(face_limit_from(Some(0)), NO_LIMIT);
        assert_eq!(face_limit_from(Some(3)), NonZeroUsize::new(3));
        assert_eq!(face_limit_from(None), NO_LIMIT);
    }

    #[test]
    fn strategy_follows_settings_mode() {
        assert_eq!(SelectionStrategy::from(SelectionMode::default()), SelectionStrategy::All);
        assert_eq!(
            SelectionStrategy::from(SelectionMode::LargestCentered),
            SelectionStrategy::LargestCentered
        );
    }
}
