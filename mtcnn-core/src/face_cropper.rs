//! Detection-to-crop pipeline.
//!
//! [`FaceCropper`] ties a [`FaceDetector`] to crop settings: it validates the input array,
//! asks the detector for boxes, applies the selection strategy, and returns one fixed-size
//! crop per selected face.

use std::num::NonZeroUsize;

use anyhow::Result;
use image::DynamicImage;
use log::{Level, debug};
use mtcnn_utils::{CropSettings, CropperSettings, dynamic_to_hwc, resize_bilinear, timing_guard};
use ndarray::{Array3, ArrayView3, ArrayViewD, s};

use crate::cropper::{BoundingBox, crop_region};
use crate::detector::{DetectionParams, FaceDetector, MtcnnDetector};
use crate::error::{CropError, CropResult};
use crate::model::ModelPaths;
use crate::postprocess::{Detection, DetectionBox};
use crate::preprocess::{ImageSize, PreparedImage, preprocess_image};
use crate::selection::{FaceLimit, SelectionStrategy};

/// A face crop and the region of the source image it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CroppedFace {
    /// Clamped crop region in source-image pixels, before resizing.
    pub bbox: BoundingBox,
    /// `(image_size, image_size, 3)` pixels in the value range of the input, so `[0, 255]`
    /// for decoded 8-bit images. Divide by 255 for unit-range consumers.
    pub image: Array3<f32>,
}

/// Runtime configuration for [`FaceCropper`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CropperConfig {
    pub detection: DetectionParams,
    pub crop: CropSettings,
    pub selection: SelectionStrategy,
}

impl CropperConfig {
    /// Reject detection and crop values the pipeline cannot run with.
    pub fn validate(&self) -> CropResult<()> {
        self.detection
            .validate()
            .and_then(|()| self.crop.validate())
            .map_err(|e| CropError::InvalidConfig(format!("{e:#}")))
    }
}

impl From<&CropperSettings> for CropperConfig {
    fn from(settings: &CropperSettings) -> Self {
        Self {
            detection: settings.detection.into(),
            crop: settings.crop,
            selection: settings.selection.into(),
        }
    }
}

/// Finds faces and crops them to a fixed square size.
#[derive(Debug)]
pub struct FaceCropper<D: FaceDetector = MtcnnDetector> {
    detector: D,
    config: CropperConfig,
}

impl FaceCropper<MtcnnDetector> {
    /// Load the MTCNN networks named in `settings` and build a cropper around them.
    pub fn from_settings(settings: &CropperSettings) -> Result<Self> {
        let detector = MtcnnDetector::load(&ModelPaths::from(&settings.models))?;
        Ok(Self::new(detector, settings.into()))
    }
}

impl<D: FaceDetector> FaceCropper<D> {
    pub fn new(detector: D, config: CropperConfig) -> Self {
        Self { detector, config }
    }

    pub fn config(&self) -> &CropperConfig {
        &self.config
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Run the detector and select the boxes to crop.
    ///
    /// # Errors
    ///
    /// [`CropError::NoFaceFound`] when the detector returns nothing; detector failures are
    /// wrapped in [`CropError::Detector`].
    pub fn detect_faces(
        &self,
        prepared: &PreparedImage,
        face_limit: FaceLimit,
    ) -> CropResult<Vec<Detection>> {
        let detections = self
            .detector
            .detect(prepared.image.view(), &self.config.detection)?;
        if detections.is_empty() {
            return Err(CropError::NoFaceFound);
        }
        Ok(self
            .config
            .selection
            .select(detections, prepared.size, face_limit))
    }

    /// Crop every selected face in `image`, in the order the selection yields them.
    ///
    /// `image` is `(height, width)` or `(height, width, channels)` with intensities
    /// nominally in `[0, 255]`.
    ///
    /// # Errors
    ///
    /// [`CropError::InvalidConfig`] before any work when the configuration is unusable.
    pub fn crop_faces(
        &self,
        image: ArrayViewD<'_, f32>,
        face_limit: FaceLimit,
    ) -> CropResult<Vec<CroppedFace>> {
        let _guard = timing_guard("mtcnn_core::crop_faces", Level::Debug);
        self.config.validate()?;
        let prepared = preprocess_image(image)?;
        let detections = self.detect_faces(&prepared, face_limit)?;

        let faces = detections
            .iter()
            .map(|d| {
                crop_face_from_image(
                    prepared.image.view(),
                    &d.bbox,
                    prepared.size,
                    &self.config.crop,
                )
            })
            .collect::<CropResult<Vec<_>>>()?;
        debug!(
            "cropped {} face(s) from {}x{} image",
            faces.len(),
            prepared.size.width,
            prepared.size.height
        );
        Ok(faces)
    }

    /// Same as [`FaceCropper::crop_faces`] for an already decoded image.
    ///
    /// Crops keep the 8-bit scale: values are in `[0, 255]`, not `[0, 1]`.
    pub fn crop_faces_in_image(
        &self,
        image: &DynamicImage,
        face_limit: FaceLimit,
    ) -> CropResult<Vec<CroppedFace>> {
        let pixels = dynamic_to_hwc(image);
        self.crop_faces(pixels.view().into_dyn(), face_limit)
    }

    /// Crop a single face, the first one the selection yields.
    pub fn crop_face(&self, image: ArrayViewD<'_, f32>) -> CropResult<CroppedFace> {
        self.crop_faces(image, NonZeroUsize::new(1))?
            .into_iter()
            .next()
            .ok_or(CropError::NoFaceFound)
    }
}

/// Cut the margin-expanded region around `bbox` out of `image` and resize it to
/// `crop.image_size` square.
pub fn crop_face_from_image(
    image: ArrayView3<'_, f32>,
    bbox: &DetectionBox,
    size: ImageSize,
    crop: &CropSettings,
) -> CropResult<CroppedFace> {
    crop.validate().map_err(|e| CropError::InvalidConfig(format!("{e:#}")))?;
    let region = crop_region(bbox, size, crop.margin);
    let window = image.slice(s![
        region.ymin as usize..region.ymax as usize,
        region.xmin as usize..region.xmax as usize,
        ..
    ]);
    let side = crop.image_size as usize;
    let resized = resize_bilinear(window, side, side)?;
    Ok(CroppedFace {
        bbox: region,
        image: resized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtcnn_utils::config::{IMAGE_SIZE, MARGIN};

    fn gradient(height: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((height, width, 3), |(y, x, _)| (x + y) as f32)
    }

    #[test]
    fn crop_face_resizes_to_output() {
        let image = gradient(120, 160);
        let size = ImageSize {
            height: 120,
            width: 160,
        };
        let face = crop_face_from_image(
            image.view(),
            &DetectionBox::new(40.0, 30.0, 100.0, 90.0),
            size,
            &CropSettings::default(),
        )
        .expect("crop succeeds");

        assert_eq!(face.image.dim(), (IMAGE_SIZE as usize, IMAGE_SIZE as usize, 3));
        assert_eq!(face.bbox.xmin, 40 - MARGIN / 2);
        assert_eq!(face.bbox.xmax, 100 + MARGIN / 2);
    }

    #[test]
    fn crop_preserves_value_range() {
        let image = Array3::<f32>::from_elem((50, 50, 3), 200.0);
        let size = ImageSize {
            height: 50,
            width: 50,
        };
        let face = crop_face_from_image(
            image.view(),
            &DetectionBox::new(10.0, 10.0, 30.0, 30.0),
            size,
            &CropSettings {
                margin: 4,
                image_size: 64,
            },
        )
        .expect("crop succeeds");
        assert!(face.image.iter().all(|&v| (v - 200.0).abs() < 1e-3));
    }

    #[test]
    fn zero_output_size_is_a_config_error() {
        let image = gradient(40, 40);
        let size = ImageSize {
            height: 40,
            width: 40,
        };
        let err = crop_face_from_image(
            image.view(),
            &DetectionBox::new(5.0, 5.0, 20.0, 20.0),
            size,
            &CropSettings {
                margin: 0,
                image_size: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CropError::InvalidConfig(_)));
        assert!(err.to_string().contains("image_size"));
    }

    #[test]
    fn config_validation_covers_thresholds() {
        let mut config = CropperConfig::default();
        assert!(config.validate().is_ok());
        config.detection.thresholds[1] = 2.0;
        assert!(matches!(config.validate(), Err(CropError::InvalidConfig(_))));
    }

    #[test]
    fn config_follows_settings() {
        let mut settings = CropperSettings::default();
        settings.crop.image_size = 96;
        settings.selection = mtcnn_utils::SelectionMode::LargestCentered;
        let config = CropperConfig::from(&settings);
        assert_eq!(config.crop.image_size, 96);
        assert_eq!(config.selection, SelectionStrategy::LargestCentered);
        assert_eq!(config.detection, DetectionParams::default());
    }
}
