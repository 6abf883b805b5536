//! MTCNN face detection and fixed-size face cropping.
//!
//! The detector runs the three-network MTCNN cascade with `tract-onnx`. [`FaceCropper`]
//! wraps any [`FaceDetector`] and turns each detected face into a square crop with a margin
//! around it, ready for a face-embedding model.

/// Margin expansion and clamping of crop regions.
pub mod cropper;
/// The MTCNN cascade and the detector trait.
pub mod detector;
/// Error type for the cropping entry points.
pub mod error;
/// Preprocess, detect, select, crop.
pub mod face_cropper;
/// ONNX loading and execution of P-Net, R-Net and O-Net.
pub mod model;
/// Detection boxes, regression and non-maximum suppression.
pub mod postprocess;
/// Input validation and channel normalization.
pub mod preprocess;
/// Face selection strategies and limits.
pub mod selection;

pub use cropper::{BoundingBox, crop_region};
pub use detector::{DetectionParams, FaceDetector, MtcnnDetector, pyramid_scales};
pub use error::{CropError, CropResult};
pub use face_cropper::{CropperConfig, CroppedFace, FaceCropper, crop_face_from_image};
pub use model::{ModelPaths, MtcnnModel};
pub use postprocess::{Detection, DetectionBox, Landmark, NmsMode, non_max_suppression};
pub use preprocess::{ImageSize, PreparedImage, preprocess_image};
pub use selection::{FaceLimit, NO_LIMIT, SelectionStrategy, face_limit_from};

