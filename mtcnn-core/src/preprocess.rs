//! Input validation and channel normalization.
//!
//! Images arrive as dynamically-dimensioned arrays laid out `(height, width[, channels])`.
//! Everything downstream expects exactly three channels, so grayscale input is replicated
//! and extra channels (alpha) are dropped here.

use log::trace;
use mtcnn_utils::grayscale_to_rgb;
use ndarray::{Array3, ArrayViewD, Axis, Ix2, Ix3, s};

use crate::error::{CropError, CropResult};

/// Pixel dimensions of a prepared image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
}

/// A validated `(height, width, 3)` image and its size.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub image: Array3<f32>,
    pub size: ImageSize,
}

/// Validate `image` and coerce it to three channels.
///
/// # Errors
///
/// [`CropError::IncorrectImageDimensions`] when the array has fewer than two or more than
/// three dimensions, or when any of height, width, or channel count is zero.
pub fn preprocess_image(image: ArrayViewD<'_, f32>) -> CropResult<PreparedImage> {
    let ndim = image.ndim();
    let rgb = match ndim {
        0 | 1 => {
            return Err(CropError::IncorrectImageDimensions(format!(
                "unable to align image, it has only {ndim} dimension(s)"
            )));
        }
        2 => {
            let gray = image
                .into_dimensionality::<Ix2>()
                .map_err(|e| CropError::IncorrectImageDimensions(e.to_string()))?;
            trace!("replicating grayscale input into three channels");
            grayscale_to_rgb(gray)
        }
        3 => {
            let hwc = image
                .into_dimensionality::<Ix3>()
                .map_err(|e| CropError::IncorrectImageDimensions(e.to_string()))?;
            match hwc.len_of(Axis(2)) {
                0 => {
                    return Err(CropError::IncorrectImageDimensions(
                        "image has no channels".to_string(),
                    ));
                }
                1 | 2 => grayscale_to_rgb(hwc.index_axis(Axis(2), 0)),
                _ => hwc.slice(s![.., .., 0..3]).to_owned(),
            }
        }
        _ => {
            return Err(CropError::IncorrectImageDimensions(format!(
                "expected (height, width[, channels]) but got {ndim} dimensions"
            )));
        }
    };

    let (height, width, _) = rgb.dim();
    if height == 0 || width == 0 {
        return Err(CropError::IncorrectImageDimensions(format!(
            "image is empty ({height}x{width})"
        )));
    }

    Ok(PreparedImage {
        image: rgb,
        size: ImageSize { height, width },
    })
}
