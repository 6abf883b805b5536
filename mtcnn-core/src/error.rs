use thiserror::Error;

/// Errors surfaced by the face cropping entry points.
#[derive(Debug, Error)]
pub enum CropError {
    /// The input array cannot be interpreted as an image.
    #[error("incorrect image dimensions: {0}")]
    IncorrectImageDimensions(String),

    /// Detection or crop settings are out of range.
    #[error("invalid cropper configuration: {0}")]
    InvalidConfig(String),

    /// The detector returned no candidate boxes.
    #[error("no face is found in the given image")]
    NoFaceFound,

    /// Model execution or tensor plumbing failed.
    #[error(transparent)]
    Detector(#[from] anyhow::Error),
}

/// Result alias for the cropping entry points.
pub type CropResult<T> = Result<T, CropError>;
