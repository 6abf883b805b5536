//! Serializable settings for the MTCNN face cropper.
//!
//! Every struct uses `#[serde(default)]`, so a settings file only needs the fields it overrides.
//! The defaults are the fixed constants the cropper was tuned with.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Smallest face, in pixels, the image pyramid is built to find.
pub const FACE_MIN_SIZE: f32 = 20.0;
/// Per-stage confidence thresholds for P-Net, R-Net and O-Net.
pub const THRESHOLDS: [f32; 3] = [0.6, 0.7, 0.7];
/// Ratio between consecutive image pyramid levels.
pub const SCALE_FACTOR: f32 = 0.709;
/// Extra pixels added around each detected box (half on each side).
pub const MARGIN: u32 = 32;
/// Side length of the square output crop.
pub const IMAGE_SIZE: u32 = 160;

/// Locations of the three cascade networks in ONNX format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub pnet: PathBuf,
    pub rnet: PathBuf,
    pub onet: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            pnet: PathBuf::from("models/mtcnn_pnet.onnx"),
            rnet: PathBuf::from("models/mtcnn_rnet.onnx"),
            onet: PathBuf::from("models/mtcnn_onet.onnx"),
        }
    }
}

/// Detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum face size in pixels.
    pub min_face_size: f32,
    /// Confidence thresholds for the three cascade stages.
    pub thresholds: [f32; 3],
    /// Image pyramid scale factor, in `(0, 1)`.
    pub scale_factor: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            min_face_size: FACE_MIN_SIZE,
            thresholds: THRESHOLDS,
            scale_factor: SCALE_FACTOR,
        }
    }
}

impl DetectionSettings {
    /// Check that the values describe a pyramid that terminates.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.min_face_size.is_finite() && self.min_face_size > 0.0,
            "min_face_size must be positive (got {})",
            self.min_face_size
        );
        anyhow::ensure!(
            self.scale_factor > 0.0 && self.scale_factor < 1.0,
            "scale_factor must lie in (0, 1) (got {})",
            self.scale_factor
        );
        for (stage, threshold) in self.thresholds.iter().enumerate() {
            anyhow::ensure!(
                (0.0..=1.0).contains(threshold),
                "threshold for stage {stage} must lie in [0, 1] (got {threshold})"
            );
        }
        Ok(())
    }
}

/// Crop geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropSettings {
    /// Total margin in pixels; half is added on each side of the box.
    pub margin: u32,
    /// Side length of the square output image.
    pub image_size: u32,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            margin: MARGIN,
            image_size: IMAGE_SIZE,
        }
    }
}

impl CropSettings {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.image_size > 0, "image_size must be positive (got 0)");
        Ok(())
    }
}

/// Which detected faces are kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Every detected face, in detector order.
    #[default]
    All,
    /// The largest faces closest to the image center, up to the face limit.
    LargestCentered,
}

/// Settings controlling optional timing telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    /// One of off, error, warn, info, debug, trace.
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Parse the level string, falling back to `Debug` for unknown values.
    pub fn level_filter(&self) -> LevelFilter {
        self.level.trim().parse().unwrap_or(LevelFilter::Debug)
    }
}

/// Top-level settings consumed by the cropper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CropperSettings {
    pub models: ModelSettings,
    pub detection: DetectionSettings,
    pub crop: CropSettings,
    pub selection: SelectionMode,
    /// Maximum number of faces per call; `None` (or 0) means no limit.
    pub face_limit: Option<usize>,
    pub telemetry: TelemetrySettings,
}

impl CropperSettings {
    /// Load settings from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: CropperSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings
            .detection
            .validate()
            .with_context(|| format!("invalid detection settings in {}", path.display()))?;
        settings
            .crop
            .validate()
            .with_context(|| format!("invalid crop settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Write settings as pretty-printed JSON, replacing any existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}
