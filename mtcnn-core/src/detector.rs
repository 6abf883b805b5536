//! Three-stage MTCNN cascade.
//!
//! P-Net proposes candidates over an image pyramid, R-Net rejects most of them and O-Net
//! produces the final boxes with five landmarks each. Every stage regresses and squares its
//! surviving boxes before handing them on.

use anyhow::Result;
use log::{Level, debug};
use mtcnn_utils::{
    DetectionSettings, ModelSettings,
    config::{FACE_MIN_SIZE, SCALE_FACTOR, THRESHOLDS},
    hwc_to_chw_normalized, padded_window, resize_bilinear, timing_guard,
};
use ndarray::{Array3, ArrayView3};

use crate::model::{ModelPaths, MtcnnModel, ONET_INPUT, ProposalMaps, RNET_INPUT, RefineOutput};
use crate::postprocess::{Detection, DetectionBox, Landmark, NmsMode, non_max_suppression};

/// Smallest face P-Net sees at scale 1.
const PNET_CELL: f32 = 12.0;
/// Step between P-Net output cells, in input pixels.
const PNET_STRIDE: f32 = 2.0;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 0.0078125;

const PNET_SCALE_NMS: f32 = 0.5;
const PNET_MERGED_NMS: f32 = 0.7;
const RNET_NMS: f32 = 0.7;
const ONET_NMS: f32 = 0.7;

/// Anything that turns an RGB image into candidate face boxes.
///
/// Images are `(height, width, 3)` with intensities nominally in `[0, 255]`.
pub trait FaceDetector: Send + Sync {
    fn detect(
        &self,
        image: ArrayView3<'_, f32>,
        params: &DetectionParams,
    ) -> Result<Vec<Detection>>;
}

/// Tuning knobs for a detection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Smallest face, in pixels, the pyramid is built to find.
    pub min_face_size: f32,
    /// Score cut-offs for P-Net, R-Net and O-Net.
    pub thresholds: [f32; 3],
    /// Ratio between consecutive pyramid levels.
    pub scale_factor: f32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_face_size: FACE_MIN_SIZE,
            thresholds: THRESHOLDS,
            scale_factor: SCALE_FACTOR,
        }
    }
}

impl DetectionParams {
    /// Same checks as [`DetectionSettings::validate`].
    pub fn validate(&self) -> Result<()> {
        DetectionSettings::from(self).validate()
    }
}

impl From<&DetectionParams> for DetectionSettings {
    fn from(params: &DetectionParams) -> Self {
        Self {
            min_face_size: params.min_face_size,
            thresholds: params.thresholds,
            scale_factor: params.scale_factor,
        }
    }
}

impl From<&DetectionSettings> for DetectionParams {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            min_face_size: settings.min_face_size,
            thresholds: settings.thresholds,
            scale_factor: settings.scale_factor,
        }
    }
}

impl From<DetectionSettings> for DetectionParams {
    fn from(settings: DetectionSettings) -> Self {
        (&settings).into()
    }
}

/// MTCNN detector backed by three ONNX networks.
///
/// Build it once and share it; detection only needs `&self`.
#[derive(Debug)]
pub struct MtcnnDetector {
    model: MtcnnModel,
}

impl MtcnnDetector {
    /// Load P-Net, R-Net and O-Net.
    ///
    /// # Errors
    ///
    /// Fails when any of the model files is missing or cannot be parsed.
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let _guard = timing_guard("mtcnn_core::load_models", Level::Info);
        Ok(Self {
            model: MtcnnModel::load(paths)?,
        })
    }

    /// Load the networks named by the settings' model section.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        Self::load(&settings.into())
    }
}

impl FaceDetector for MtcnnDetector {
    fn detect(
        &self,
        image: ArrayView3<'_, f32>,
        params: &DetectionParams,
    ) -> Result<Vec<Detection>> {
        let _guard = timing_guard("mtcnn_core::detect", Level::Debug);
        run_cascade(&self.model, image, params)
    }
}

/// The three network calls the cascade is built from.
pub(crate) trait CascadeNetworks {
    /// P-Net over one normalized pyramid level.
    fn proposals(&self, chw: ArrayView3<'_, f32>) -> Result<ProposalMaps>;
    /// R-Net over one normalized 24x24 crop.
    fn refine(&self, chw: ArrayView3<'_, f32>) -> Result<RefineOutput>;
    /// O-Net over one normalized 48x48 crop.
    fn output(&self, chw: ArrayView3<'_, f32>) -> Result<RefineOutput>;
}

impl CascadeNetworks for MtcnnModel {
    fn proposals(&self, chw: ArrayView3<'_, f32>) -> Result<ProposalMaps> {
        self.run_pnet(chw)
    }

    fn refine(&self, chw: ArrayView3<'_, f32>) -> Result<RefineOutput> {
        self.run_rnet(chw)
    }

    fn output(&self, chw: ArrayView3<'_, f32>) -> Result<RefineOutput> {
        self.run_onet(chw)
    }
}

pub(crate) fn run_cascade<N: CascadeNetworks>(
    nets: &N,
    image: ArrayView3<'_, f32>,
    params: &DetectionParams,
) -> Result<Vec<Detection>> {
    params.validate()?;

    let proposals = propose(nets, image, params)?;
    debug!("P-Net kept {} candidates", proposals.len());
    if proposals.is_empty() {
        return Ok(proposals);
    }

    let refined = refine(nets, image, proposals, params.thresholds[1])?;
    debug!("R-Net kept {} candidates", refined.len());
    if refined.is_empty() {
        return Ok(refined);
    }

    let mut faces = output(nets, image, refined, params.thresholds[2])?;
    faces.retain(|d| d.bbox.is_finite());
    debug!("O-Net kept {} faces", faces.len());
    Ok(faces)
}

fn propose<N: CascadeNetworks>(
    nets: &N,
    image: ArrayView3<'_, f32>,
    params: &DetectionParams,
) -> Result<Vec<Detection>> {
    let (height, width, _) = image.dim();
    let scales = pyramid_scales(height, width, params.min_face_size, params.scale_factor);
    let mut candidates = Vec::new();

    for scale in scales {
        let scaled_h = (height as f32 * scale).ceil() as usize;
        let scaled_w = (width as f32 * scale).ceil() as usize;
        let resized = resize_bilinear(image, scaled_h, scaled_w)?;
        let input = hwc_to_chw_normalized(resized.view(), PIXEL_MEAN, PIXEL_SCALE);
        let maps = nets.proposals(input.view())?;

        let boxes = generate_boxes(&maps, scale, params.thresholds[0]);
        candidates.extend(non_max_suppression(boxes, PNET_SCALE_NMS, NmsMode::Union));
    }

    let mut merged = non_max_suppression(candidates, PNET_MERGED_NMS, NmsMode::Union);
    for detection in &mut merged {
        detection.apply_proposal_regression();
        detection.bbox = detection.bbox.squared().truncated();
    }
    Ok(merged)
}

fn refine<N: CascadeNetworks>(
    nets: &N,
    image: ArrayView3<'_, f32>,
    candidates: Vec<Detection>,
    threshold: f32,
) -> Result<Vec<Detection>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(input) = stage_input(image, &candidate.bbox, RNET_INPUT)? else {
            continue;
        };
        let out = nets.refine(input.view())?;
        if out.score > threshold {
            scored.push(Detection::new(candidate.bbox, out.score).with_offsets(out.offsets));
        }
    }

    let mut kept = non_max_suppression(scored, RNET_NMS, NmsMode::Union);
    for detection in &mut kept {
        detection.apply_regression();
        detection.bbox = detection.bbox.squared().truncated();
    }
    Ok(kept)
}

fn output<N: CascadeNetworks>(
    nets: &N,
    image: ArrayView3<'_, f32>,
    candidates: Vec<Detection>,
    threshold: f32,
) -> Result<Vec<Detection>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(input) = stage_input(image, &candidate.bbox, ONET_INPUT)? else {
            continue;
        };
        let out = nets.output(input.view())?;
        if out.score <= threshold {
            continue;
        }
        let mut detection = Detection::new(candidate.bbox, out.score).with_offsets(out.offsets);
        if let Some(points) = out.landmarks {
            detection = detection.with_landmarks(project_landmarks(&candidate.bbox, &points));
        }
        detection.apply_regression();
        scored.push(detection);
    }
    Ok(non_max_suppression(scored, ONET_NMS, NmsMode::Min))
}

/// Pyramid scales for an image so that faces of `min_face_size` map onto the 12 px P-Net cell.
pub fn pyramid_scales(height: usize, width: usize, min_face_size: f32, factor: f32) -> Vec<f32> {
    let mut scales = Vec::new();
    if !(min_face_size > 0.0 && factor > 0.0 && factor < 1.0) {
        return scales;
    }
    let m = PNET_CELL / min_face_size;
    let mut min_side = height.min(width) as f32 * m;
    let mut scale = m;
    while min_side >= PNET_CELL {
        scales.push(scale);
        scale *= factor;
        min_side *= factor;
    }
    scales
}

/// Turn P-Net cells scoring at least `threshold` into boxes in original image coordinates.
fn generate_boxes(maps: &ProposalMaps, scale: f32, threshold: f32) -> Vec<Detection> {
    maps.prob
        .indexed_iter()
        .filter(|&(_, &score)| score >= threshold)
        .map(|((row, col), &score)| {
            let (x, y) = (col as f32 * PNET_STRIDE, row as f32 * PNET_STRIDE);
            let bbox = DetectionBox::new(
                ((x + 1.0) / scale).trunc(),
                ((y + 1.0) / scale).trunc(),
                ((x + PNET_CELL) / scale).trunc(),
                ((y + PNET_CELL) / scale).trunc(),
            );
            let offsets = [
                maps.reg[(0, row, col)],
                maps.reg[(1, row, col)],
                maps.reg[(2, row, col)],
                maps.reg[(3, row, col)],
            ];
            Detection::new(bbox, score).with_offsets(offsets)
        })
        .collect()
}

/// Cut the (inclusive) box out of the image, zero-padding outside it, and prepare it as a
/// `(3, side, side)` network input. Returns `None` for degenerate boxes.
fn stage_input(
    image: ArrayView3<'_, f32>,
    bbox: &DetectionBox,
    side: usize,
) -> Result<Option<Array3<f32>>> {
    if !bbox.is_finite() || bbox.width() < 1.0 || bbox.height() < 1.0 {
        return Ok(None);
    }
    let window = padded_window(
        image,
        bbox.x1 as i64,
        bbox.y1 as i64,
        bbox.x2 as i64 + 1,
        bbox.y2 as i64 + 1,
    );
    let resized = resize_bilinear(window.view(), side, side)?;
    Ok(Some(hwc_to_chw_normalized(resized.view(), PIXEL_MEAN, PIXEL_SCALE)))
}

/// O-Net emits landmarks as fractions of the box: five x values, then five y values.
fn project_landmarks(bbox: &DetectionBox, points: &[f32; 10]) -> [Landmark; 5] {
    let (w, h) = (bbox.width(), bbox.height());
    std::array::from_fn(|i| Landmark {
        x: bbox.x1 + w * points[i] - 1.0,
        y: bbox.y1 + h * points[i + 5] - 1.0,
    })
}
