use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use log::{debug, warn};
use lru::LruCache;
use mtcnn_utils::ModelSettings;
use ndarray::{Array2, Array3, ArrayView3};
use tract_onnx::prelude::*;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Side length of the R-Net input crop.
pub const RNET_INPUT: usize = 24;
/// Side length of the O-Net input crop.
pub const ONET_INPUT: usize = 48;

const PROB_WIDTH: usize = 2;
const REG_WIDTH: usize = 4;
const LANDMARK_WIDTH: usize = 10;

/// P-Net plans kept alive; a pyramid over one image size needs about ten.
const PNET_PLAN_CAPACITY: usize = 32;

/// File locations of the three cascade networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub pnet: PathBuf,
    pub rnet: PathBuf,
    pub onet: PathBuf,
}

impl From<&ModelSettings> for ModelPaths {
    fn from(settings: &ModelSettings) -> Self {
        Self {
            pnet: settings.pnet.clone(),
            rnet: settings.rnet.clone(),
            onet: settings.onet.clone(),
        }
    }
}

impl From<ModelSettings> for ModelPaths {
    fn from(settings: ModelSettings) -> Self {
        (&settings).into()
    }
}

/// P-Net output for one pyramid level.
#[derive(Debug)]
pub struct ProposalMaps {
    /// Face probability per cell, `(rows, cols)`.
    pub prob: Array2<f32>,
    /// Box regression per cell, `(4, rows, cols)`.
    pub reg: Array3<f32>,
}

/// R-Net / O-Net output for one crop.
#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutput {
    pub score: f32,
    pub offsets: [f32; 4],
    /// Five x coordinates followed by five y coordinates, relative to the crop (O-Net only).
    pub landmarks: Option<[f32; LANDMARK_WIDTH]>,
}

/// Least-recently-used cache of execution plans keyed by input `(height, width)`.
pub(crate) struct PlanCache<T> {
    plans: Mutex<LruCache<(usize, usize), Arc<T>>>,
}

impl<T> PlanCache<T> {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            plans: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the plan for `key`, building and inserting it on a miss.
    pub(crate) fn get_or_build(
        &self,
        key: (usize, usize),
        build: impl FnOnce() -> Result<T>,
    ) -> Result<Arc<T>> {
        let mut plans = self
            .plans
            .lock()
            .map_err(|_| anyhow::anyhow!("plan cache lock poisoned"))?;
        if let Some(plan) = plans.get(&key) {
            return Ok(Arc::clone(plan));
        }
        let plan = Arc::new(build()?);
        if let Some(((h, w), _)) = plans.push(key, Arc::clone(&plan)) {
            debug!("evicted cached plan for {w}x{h}");
        }
        Ok(plan)
    }

    pub(crate) fn len(&self) -> usize {
        self.plans.lock().map(|plans| plans.len()).unwrap_or(0)
    }
}

/// The three MTCNN networks loaded with `tract-onnx`.
///
/// Inputs are NCHW `f32` tensors. P-Net accepts any spatial size, so a plan is built per
/// pyramid shape and the most recent ones are cached; R-Net and O-Net run one crop at a time.
pub struct MtcnnModel {
    pnet: InferenceModel,
    pnet_plans: PlanCache<RunnableModel>,
    rnet: RunnableModel,
    onet: RunnableModel,
}

impl std::fmt::Debug for MtcnnModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtcnnModel")
            .field("cached_pnet_plans", &self.pnet_plans.len())
            .finish_non_exhaustive()
    }
}

impl MtcnnModel {
    /// Parse all three networks. R-Net and O-Net are optimized up front.
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let pnet = parse_onnx(&paths.pnet)?;
        let rnet = load_fixed(&paths.rnet, RNET_INPUT)?;
        let onet = load_fixed(&paths.onet, ONET_INPUT)?;
        debug!(
            "MTCNN cascade loaded (pnet={}, rnet={}, onet={})",
            paths.pnet.display(),
            paths.rnet.display(),
            paths.onet.display()
        );
        Ok(Self {
            pnet,
            pnet_plans: PlanCache::new(
                NonZeroUsize::new(PNET_PLAN_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
            rnet,
            onet,
        })
    }

    /// Run P-Net on a normalized `(3, height, width)` tensor.
    pub fn run_pnet(&self, chw: ArrayView3<'_, f32>) -> Result<ProposalMaps> {
        let (_, height, width) = chw.dim();
        let plan = self.pnet_plans.get_or_build((height, width), || {
            debug!("building P-Net plan for {width}x{height}");
            specialize(self.pnet.clone(), height, width)
        })?;
        let outputs = run_plan(&plan, chw, "P-Net")?;
        split_proposal_outputs(&outputs)
    }

    /// Run R-Net on a normalized `(3, 24, 24)` crop.
    pub fn run_rnet(&self, chw: ArrayView3<'_, f32>) -> Result<RefineOutput> {
        let outputs = run_plan(&self.rnet, chw, "R-Net")?;
        split_refine_outputs(&outputs, "R-Net")
    }

    /// Run O-Net on a normalized `(3, 48, 48)` crop.
    pub fn run_onet(&self, chw: ArrayView3<'_, f32>) -> Result<RefineOutput> {
        let outputs = run_plan(&self.onet, chw, "O-Net")?;
        let refined = split_refine_outputs(&outputs, "O-Net")?;
        anyhow::ensure!(refined.landmarks.is_some(), "O-Net produced no landmarks");
        Ok(refined)
    }
}

fn parse_onnx(path: &Path) -> Result<InferenceModel> {
    anyhow::ensure!(path.exists(), "model file not found: {}", path.display());
    tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))
}

fn load_fixed(path: &Path, side: usize) -> Result<RunnableModel> {
    let model = parse_onnx(path)?;
    specialize(model, side, side)
        .with_context(|| format!("unable to prepare {} for {side}x{side} input", path.display()))
}

fn specialize(model: InferenceModel, height: usize, width: usize) -> Result<RunnableModel> {
    let model = model
        .with_input_fact(0, f32::fact([1, 3, height, width]).into())
        .map_err(|e| anyhow::anyhow!("unable to set input shape: {e}"))?;

    match model.clone().into_optimized() {
        Ok(optimized) => optimized
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}")),
        Err(opt_err) => {
            warn!(
                "graph optimization failed for {width}x{height} input ({opt_err}); \
                 falling back to decluttered graph"
            );
            model
                .into_typed()
                .map_err(|e| anyhow::anyhow!("unable to type-check graph: {e}"))?
                .into_decluttered()
                .map_err(|e| anyhow::anyhow!("unable to declutter graph: {e}"))?
                .into_runnable()
                .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
        }
    }
}

fn run_plan(plan: &RunnableModel, chw: ArrayView3<'_, f32>, name: &str) -> Result<Vec<Tensor>> {
    let (channels, height, width) = chw.dim();
    anyhow::ensure!(channels == 3, "{name} expects 3 channels, got {channels}");
    let data = chw.as_standard_layout();
    let slice = data.as_slice().context("input tensor is not contiguous")?;
    let input = Tensor::from_shape(&[1, 3, height, width], slice)
        .map_err(|e| anyhow::anyhow!("failed to build {name} input tensor: {e}"))?;
    let outputs = plan
        .run(tvec![input.into()])
        .map_err(|e| anyhow::anyhow!("{name} execution failed: {e}"))?;
    Ok(outputs.into_iter().map(|value| value.into_tensor()).collect())
}

fn f32_slice<'a>(tensor: &'a Tensor, what: &str) -> Result<&'a [f32]> {
    tensor
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("{what} output is not f32: {e}"))
}

/// Pick P-Net's probability and regression maps out of its outputs by channel count.
fn split_proposal_outputs(outputs: &[Tensor]) -> Result<ProposalMaps> {
    let mut prob = None;
    let mut reg = None;
    for tensor in outputs {
        match tensor.shape() {
            [1, PROB_WIDTH, rows, cols] => {
                let data = f32_slice(tensor, "P-Net probability")?;
                // Channel 1 holds the face probability.
                let face = &data[rows * cols..];
                prob = Some(Array2::from_shape_vec((*rows, *cols), face.to_vec())?);
            }
            [1, REG_WIDTH, rows, cols] => {
                let data = f32_slice(tensor, "P-Net regression")?;
                reg = Some(Array3::from_shape_vec((REG_WIDTH, *rows, *cols), data.to_vec())?);
            }
            other => anyhow::bail!("unexpected P-Net output shape {:?}", other),
        }
    }

    let prob = prob.context("P-Net produced no probability map")?;
    let reg = reg.context("P-Net produced no regression map")?;
    anyhow::ensure!(
        prob.dim() == (reg.dim().1, reg.dim().2),
        "P-Net probability {:?} and regression {:?} maps disagree",
        prob.dim(),
        reg.dim()
    );
    Ok(ProposalMaps { prob, reg })
}

/// Sort R-Net/O-Net outputs by their trailing width: 2 = probability, 4 = regression,
/// 10 = landmarks.
fn split_refine_outputs(outputs: &[Tensor], name: &str) -> Result<RefineOutput> {
    let mut score = None;
    let mut offsets = None;
    let mut landmarks = None;

    for tensor in outputs {
        let data = f32_slice(tensor, name)?;
        match tensor.shape() {
            [1, PROB_WIDTH] => score = Some(data[1]),
            [1, REG_WIDTH] => offsets = Some([data[0], data[1], data[2], data[3]]),
            [1, LANDMARK_WIDTH] => {
                let mut points = [0f32; LANDMARK_WIDTH];
                points.copy_from_slice(data);
                landmarks = Some(points);
            }
            other => anyhow::bail!("unexpected {name} output shape {:?}", other),
        }
    }

    Ok(RefineOutput {
        score: score.with_context(|| format!("{name} produced no probability"))?,
        offsets: offsets.with_context(|| format!("{name} produced no regression"))?,
        landmarks,
    })
}
