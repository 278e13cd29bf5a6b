//! Synthetic cross observations from a known model.
//!
//! For each clade the simulator assigns the clade's true parameter vector
//! (shared under pooling, per clade when unpooled, drawn from the hyper
//! distribution when partially pooled), lays out crosses according to the
//! design, evaluates the function and adds noise.
//!
//! Every call owns its random generator seeded from the request, so identical
//! requests produce identical datasets.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    CladeMap, CrossObservation, FunctionKind, HyperEstimate, Interval, ModelSpec, ObservationSet,
    PoolingKind, Tree,
};
use crate::error::FitError;
use crate::fit::ParameterLayout;
use crate::math::lin_space;

/// Relative spread of unpooled reference parameters across clades.
const REFERENCE_CLADE_SPREAD: f64 = 0.1;
/// Relative hyper-dispersion of partial-pooled reference parameters.
const REFERENCE_DISPERSION: f64 = 0.02;
/// Default Gaussian noise scale.
pub const DEFAULT_NOISE_SD: f64 = 0.01;

/// Where the true parameters come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterSource {
    /// Flat vector in simulation layout: `k × C` (unpooled), `k` (pooled) or
    /// `2k` means then dispersions (partial-pooled).
    Given(Vec<f64>),
    /// Deterministic spread around the function's reference vector.
    Reference,
}

/// Observation noise added to the evaluated function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NoiseModel {
    None,
    /// Additive Gaussian noise; results are clamped into the output domain.
    Gaussian { sd: f64 },
    /// 0/1 outcome with probability `f(x)` (functions with outputs in [0, 1]).
    Bernoulli,
}

impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel::Gaussian {
            sd: DEFAULT_NOISE_SD,
        }
    }
}

/// Which crosses are observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CrossDesign {
    /// Every unordered pair of tips within each clade.
    AllPairs,
    /// `n` tip pairs per clade, drawn with replacement.
    SampledPairs(usize),
    /// Explicit x values per clade, attached to the clade's anchor lineage.
    Grid(Vec<f64>),
}

/// Everything needed to simulate one dataset.
#[derive(Debug, Clone)]
pub struct SimulationRequest<'a> {
    pub tree: &'a Tree,
    pub clades: &'a CladeMap,
    pub model: ModelSpec,
    pub parameters: ParameterSource,
    pub noise: NoiseModel,
    pub design: CrossDesign,
    pub seed: u64,
}

impl<'a> SimulationRequest<'a> {
    /// Reference parameters, default noise and all within-clade pairs.
    pub fn new(tree: &'a Tree, clades: &'a CladeMap, model: ModelSpec, seed: u64) -> Self {
        Self {
            tree,
            clades,
            model,
            parameters: ParameterSource::Reference,
            noise: NoiseModel::default(),
            design: CrossDesign::AllPairs,
            seed,
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterSource) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_noise(mut self, noise: NoiseModel) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_design(mut self, design: CrossDesign) -> Self {
        self.design = design;
        self
    }
}

/// True parameters behind a simulated dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationTruth {
    /// One vector per clade, in clade order.
    pub clade_params: Vec<Vec<f64>>,
    /// Hyper block for partial-pooled simulations.
    pub hyper: Option<HyperEstimate>,
}

#[derive(Debug, Clone)]
pub struct SimulatedDataset {
    pub observations: ObservationSet,
    pub model: ModelSpec,
    pub truth: SimulationTruth,
    pub seed: u64,
}

/// Simulate one dataset.
pub fn simulate(request: &SimulationRequest<'_>) -> Result<SimulatedDataset, FitError> {
    let f = request.model.function;
    let n_clades = request.clades.len();
    if n_clades == 0 {
        return Err(FitError::InvalidInput("no clades to simulate".to_string()));
    }
    if let NoiseModel::Bernoulli = request.noise {
        if f.output_domain() != Interval::UNIT {
            return Err(FitError::DomainError(format!(
                "bernoulli noise needs outputs in [0, 1]; {} is unbounded",
                f.name()
            )));
        }
    }

    let mut rng = StdRng::seed_from_u64(request.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| FitError::InvalidInput(format!("noise distribution: {e}")))?;

    let truth = true_parameters(request, n_clades, &mut rng, &normal)?;

    let mut records = Vec::new();
    for (ci, theta) in truth.clade_params.iter().enumerate() {
        for (a, b, x) in design_points(request, ci, &mut rng)? {
            let clean = f.evaluate(theta, x)?;
            let y = add_noise(request.noise, clean, f.output_domain(), &mut rng, &normal)?;
            let rec = match b {
                Some(b) => CrossObservation::pair(a, b, x, y),
                None => CrossObservation::single(a, x, y),
            };
            records.push(rec);
        }
    }

    let observations = ObservationSet::new(records, request.tree, request.clades)?;
    debug!(
        model = %request.model.label(),
        seed = request.seed,
        n = observations.len(),
        "simulated dataset"
    );

    Ok(SimulatedDataset {
        observations,
        model: request.model,
        truth,
        seed: request.seed,
    })
}

fn true_parameters(
    request: &SimulationRequest<'_>,
    n_clades: usize,
    rng: &mut StdRng,
    normal: &Normal<f64>,
) -> Result<SimulationTruth, FitError> {
    let f = request.model.function;
    let k = f.param_count();
    let pooling = request.model.pooling;

    let flat = match &request.parameters {
        ParameterSource::Given(flat) => {
            let expected = ParameterLayout::simulation_len(pooling, f, n_clades);
            if flat.len() != expected {
                return Err(FitError::InvalidParameterShape(format!(
                    "{} expects {expected} parameters for {n_clades} clades, got {}",
                    request.model.label(),
                    flat.len()
                )));
            }
            if flat.iter().any(|v| !v.is_finite()) {
                return Err(FitError::InvalidInput(format!(
                    "non-finite simulation parameters {flat:?}"
                )));
            }
            flat.clone()
        }
        ParameterSource::Reference => reference_flat(f, pooling, n_clades),
    };

    let truth = match pooling {
        PoolingKind::Unpooled => SimulationTruth {
            clade_params: flat.chunks(k).map(<[f64]>::to_vec).collect(),
            hyper: None,
        },
        PoolingKind::Pooled => SimulationTruth {
            clade_params: vec![flat.clone(); n_clades],
            hyper: None,
        },
        PoolingKind::PartialPooled => {
            let mean = flat[..k].to_vec();
            let dispersion = flat[k..].to_vec();
            if dispersion.iter().any(|d| *d < 0.0) {
                return Err(FitError::InvalidInput(format!(
                    "hyper-dispersions must be >= 0, got {dispersion:?}"
                )));
            }
            let clade_params = (0..n_clades)
                .map(|_| {
                    mean.iter()
                        .zip(&dispersion)
                        .map(|(m, d)| m + d * normal.sample(&mut *rng))
                        .collect()
                })
                .collect();
            SimulationTruth {
                clade_params,
                hyper: Some(HyperEstimate { mean, dispersion }),
            }
        }
    };
    Ok(truth)
}

/// Reference vector in simulation layout.
fn reference_flat(f: FunctionKind, pooling: PoolingKind, n_clades: usize) -> Vec<f64> {
    let base = f.reference_params();
    match pooling {
        PoolingKind::Unpooled => {
            let offsets = if n_clades == 1 {
                vec![0.0]
            } else {
                lin_space(-1.0, 1.0, n_clades)
            };
            offsets
                .iter()
                .flat_map(|t| base.iter().map(move |b| b * (1.0 + REFERENCE_CLADE_SPREAD * t)))
                .collect()
        }
        PoolingKind::Pooled => base.to_vec(),
        PoolingKind::PartialPooled => base
            .iter()
            .copied()
            .chain(base.iter().map(|b| REFERENCE_DISPERSION * b.abs()))
            .collect(),
    }
}

type DesignPoint = (String, Option<String>, f64);

fn design_points(
    request: &SimulationRequest<'_>,
    ci: usize,
    rng: &mut StdRng,
) -> Result<Vec<DesignPoint>, FitError> {
    let tree = request.tree;
    let id = |n: usize| tree.node(n).id.clone();

    match &request.design {
        CrossDesign::AllPairs => {
            let tips = request.clades.member_tips(tree, ci);
            let mut out = Vec::new();
            for (i, &a) in tips.iter().enumerate() {
                for &b in &tips[i + 1..] {
                    out.push((id(a), Some(id(b)), tree.divergence_time(a, b)));
                }
            }
            Ok(out)
        }
        CrossDesign::SampledPairs(n) => {
            let tips = request.clades.member_tips(tree, ci);
            if tips.len() < 2 {
                return Err(FitError::InsufficientData(format!(
                    "clade '{}' has {} tips; sampling pairs needs at least 2",
                    request.clades.clades()[ci].name,
                    tips.len()
                )));
            }
            let m = tips.len();
            let out = (0..*n)
                .map(|_| {
                    let i = rng.gen_range(0..m);
                    let mut j = rng.gen_range(0..m - 1);
                    if j >= i {
                        j += 1;
                    }
                    let (a, b) = (tips[i], tips[j]);
                    (id(a), Some(id(b)), tree.divergence_time(a, b))
                })
                .collect();
            Ok(out)
        }
        CrossDesign::Grid(xs) => {
            if let Some(bad) = xs.iter().find(|x| !x.is_finite()) {
                return Err(FitError::InvalidInput(format!("non-finite grid value {bad}")));
            }
            let anchor = id(request.clades.clades()[ci].anchor);
            Ok(xs.iter().map(|&x| (anchor.clone(), None, x)).collect())
        }
    }
}

fn add_noise(
    noise: NoiseModel,
    clean: f64,
    domain: Interval,
    rng: &mut StdRng,
    normal: &Normal<f64>,
) -> Result<f64, FitError> {
    match noise {
        NoiseModel::None => Ok(clean),
        NoiseModel::Gaussian { sd } => {
            if !(sd.is_finite() && sd >= 0.0) {
                return Err(FitError::InvalidInput(format!(
                    "noise sd must be finite and >= 0, got {sd}"
                )));
            }
            Ok(domain.clamp(clean + sd * normal.sample(rng)))
        }
        NoiseModel::Bernoulli => Ok(if rng.r#gen::<f64>() < clean { 1.0 } else { 0.0 }),
    }
}
