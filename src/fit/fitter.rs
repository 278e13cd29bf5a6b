//! Fitting engine: one model (function × pooling) against one observation set.
//!
//! Given:
//! - a function `f(θ, x)` with `k` parameters
//! - per-clade observations `(x_i, y_i, w_i)`
//! - a pooling strategy
//!
//! we minimize the weighted residual sum of squares `Σ w_i (y_i - f(θ, x_i))²`
//! (Gaussian noise with the variance profiled out):
//!
//! - unpooled: one independent minimization per clade
//! - pooled: one minimization over all observations
//! - partial-pooled: empirical Bayes by alternation. Clade vectors are fitted
//!   under a Gaussian prior `N(μ, diag(τ²))`, then `μ`, `τ²` and the noise
//!   variance are re-estimated from the clade fits and their conditional
//!   spread, until the objective stabilizes.

use nalgebra::DMatrix;
use tracing::debug;

use crate::domain::{
    CladeData, CladeEstimate, ConvergenceStatus, FitConfig, FitQuality, FitResult, FunctionKind,
    HyperEstimate, ModelSpec, ObservationSet, PoolingKind, Tree,
};
use crate::error::FitError;
use crate::fit::layout::{ParameterLayout, build_parameter_layout};
use crate::fit::optimizer::{CancelToken, minimize};
use crate::math::{diag_sqrt, hat_trace, jacobian, shrunk_covariance, standard_errors, weighted_information};

/// Floor applied to `RSS / n` before taking logarithms.
pub const MIN_MEAN_RSS: f64 = 1e-12;

/// Gaussian log-likelihood with the noise variance profiled out.
pub fn profile_log_likelihood(rss: f64, n: usize) -> f64 {
    if n == 0 {
        return f64::NAN;
    }
    let n = n as f64;
    let mean = (rss / n).max(MIN_MEAN_RSS);
    -0.5 * n * ((2.0 * std::f64::consts::PI * mean).ln() + 1.0)
}

/// Weighted residual sum of squares, `+∞` for unusable trial points.
///
/// Trial points whose predictions leave the function's output domain are
/// treated like non-finite ones.
pub fn weighted_rss(function: FunctionKind, params: &[f64], data: &CladeData) -> f64 {
    let domain = function.output_domain();
    let mut acc = 0.0;
    for i in 0..data.len() {
        let pred = function.predict(params, data.x[i]);
        if !domain.contains(pred) {
            return f64::INFINITY;
        }
        let r = data.y[i] - pred;
        acc += data.w[i] * r * r;
    }
    if acc.is_finite() { acc } else { f64::INFINITY }
}

/// Fit one model.
///
/// Cancellation is cooperative: when `cancel` is set during the run, the
/// result carries `ConvergenceStatus::Cancelled` and NaN parameters.
pub fn fit(
    model: ModelSpec,
    tree: &Tree,
    observations: &ObservationSet,
    config: &FitConfig,
    cancel: &CancelToken,
) -> Result<FitResult, FitError> {
    config.validate()?;
    check_lineages(tree, observations)?;
    let layout = build_parameter_layout(model.pooling, model.function, observations)?;
    for data in observations.clades() {
        model.function.check_data(&data.x, &data.y)?;
    }

    debug!(
        model = %model.label(),
        n = observations.len(),
        clades = layout.n_clades(),
        params = layout.len(),
        "fit started"
    );

    let result = match model.pooling {
        PoolingKind::Unpooled => fit_unpooled(model, &layout, observations, config, cancel)?,
        PoolingKind::Pooled => fit_pooled(model, &layout, observations, config, cancel)?,
        PoolingKind::PartialPooled => fit_partial(model, &layout, observations, config, cancel)?,
    };

    let mask = estimated_mask(&layout, observations);
    let non_finite = result
        .flat_params
        .iter()
        .zip(mask)
        .any(|(v, estimated)| estimated && !v.is_finite());
    if result.is_usable() && non_finite {
        return Err(FitError::NumericalInstability(format!(
            "{} produced non-finite estimates",
            model.label()
        )));
    }

    debug!(
        model = %model.label(),
        status = ?result.status,
        iterations = result.iterations,
        rss = result.quality.rss,
        "fit finished"
    );
    Ok(result)
}

fn check_lineages(tree: &Tree, observations: &ObservationSet) -> Result<(), FitError> {
    for rec in observations.records() {
        let ids = std::iter::once(&rec.lineage_a).chain(rec.lineage_b.as_ref());
        for id in ids {
            if tree.index_of(id).is_none() {
                return Err(FitError::UnresolvedLineage(format!(
                    "lineage '{id}' is not part of the tree"
                )));
            }
        }
    }
    Ok(())
}

/// Which slots of the flat vector are expected to hold finite estimates.
fn estimated_mask(layout: &ParameterLayout, observations: &ObservationSet) -> Vec<bool> {
    let mut mask = vec![true; layout.len()];
    if layout.pooling == PoolingKind::Pooled {
        return mask;
    }
    for (c, data) in observations.clades().iter().enumerate() {
        if data.is_empty() {
            for i in layout.clade_range(c) {
                mask[i] = false;
            }
        }
    }
    mask
}

fn fit_unpooled(
    model: ModelSpec,
    layout: &ParameterLayout,
    observations: &ObservationSet,
    config: &FitConfig,
    cancel: &CancelToken,
) -> Result<FitResult, FitError> {
    let f = model.function;
    let k = layout.k();
    let mut flat = vec![f64::NAN; layout.len()];
    let mut clades = Vec::with_capacity(layout.n_clades());
    let mut rss = 0.0;
    let mut iterations = 0;
    let mut status = ConvergenceStatus::Converged;
    let mut estimated = 0;

    for (c, data) in observations.clades().iter().enumerate() {
        if data.is_empty() {
            clades.push(unestimated(data, k));
            continue;
        }
        let start = f.initial_guess(&data.x, &data.y, &data.w)?;
        let m = minimize(|p: &[f64]| weighted_rss(f, p, data), &start, config, cancel)?;
        iterations += m.iterations;
        if m.status == ConvergenceStatus::Cancelled {
            return Ok(cancelled(model, layout, observations, iterations));
        }
        status = merge_status(status, m.status);

        flat[layout.clade_range(c)].copy_from_slice(&m.params);
        rss += m.cost;
        estimated += 1;
        clades.push(CladeEstimate {
            clade: data.name.clone(),
            n_obs: data.len(),
            estimated: true,
            std_errors: clade_std_errors(f, &m.params, data, m.cost),
            params: m.params,
        });
    }

    let n = observations.len();
    Ok(FitResult {
        model,
        clades,
        hyper: None,
        flat_params: flat,
        quality: quality(rss, n, (k * estimated) as f64),
        status,
        iterations,
        dataset: observations.fingerprint(),
    })
}

fn fit_pooled(
    model: ModelSpec,
    layout: &ParameterLayout,
    observations: &ObservationSet,
    config: &FitConfig,
    cancel: &CancelToken,
) -> Result<FitResult, FitError> {
    let f = model.function;
    let k = layout.k();
    let all = concat(observations);
    let start = f.initial_guess(&all.x, &all.y, &all.w)?;
    let m = minimize(|p: &[f64]| weighted_rss(f, p, &all), &start, config, cancel)?;
    if m.status == ConvergenceStatus::Cancelled {
        return Ok(cancelled(model, layout, observations, m.iterations));
    }

    let std_errors = clade_std_errors(f, &m.params, &all, m.cost);
    let clades = observations
        .clades()
        .iter()
        .map(|data| CladeEstimate {
            clade: data.name.clone(),
            n_obs: data.len(),
            estimated: true,
            params: m.params.clone(),
            std_errors: std_errors.clone(),
        })
        .collect();

    Ok(FitResult {
        model,
        clades,
        hyper: None,
        flat_params: m.params.clone(),
        quality: quality(m.cost, observations.len(), k as f64),
        status: m.status,
        iterations: m.iterations,
        dataset: observations.fingerprint(),
    })
}

/// Per-clade state of the partial-pooling alternation.
struct CladeFit<'a> {
    index: usize,
    data: &'a CladeData,
    theta: Vec<f64>,
    rss: f64,
}

fn fit_partial(
    model: ModelSpec,
    layout: &ParameterLayout,
    observations: &ObservationSet,
    config: &FitConfig,
    cancel: &CancelToken,
) -> Result<FitResult, FitError> {
    let f = model.function;
    let k = layout.k();
    let n = observations.len();

    // Pooled fit seeds the hyper-mean and the noise variance.
    let all = concat(observations);
    let start = f.initial_guess(&all.x, &all.y, &all.w)?;
    let pooled = minimize(|p: &[f64]| weighted_rss(f, p, &all), &start, config, cancel)?;
    let mut iterations = pooled.iterations;
    if pooled.status == ConvergenceStatus::Cancelled {
        return Ok(cancelled(model, layout, observations, iterations));
    }

    let noise_floor = 1e-15 * (1.0 + all.y.iter().map(|y| y * y).sum::<f64>() / n as f64);
    let mut sigma2 = (pooled.cost / n as f64).max(noise_floor);
    let mut mean = pooled.params.clone();

    let mut fits: Vec<CladeFit> = Vec::new();
    for (c, data) in observations.clades().iter().enumerate() {
        if data.is_empty() {
            continue;
        }
        let theta = if data.len() >= k {
            f.initial_guess(&data.x, &data.y, &data.w)
                .ok()
                .filter(|g| weighted_rss(f, g, data).is_finite())
                .unwrap_or_else(|| mean.clone())
        } else {
            mean.clone()
        };
        let rss = weighted_rss(f, &theta, data);
        fits.push(CladeFit {
            index: c,
            data,
            theta,
            rss,
        });
    }

    let floor2 = config.dispersion_floor * config.dispersion_floor;
    let mut tau2: Vec<f64> = (0..k)
        .map(|j| {
            let spread = fits
                .iter()
                .map(|cf| (cf.theta[j] - mean[j]).powi(2))
                .sum::<f64>()
                / fits.len() as f64;
            let scale = (0.25 * mean[j]).powi(2);
            spread.max(scale).max(floor2)
        })
        .collect();

    let mut status = ConvergenceStatus::MaxIterations;
    let mut last_objective = f64::NAN;
    let mut watch = DivergenceWatch::default();

    for round in 0..config.outer_iters {
        let mut round_status = ConvergenceStatus::Converged;
        for cf in fits.iter_mut() {
            let data = cf.data;
            let penalized = |p: &[f64]| {
                let rss = weighted_rss(f, p, data);
                rss + sigma2 * prior_penalty(p, &mean, &tau2)
            };
            let start = if penalized(cf.theta.as_slice()).is_finite() {
                cf.theta.clone()
            } else {
                mean.clone()
            };
            let m = minimize(penalized, &start, config, cancel)?;
            iterations += m.iterations;
            if m.status == ConvergenceStatus::Cancelled {
                return Ok(cancelled(model, layout, observations, iterations));
            }
            round_status = merge_status(round_status, m.status);
            cf.rss = weighted_rss(f, &m.params, data);
            cf.theta = m.params;
        }

        let covs = posterior_covariances(f, &fits, sigma2, &tau2)?;

        for j in 0..k {
            mean[j] = fits.iter().map(|cf| cf.theta[j]).sum::<f64>() / fits.len() as f64;
        }
        for j in 0..k {
            let v = fits
                .iter()
                .zip(&covs)
                .map(|(cf, cov)| (cf.theta[j] - mean[j]).powi(2) + cov[(j, j)])
                .sum::<f64>()
                / fits.len() as f64;
            tau2[j] = v.max(floor2);
        }
        check_hyper_range(model, &mean, &tau2, config.param_bound)?;
        let rss: f64 = fits.iter().map(|cf| cf.rss).sum();
        sigma2 = (rss / n as f64).max(noise_floor);

        let objective = hierarchical_objective(&fits, &mean, &tau2, sigma2, n);
        if !objective.is_finite() {
            return Err(FitError::NumericalInstability(format!(
                "{}: partial-pooling objective became non-finite in round {round}",
                model.label()
            )));
        }
        if watch.observe(objective, config.outer_tolerance) {
            return Err(FitError::OptimizationDivergence(format!(
                "{}: partial-pooling objective kept growing through round {round} (now {objective})",
                model.label()
            )));
        }
        let settled = last_objective.is_finite()
            && (objective - last_objective).abs() <= config.outer_tolerance * (1.0 + last_objective.abs());
        last_objective = objective;
        if settled {
            status = round_status;
            break;
        }
    }

    // Final spread and shrinkage discount under the settled hyper-parameters.
    let covs = posterior_covariances(f, &fits, sigma2, &tau2)?;
    let mut discount = 0.0;
    let mut flat = vec![f64::NAN; layout.len()];
    let mut clades: Vec<CladeEstimate> = observations.clades().iter().map(|d| unestimated(d, k)).collect();
    for (cf, cov) in fits.iter().zip(&covs) {
        let jac = jacobian(|p, x| f.predict(p, x), &cf.theta, &cf.data.x);
        if let Some(jac) = jac {
            let info = weighted_information(&jac, &cf.data.w);
            discount += hat_trace(cov, &info, sigma2);
        }
        flat[layout.clade_range(cf.index)].copy_from_slice(&cf.theta);
        clades[cf.index] = CladeEstimate {
            clade: cf.data.name.clone(),
            n_obs: cf.data.len(),
            estimated: true,
            params: cf.theta.clone(),
            std_errors: diag_sqrt(cov),
        };
    }

    let dispersion: Vec<f64> = tau2.iter().map(|v| v.sqrt()).collect();
    if let Some(hyper) = layout.hyper() {
        flat[hyper.mean.clone()].copy_from_slice(&mean);
        flat[hyper.dispersion.clone()].copy_from_slice(&dispersion);
    }

    let estimated = fits.len();
    let effective = (k as f64 + discount).clamp(k as f64, (k * estimated) as f64);
    let rss: f64 = fits.iter().map(|cf| cf.rss).sum();

    Ok(FitResult {
        model,
        clades,
        hyper: Some(HyperEstimate { mean, dispersion }),
        flat_params: flat,
        quality: quality(rss, n, effective),
        status,
        iterations,
        dataset: observations.fingerprint(),
    })
}

/// Consecutive non-shrinking rises of the alternation objective that count
/// as divergence.
const DIVERGENT_ROUNDS: usize = 4;

/// Tracks the alternation objective round to round.
///
/// A converging alternation may rise for a while, but its rises shrink.
/// Rises that keep growing mean the hyper-parameters are running away.
#[derive(Debug, Default)]
struct DivergenceWatch {
    last: Option<f64>,
    last_rise: f64,
    growing: usize,
}

impl DivergenceWatch {
    /// Record one round; true once the objective has diverged.
    fn observe(&mut self, objective: f64, tolerance: f64) -> bool {
        let Some(last) = self.last.replace(objective) else {
            return false;
        };
        let rise = objective - last;
        if rise <= tolerance * (1.0 + last.abs()) {
            self.growing = 0;
            self.last_rise = 0.0;
            return false;
        }
        self.growing = if rise >= self.last_rise { self.growing + 1 } else { 1 };
        self.last_rise = rise;
        self.growing >= DIVERGENT_ROUNDS
    }
}

fn check_hyper_range(model: ModelSpec, mean: &[f64], tau2: &[f64], bound: f64) -> Result<(), FitError> {
    let mean_ok = mean.iter().all(|m| m.is_finite() && m.abs() <= bound);
    let spread_ok = tau2.iter().all(|v| v.is_finite() && v.sqrt() <= bound);
    if mean_ok && spread_ok {
        return Ok(());
    }
    Err(FitError::OptimizationDivergence(format!(
        "{}: hyper-parameters left the finite range (mean={mean:?}, dispersion²={tau2:?})",
        model.label()
    )))
}

/// `Σ_j (θ_j - μ_j)² / τ_j²`
fn prior_penalty(theta: &[f64], mean: &[f64], tau2: &[f64]) -> f64 {
    theta
        .iter()
        .zip(mean)
        .zip(tau2)
        .map(|((t, m), v)| (t - m).powi(2) / v)
        .sum()
}

/// Conditional covariance of every clade vector given the hyper-parameters.
fn posterior_covariances(
    f: FunctionKind,
    fits: &[CladeFit],
    sigma2: f64,
    tau2: &[f64],
) -> Result<Vec<DMatrix<f64>>, FitError> {
    fits.iter()
        .map(|cf| {
            let jac = jacobian(|p, x| f.predict(p, x), &cf.theta, &cf.data.x).ok_or_else(|| {
                FitError::NumericalInstability(format!(
                    "non-finite sensitivities for clade '{}'",
                    cf.data.name
                ))
            })?;
            let info = weighted_information(&jac, &cf.data.w);
            shrunk_covariance(&info, sigma2, tau2).ok_or_else(|| {
                FitError::NumericalInstability(format!(
                    "posterior covariance for clade '{}' is not invertible",
                    cf.data.name
                ))
            })
        })
        .collect()
}

/// Negative log joint density (up to constants) tracked for convergence.
fn hierarchical_objective(fits: &[CladeFit], mean: &[f64], tau2: &[f64], sigma2: f64, n: usize) -> f64 {
    let rss: f64 = fits.iter().map(|cf| cf.rss).sum();
    let log_tau: f64 = tau2.iter().map(|v| v.ln()).sum();
    let prior: f64 = fits
        .iter()
        .map(|cf| prior_penalty(&cf.theta, mean, tau2) + log_tau)
        .sum();
    rss / sigma2 + n as f64 * sigma2.ln() + prior
}

fn clade_std_errors(f: FunctionKind, params: &[f64], data: &CladeData, rss: f64) -> Option<Vec<f64>> {
    let k = params.len();
    if data.len() <= k {
        return None;
    }
    let sigma2 = rss / (data.len() - k) as f64;
    let jac = jacobian(|p, x| f.predict(p, x), params, &data.x)?;
    standard_errors(&weighted_information(&jac, &data.w), sigma2)
}

fn concat(observations: &ObservationSet) -> CladeData {
    let mut all = CladeData {
        name: "all".to_string(),
        ..CladeData::default()
    };
    for data in observations.clades() {
        all.x.extend_from_slice(&data.x);
        all.y.extend_from_slice(&data.y);
        all.w.extend_from_slice(&data.w);
    }
    all
}

fn quality(rss: f64, n: usize, effective_params: f64) -> FitQuality {
    FitQuality {
        rss,
        log_likelihood: profile_log_likelihood(rss, n),
        n,
        effective_params,
    }
}

fn merge_status(a: ConvergenceStatus, b: ConvergenceStatus) -> ConvergenceStatus {
    use ConvergenceStatus::*;
    match (a, b) {
        (Cancelled, _) | (_, Cancelled) => Cancelled,
        (MaxIterations, _) | (_, MaxIterations) => MaxIterations,
        _ => Converged,
    }
}

fn unestimated(data: &CladeData, k: usize) -> CladeEstimate {
    CladeEstimate {
        clade: data.name.clone(),
        n_obs: data.len(),
        estimated: false,
        params: vec![f64::NAN; k],
        std_errors: None,
    }
}

fn cancelled(
    model: ModelSpec,
    layout: &ParameterLayout,
    observations: &ObservationSet,
    iterations: u64,
) -> FitResult {
    let k = layout.k();
    let hyper = layout.hyper().map(|_| HyperEstimate {
        mean: vec![f64::NAN; k],
        dispersion: vec![f64::NAN; k],
    });
    FitResult {
        model,
        clades: observations
            .clades()
            .iter()
            .map(|d| unestimated(d, k))
            .collect(),
        hyper,
        flat_params: vec![f64::NAN; layout.len()],
        quality: FitQuality {
            rss: f64::NAN,
            log_likelihood: f64::NAN,
            n: observations.len(),
            effective_params: f64::NAN,
        },
        status: ConvergenceStatus::Cancelled,
        iterations,
        dataset: observations.fingerprint(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CladeMap, CrossObservation, Lineage};

    fn tree() -> Tree {
        Tree::new(vec![
            Lineage::new("R", None, 0.0),
            Lineage::new("X", Some("R"), 1.0),
            Lineage::new("Y", Some("R"), 1.0),
            Lineage::new("A", Some("X"), 1.0),
            Lineage::new("B", Some("X"), 1.0),
            Lineage::new("C", Some("Y"), 2.0),
            Lineage::new("D", Some("Y"), 0.5),
        ])
        .unwrap()
    }

    fn clades(tree: &Tree) -> CladeMap {
        CladeMap::from_roots(tree, &[("left", "X"), ("right", "Y")]).unwrap()
    }

    /// Noise-free linear data with different slopes per clade.
    fn linear_data(tree: &Tree, per_clade: usize) -> ObservationSet {
        let mut records = Vec::new();
        for i in 0..per_clade {
            let x = i as f64 * 0.25;
            records.push(CrossObservation::pair("A", "B", x, 0.1 + 0.5 * x));
            records.push(CrossObservation::pair("C", "D", x, 0.2 + 1.5 * x));
        }
        ObservationSet::new(records, tree, &clades(tree)).unwrap()
    }

    fn config() -> FitConfig {
        FitConfig {
            parallel: false,
            ..FitConfig::default()
        }
    }

    fn linear(pooling: PoolingKind) -> ModelSpec {
        ModelSpec::new(FunctionKind::Linear, pooling)
    }

    #[test]
    fn unpooled_recovers_each_clade() {
        let tree = tree();
        let obs = linear_data(&tree, 6);
        let result = fit(linear(PoolingKind::Unpooled), &tree, &obs, &config(), &CancelToken::new()).unwrap();
        assert_eq!(result.status, ConvergenceStatus::Converged);
        let left = result.clade("left").unwrap();
        let right = result.clade("right").unwrap();
        assert!((left.params[1] - 0.5).abs() < 1e-4);
        assert!((right.params[1] - 1.5).abs() < 1e-4);
        assert_eq!(result.flat_params.len(), 4);
        assert_eq!(result.quality.effective_params, 4.0);
    }

    #[test]
    fn pooled_shares_one_vector() {
        let tree = tree();
        let obs = linear_data(&tree, 6);
        let result = fit(linear(PoolingKind::Pooled), &tree, &obs, &config(), &CancelToken::new()).unwrap();
        assert_eq!(result.flat_params.len(), 2);
        assert_eq!(result.clades[0].params, result.clades[1].params);
        // Average slope of the two clades.
        assert!((result.flat_params[1] - 1.0).abs() < 1e-3);
        assert!(result.quality.rss > 0.1);
        assert_eq!(result.quality.effective_params, 2.0);
    }

    #[test]
    fn partial_pooling_sits_between_extremes() {
        let tree = tree();
        let obs = linear_data(&tree, 6);
        let c = config();
        let token = CancelToken::new();
        let un = fit(linear(PoolingKind::Unpooled), &tree, &obs, &c, &token).unwrap();
        let po = fit(linear(PoolingKind::Pooled), &tree, &obs, &c, &token).unwrap();
        let pp = fit(linear(PoolingKind::PartialPooled), &tree, &obs, &c, &token).unwrap();

        assert_eq!(pp.flat_params.len(), 2 * 2 + 2 * 2);
        let hyper = pp.hyper.as_ref().unwrap();
        assert!(hyper.dispersion.iter().all(|d| *d >= c.dispersion_floor));
        assert!(pp.quality.rss <= po.quality.rss + 1e-9);
        assert!(po.quality.effective_params <= pp.quality.effective_params);
        assert!(pp.quality.effective_params <= un.quality.effective_params);
    }

    #[test]
    fn empty_clade_is_unestimated() {
        let tree = tree();
        let records: Vec<_> = (0..4)
            .map(|i| CrossObservation::pair("A", "B", i as f64, 1.0 + i as f64))
            .collect();
        let obs = ObservationSet::new(records, &tree, &clades(&tree)).unwrap();
        let result = fit(linear(PoolingKind::Unpooled), &tree, &obs, &config(), &CancelToken::new()).unwrap();
        let right = result.clade("right").unwrap();
        assert!(!right.estimated);
        assert!(right.params.iter().all(|v| v.is_nan()));
        assert!(result.clade("left").unwrap().estimated);

        let pooled = fit_err(linear(PoolingKind::Pooled), &tree, &obs);
        assert!(matches!(pooled, FitError::InsufficientData(_)));
    }

    fn fit_err(model: ModelSpec, tree: &Tree, obs: &ObservationSet) -> FitError {
        fit(model, tree, obs, &config(), &CancelToken::new()).unwrap_err()
    }

    #[test]
    fn out_of_domain_data_is_rejected() {
        let tree = tree();
        let records: Vec<_> = (0..4)
            .flat_map(|i| {
                let x = i as f64;
                [
                    CrossObservation::pair("A", "B", x, 1.5),
                    CrossObservation::pair("C", "D", x, 0.5),
                ]
            })
            .collect();
        let obs = ObservationSet::new(records, &tree, &clades(&tree)).unwrap();
        let err = fit_err(ModelSpec::new(FunctionKind::Logistic, PoolingKind::Pooled), &tree, &obs);
        assert!(matches!(err, FitError::DomainError(_)));
    }

    #[test]
    fn cancelled_fit_is_marked_unusable() {
        let tree = tree();
        let obs = linear_data(&tree, 6);
        let token = CancelToken::new();
        token.cancel();
        let result = fit(linear(PoolingKind::PartialPooled), &tree, &obs, &config(), &token).unwrap();
        assert_eq!(result.status, ConvergenceStatus::Cancelled);
        assert!(!result.is_usable());
        assert!(result.flat_params.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn runaway_parameters_are_divergence() {
        let tree = tree();
        let obs = linear_data(&tree, 6);
        let tight = FitConfig {
            param_bound: 1.0,
            ..config()
        };
        // Right clade's slope is 1.5, beyond the bound.
        for pooling in [PoolingKind::Unpooled, PoolingKind::PartialPooled] {
            let err = fit(linear(pooling), &tree, &obs, &tight, &CancelToken::new()).unwrap_err();
            assert!(matches!(err, FitError::OptimizationDivergence(_)), "{pooling:?}: {err}");
        }
    }

    #[test]
    fn overflowing_residuals_are_instability() {
        let tree = tree();
        let records: Vec<_> = (0..4)
            .flat_map(|i| {
                let y = if i % 2 == 0 { 1e200 } else { -1e200 };
                [
                    CrossObservation::pair("A", "B", i as f64, y),
                    CrossObservation::pair("C", "D", i as f64, -y),
                ]
            })
            .collect();
        let obs = ObservationSet::new(records, &tree, &clades(&tree)).unwrap();
        for pooling in PoolingKind::ALL {
            let err = fit_err(linear(pooling), &tree, &obs);
            assert!(matches!(err, FitError::NumericalInstability(_)), "{pooling:?}: {err}");
        }
    }

    #[test]
    fn growing_objective_trips_the_watch() {
        let mut watch = DivergenceWatch::default();
        let tripped: Vec<bool> = [1.0, 2.0, 4.0, 8.0, 16.0]
            .into_iter()
            .map(|v| watch.observe(v, 1e-8))
            .collect();
        assert_eq!(tripped, vec![false, false, false, false, true]);
    }

    #[test]
    fn settling_rises_do_not_trip_the_watch() {
        let mut watch = DivergenceWatch::default();
        let mut v = 10.0;
        let mut step = 1.0;
        for _ in 0..30 {
            assert!(!watch.observe(v, 1e-8));
            v += step;
            step *= 0.5;
        }
        // Falling objectives reset the count.
        for v in [5.0, 6.0, 7.0, 8.0, 4.0, 5.0, 6.0] {
            assert!(!watch.observe(v, 1e-8));
        }
    }

    #[test]
    fn partial_pooling_recovers_well_separated_clades() {
        let tree = tree();
        let obs = linear_data(&tree, 12);
        let result = fit(linear(PoolingKind::PartialPooled), &tree, &obs, &config(), &CancelToken::new()).unwrap();
        assert!(result.is_usable());
        let left = result.clade("left").unwrap();
        let right = result.clade("right").unwrap();
        assert!((left.params[1] - 0.5).abs() < 1e-2, "{left:?}");
        assert!((right.params[1] - 1.5).abs() < 1e-2, "{right:?}");
        let hyper = result.hyper.unwrap();
        assert!((hyper.mean[1] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn log_likelihood_uses_floor() {
        let ll = profile_log_likelihood(0.0, 10);
        assert!(ll.is_finite());
        assert!(profile_log_likelihood(1.0, 10) < ll);
    }
}
