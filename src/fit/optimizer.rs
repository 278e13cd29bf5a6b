//! Derivative-free minimization (argmin Nelder–Mead) with restarts and
//! cooperative cancellation.
//!
//! Objectives are plain `Fn(&[f64]) -> f64` closures. Non-finite values are
//! mapped to `+∞` inside the search so such trial points are never accepted;
//! the caller's start point and the returned optimum must be finite. An
//! optimum beyond `FitConfig::param_bound` counts as diverged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use tracing::trace;

use crate::domain::{ConvergenceStatus, FitConfig};
use crate::error::FitError;

/// Shared cancellation flag, polled at every objective evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one minimization.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: u64,
    pub status: ConvergenceStatus,
}

impl Minimum {
    fn cancelled(k: usize, iterations: u64) -> Self {
        Self {
            params: vec![f64::NAN; k],
            cost: f64::NAN,
            iterations,
            status: ConvergenceStatus::Cancelled,
        }
    }
}

struct Objective<'a, F> {
    f: &'a F,
    cancel: &'a CancelToken,
}

impl<F> CostFunction for Objective<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::msg("cancelled"));
        }
        if p.iter().any(|v| !v.is_finite()) {
            return Ok(f64::INFINITY);
        }
        let v = (self.f)(p.as_slice());
        Ok(if v.is_finite() { v } else { f64::INFINITY })
    }
}

/// Axis-aligned starting simplex around `x0`.
fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for j in 0..x0.len() {
        let mut v = x0.to_vec();
        v[j] = if x0[j] != 0.0 { x0[j] * 1.05 } else { 0.00025 };
        simplex.push(v);
    }
    simplex
}

/// Minimize `objective` starting from `start`.
///
/// The search is restarted from the incumbent `config.restarts` times (a
/// fresh simplex escapes premature collapse); restarts stop early once they
/// no longer improve the objective.
pub fn minimize<F>(
    objective: F,
    start: &[f64],
    config: &FitConfig,
    cancel: &CancelToken,
) -> Result<Minimum, FitError>
where
    F: Fn(&[f64]) -> f64,
{
    let k = start.len();
    if k == 0 {
        return Err(FitError::InvalidParameterShape(
            "cannot minimize over zero parameters".to_string(),
        ));
    }
    if cancel.is_cancelled() {
        return Ok(Minimum::cancelled(k, 0));
    }
    let f0 = if start.iter().all(|v| v.is_finite()) {
        objective(start)
    } else {
        f64::NAN
    };
    if !f0.is_finite() {
        return Err(FitError::NumericalInstability(format!(
            "objective is not finite at the starting point {start:?}"
        )));
    }

    let mut best = start.to_vec();
    let mut best_cost = f0;
    let mut iterations = 0;
    let mut status = ConvergenceStatus::Converged;

    for round in 0..=config.restarts {
        let problem = Objective {
            f: &objective,
            cancel,
        };
        let solver = NelderMead::new(initial_simplex(&best))
            .with_sd_tolerance(config.tolerance)
            .map_err(|e| FitError::InvalidInput(format!("minimizer setup: {e}")))?;
        let run = Executor::new(problem, solver)
            .configure(|state| state.max_iters(config.max_iters))
            .run();

        if cancel.is_cancelled() {
            return Ok(Minimum::cancelled(k, iterations));
        }
        let res = run.map_err(|e| FitError::NumericalInstability(format!("minimizer failed: {e}")))?;
        let state = res.state();
        iterations += state.get_iter();
        status = match state.get_termination_status() {
            TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                ConvergenceStatus::MaxIterations
            }
            _ => ConvergenceStatus::Converged,
        };

        let Some(candidate) = state.get_best_param() else {
            break;
        };
        let cost = state.get_best_cost();
        let improved = cost < best_cost;
        let gain = best_cost - cost;
        if improved {
            best = candidate.clone();
            best_cost = cost;
        }
        trace!(round, cost = best_cost, "nelder-mead round finished");
        if !improved || gain <= config.tolerance * (1.0 + best_cost.abs()) {
            break;
        }
    }

    if best.iter().any(|v| !v.is_finite()) {
        return Err(FitError::OptimizationDivergence(format!(
            "minimizer left the finite range: {best:?}"
        )));
    }
    if let Some(v) = best.iter().find(|v| v.abs() > config.param_bound) {
        return Err(FitError::OptimizationDivergence(format!(
            "parameter {v} exceeds the bound {} at {best:?}",
            config.param_bound
        )));
    }
    if !best_cost.is_finite() {
        return Err(FitError::NumericalInstability(format!(
            "objective is not finite at the optimum {best:?}"
        )));
    }

    Ok(Minimum {
        params: best,
        cost: best_cost,
        iterations,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> FitConfig {
        FitConfig {
            parallel: false,
            ..FitConfig::default()
        }
    }

    #[test]
    fn minimizes_a_shifted_bowl() {
        let bowl = |p: &[f64]| (p[0] - 1.5).powi(2) + 3.0 * (p[1] + 0.5).powi(2);
        let m = minimize(bowl, &[0.0, 0.0], &quiet(), &CancelToken::new()).unwrap();
        assert_eq!(m.status, ConvergenceStatus::Converged);
        assert!((m.params[0] - 1.5).abs() < 1e-4);
        assert!((m.params[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn rejects_non_finite_start() {
        let f = |p: &[f64]| p[0].ln();
        let err = minimize(f, &[-1.0], &quiet(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, FitError::NumericalInstability(_)));
    }

    #[test]
    fn non_finite_trials_are_never_accepted() {
        // Objective is undefined for p < 0 and minimized at the boundary.
        let f = |p: &[f64]| if p[0] < 0.0 { f64::NAN } else { (p[0] - 0.2).powi(2) };
        let m = minimize(f, &[1.0], &quiet(), &CancelToken::new()).unwrap();
        assert!(m.params[0] >= 0.0);
        assert!(m.cost.is_finite());
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        let m = minimize(|p: &[f64]| p[0] * p[0], &[1.0], &quiet(), &token).unwrap();
        assert_eq!(m.status, ConvergenceStatus::Cancelled);
        assert!(m.params[0].is_nan());
    }

    #[test]
    fn runaway_optimum_is_divergence() {
        // Keeps improving as p grows; the search walks past the bound.
        let f = |p: &[f64]| 1.0 / (1.0 + p[0].abs());
        let config = FitConfig {
            param_bound: 10.0,
            ..quiet()
        };
        let err = minimize(f, &[1.0], &config, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, FitError::OptimizationDivergence(_)));
    }

    #[test]
    fn iteration_budget_is_reported() {
        let rosen = |p: &[f64]| (1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0] * p[0]).powi(2);
        let config = FitConfig {
            max_iters: 3,
            restarts: 0,
            ..quiet()
        };
        let m = minimize(rosen, &[-1.2, 1.0], &config, &CancelToken::new()).unwrap();
        assert_eq!(m.status, ConvergenceStatus::MaxIterations);
        assert!(m.iterations <= 3);
    }
}
