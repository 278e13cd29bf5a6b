//! Evaluation and initialization for the registered functional forms.
//!
//! The fitter relies on three primitive operations:
//! - `predict`: raw evaluation (may be non-finite; used inside objectives)
//! - `evaluate`: evaluation with domain checks (public contract)
//! - `initial_guess`: a data-driven starting point for the minimizer

use crate::domain::{FunctionKind, Interval};
use crate::error::FitError;
use crate::math::{lin_space, rate_grid, weighted_fit};

/// Grid resolution for rate parameters in initial guesses.
const RATE_STEPS: usize = 25;
/// Grid resolution for logistic rate and midpoint.
const LOGISTIC_RATE_STEPS: usize = 15;
const LOGISTIC_MIDPOINT_STEPS: usize = 11;

impl FunctionKind {
    /// Raw evaluation without domain checks.
    ///
    /// # Panics
    /// Panics if `p` is shorter than `self.param_count()`.
    pub fn predict(self, p: &[f64], x: f64) -> f64 {
        match self {
            FunctionKind::Linear => p[0] + p[1] * x,
            FunctionKind::Logistic => p[0] / (1.0 + (-p[1] * (x - p[2])).exp()),
            FunctionKind::Quadratic => p[0] + p[1] * x + p[2] * x * x,
            FunctionKind::Exponential => p[0] * (p[1] * x).exp(),
            FunctionKind::Asymptotic => p[0] - (p[0] - p[1]) * (-p[2] * x).exp(),
        }
    }

    /// Evaluate with shape and domain checks.
    pub fn evaluate(self, params: &[f64], x: f64) -> Result<f64, FitError> {
        let k = self.param_count();
        if params.len() != k {
            return Err(FitError::InvalidParameterShape(format!(
                "{} expects {k} parameters, got {}",
                self.name(),
                params.len()
            )));
        }
        if params.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NumericalInstability(format!(
                "{} called with non-finite parameters {params:?}",
                self.name()
            )));
        }
        if !self.input_domain().contains(x) {
            return Err(FitError::DomainError(format!(
                "{}: x={x} outside input domain {}",
                self.name(),
                describe(self.input_domain())
            )));
        }
        let y = self.predict(params, x);
        if !y.is_finite() {
            return Err(FitError::DomainError(format!(
                "{}: non-finite output at x={x} (overflow)",
                self.name()
            )));
        }
        if !self.output_domain().contains(y) {
            return Err(FitError::DomainError(format!(
                "{}: y={y} outside output domain {}",
                self.name(),
                describe(self.output_domain())
            )));
        }
        Ok(y)
    }

    /// Check observed data against the declared domains.
    pub fn check_data(self, x: &[f64], y: &[f64]) -> Result<(), FitError> {
        let dx = self.input_domain();
        let dy = self.output_domain();
        if let Some(bad) = x.iter().find(|v| !dx.contains(**v)) {
            return Err(FitError::DomainError(format!(
                "{}: observed x={bad} outside input domain {}",
                self.name(),
                describe(dx)
            )));
        }
        if let Some(bad) = y.iter().find(|v| !dy.contains(**v)) {
            return Err(FitError::DomainError(format!(
                "{}: observed y={bad} outside output domain {}",
                self.name(),
                describe(dy)
            )));
        }
        Ok(())
    }

    /// Data-driven starting point (weighted).
    ///
    /// Linear and quadratic forms are solved exactly by least squares. The
    /// others fix their nonlinear parameters on a deterministic grid, solve
    /// the remaining linear parameters at each node and keep the best node.
    pub fn initial_guess(self, x: &[f64], y: &[f64], w: &[f64]) -> Result<Vec<f64>, FitError> {
        if x.len() != y.len() || x.len() != w.len() {
            return Err(FitError::InvalidInput(format!(
                "length mismatch: x={}, y={}, w={}",
                x.len(),
                y.len(),
                w.len()
            )));
        }
        if x.is_empty() {
            return Err(FitError::InsufficientData(format!(
                "{}: no observations for an initial guess",
                self.name()
            )));
        }

        let summary = Summary::of(x, y);
        let guess = match self {
            FunctionKind::Linear => weighted_fit(x, y, w, 2, |t, row| {
                row[0] = 1.0;
                row[1] = t;
            })
            .map(|(beta, _)| beta),
            FunctionKind::Quadratic => weighted_fit(x, y, w, 3, |t, row| {
                row[0] = 1.0;
                row[1] = t;
                row[2] = t * t;
            })
            .map(|(beta, _)| beta),
            FunctionKind::Exponential => exponential_guess(x, y, w, &summary)?,
            FunctionKind::Logistic => logistic_guess(x, y, w, &summary)?,
            FunctionKind::Asymptotic => asymptotic_guess(x, y, w, &summary)?,
        };

        match guess {
            Some(g) if g.len() == self.param_count() && g.iter().all(|v| v.is_finite()) => Ok(g),
            _ => Ok(self.fallback_guess(&summary)),
        }
    }

    fn fallback_guess(self, s: &Summary) -> Vec<f64> {
        match self {
            FunctionKind::Linear => vec![s.y_mean, 0.0],
            FunctionKind::Quadratic => vec![s.y_mean, 0.0, 0.0],
            FunctionKind::Exponential => vec![if s.y_mean == 0.0 { 1.0 } else { s.y_mean }, 0.0],
            FunctionKind::Logistic => vec![
                Interval::UNIT.clamp(s.y_max).max(0.5),
                1.0 / s.span,
                s.x_mean,
            ],
            FunctionKind::Asymptotic => vec![s.y_max, s.y_min, 1.0 / s.span],
        }
    }
}

/// Evaluate a registered function by name.
pub fn evaluate(function_name: &str, params: &[f64], x: f64) -> Result<f64, FitError> {
    FunctionKind::from_name(function_name)?.evaluate(params, x)
}

/// Parameter count of a registered function.
pub fn parameter_count(function_name: &str) -> Result<usize, FitError> {
    Ok(FunctionKind::from_name(function_name)?.param_count())
}

/// Unit-weight initial guess for a registered function.
pub fn default_initial_guess(
    function_name: &str,
    observed_x: &[f64],
    observed_y: &[f64],
) -> Result<Vec<f64>, FitError> {
    let w = vec![1.0; observed_x.len()];
    FunctionKind::from_name(function_name)?.initial_guess(observed_x, observed_y, &w)
}

struct Summary {
    x_min: f64,
    x_max: f64,
    x_mean: f64,
    y_min: f64,
    y_max: f64,
    y_mean: f64,
    /// Scale of the x range (never zero).
    span: f64,
}

impl Summary {
    fn of(x: &[f64], y: &[f64]) -> Self {
        let n = x.len().max(1) as f64;
        let x_min = x.iter().copied().fold(f64::INFINITY, f64::min);
        let x_max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let y_min = y.iter().copied().fold(f64::INFINITY, f64::min);
        let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = x_max - x_min;
        let span = if width > 0.0 {
            width
        } else {
            x_max.abs().max(1.0)
        };
        Self {
            x_min,
            x_max,
            x_mean: x.iter().sum::<f64>() / n,
            y_min,
            y_max,
            y_mean: y.iter().sum::<f64>() / n,
            span,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    params: Vec<f64>,
    sse: f64,
}

fn keep_best(best: &mut Option<Node>, params: Vec<f64>, sse: f64) {
    if !sse.is_finite() || params.iter().any(|v| !v.is_finite()) {
        return;
    }
    match best {
        Some(b) if b.sse <= sse => {}
        _ => *best = Some(Node { params, sse }),
    }
}

fn exponential_guess(x: &[f64], y: &[f64], w: &[f64], s: &Summary) -> Result<Option<Vec<f64>>, FitError> {
    let mut rates = rate_grid(s.span, RATE_STEPS, true)?;
    rates.push(0.0);

    let mut best = None;
    for b in rates {
        if x.iter().any(|&t| !(b * t).exp().is_finite()) {
            continue;
        }
        if let Some((beta, sse)) = weighted_fit(x, y, w, 1, |t, row| row[0] = (b * t).exp()) {
            keep_best(&mut best, vec![beta[0], b], sse);
        }
    }
    Ok(best.map(|n| n.params))
}

fn logistic_guess(x: &[f64], y: &[f64], w: &[f64], s: &Summary) -> Result<Option<Vec<f64>>, FitError> {
    let rates = rate_grid(s.span, LOGISTIC_RATE_STEPS, true)?;
    let midpoints = lin_space(s.x_min, s.x_max, LOGISTIC_MIDPOINT_STEPS);

    let mut best = None;
    for &r in &rates {
        for &m in &midpoints {
            let sigmoid = |t: f64| 1.0 / (1.0 + (-r * (t - m)).exp());
            let Some((beta, _)) = weighted_fit(x, y, w, 1, |t, row| row[0] = sigmoid(t)) else {
                continue;
            };
            // The ceiling must keep outputs inside [0, 1].
            let ceiling = Interval::UNIT.clamp(beta[0]);
            let sse: f64 = (0..x.len())
                .map(|i| {
                    let res = y[i] - ceiling * sigmoid(x[i]);
                    w[i] * res * res
                })
                .sum();
            keep_best(&mut best, vec![ceiling, r, m], sse);
        }
    }
    Ok(best.map(|n| n.params))
}

fn asymptotic_guess(x: &[f64], y: &[f64], w: &[f64], s: &Summary) -> Result<Option<Vec<f64>>, FitError> {
    let rates = rate_grid(s.span, RATE_STEPS, false)?;

    let mut best = None;
    for c in rates {
        let fit = weighted_fit(x, y, w, 2, |t, row| {
            let e = (-c * t).exp();
            row[0] = 1.0 - e;
            row[1] = e;
        });
        if let Some((beta, sse)) = fit {
            keep_best(&mut best, vec![beta[0], beta[1], c], sse);
        }
    }
    Ok(best.map(|n| n.params))
}

fn describe(d: Interval) -> String {
    format!("[{}, {}]", d.min, d.max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_known_values() {
        assert!((evaluate("linear", &[1.0, 2.0], 3.0).unwrap() - 7.0).abs() < 1e-12);
        assert!((evaluate("quadratic", &[1.0, 0.0, 2.0], 2.0).unwrap() - 9.0).abs() < 1e-12);
        assert!((evaluate("logistic", &[0.8, 4.0, 1.0], 1.0).unwrap() - 0.4).abs() < 1e-12);
        assert!((evaluate("exponential", &[2.0, 0.0], 5.0).unwrap() - 2.0).abs() < 1e-12);
        let y = evaluate("asymptotic", &[1.0, 0.0, 1.0], 0.0).unwrap();
        assert!(y.abs() < 1e-12);
    }

    #[test]
    fn evaluate_rejects_unknown_and_bad_shapes() {
        assert!(matches!(
            evaluate("logarithmic", &[1.0], 1.0),
            Err(FitError::UnknownFunction(_))
        ));
        assert!(matches!(
            evaluate("linear", &[1.0], 1.0),
            Err(FitError::InvalidParameterShape(_))
        ));
        assert_eq!(parameter_count("logistic").unwrap(), 3);
    }

    #[test]
    fn evaluate_enforces_domains() {
        // Logistic ceiling above 1 produces outputs outside [0, 1].
        assert!(matches!(
            evaluate("logistic", &[1.5, 1.0, 0.0], 10.0),
            Err(FitError::DomainError(_))
        ));
        // Exponential overflow.
        assert!(matches!(
            evaluate("exponential", &[1.0, 1000.0], 10.0),
            Err(FitError::DomainError(_))
        ));
        // Asymptotic is defined for x >= 0 only.
        assert!(matches!(
            evaluate("asymptotic", &[1.0, 0.0, 1.0], -1.0),
            Err(FitError::DomainError(_))
        ));
    }

    #[test]
    fn check_data_flags_out_of_domain_observations() {
        let err = FunctionKind::Logistic
            .check_data(&[0.0, 1.0], &[0.2, 1.4])
            .unwrap_err();
        assert!(matches!(err, FitError::DomainError(_)));
        assert!(FunctionKind::Linear.check_data(&[0.0, 1.0], &[0.2, 1.4]).is_ok());
    }

    fn grid_xs() -> Vec<f64> {
        (0..21).map(|i| i as f64 * 0.05).collect()
    }

    #[test]
    fn linear_guess_is_exact_on_clean_data() {
        let xs = grid_xs();
        let ys: Vec<f64> = xs.iter().map(|x| 0.3 + 1.7 * x).collect();
        let g = default_initial_guess("linear", &xs, &ys).unwrap();
        assert!((g[0] - 0.3).abs() < 1e-9);
        assert!((g[1] - 1.7).abs() < 1e-9);
    }

    #[test]
    fn nonlinear_guesses_land_near_truth() {
        let xs = grid_xs();
        for f in [
            FunctionKind::Exponential,
            FunctionKind::Logistic,
            FunctionKind::Asymptotic,
        ] {
            let truth = f.reference_params();
            let ys: Vec<f64> = xs.iter().map(|&x| f.predict(truth, x)).collect();
            let guess = f.initial_guess(&xs, &ys, &vec![1.0; xs.len()]).unwrap();
            let sse: f64 = xs
                .iter()
                .zip(&ys)
                .map(|(&x, &y)| (y - f.predict(&guess, x)).powi(2))
                .sum();
            let sst: f64 = ys.iter().map(|y| y * y).sum();
            assert!(sse < 0.05 * sst, "{}: sse={sse} sst={sst}", f.name());
        }
    }

    #[test]
    fn guess_requires_data() {
        assert!(matches!(
            default_initial_guess("linear", &[], &[]),
            Err(FitError::InsufficientData(_))
        ));
    }
}
