//! Reporting utilities: residuals, outlying crosses and parameter recovery.
//!
//! Everything here reads fits and datasets; nothing is formatted for display.

use serde::{Deserialize, Serialize};

use crate::data::SimulationTruth;
use crate::domain::{CrossObservation, FitResult, ObservationSet};
use crate::error::FitError;

/// Fitted value and residual for one cross.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossResidual {
    pub record: CrossObservation,
    pub clade: String,
    pub y_fit: f64,
    pub residual: f64,
}

/// Crosses furthest above and below their fitted curve (top-N each side).
#[derive(Debug, Clone, Default)]
pub struct Extremes {
    pub above: Vec<CrossResidual>,
    pub below: Vec<CrossResidual>,
}

/// Absolute error of one recovered parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterError {
    pub clade: String,
    pub parameter: String,
    pub truth: f64,
    pub estimate: f64,
    pub abs_error: f64,
}

/// Compute fitted values and residuals for each cross.
pub fn compute_residuals(observations: &ObservationSet, fit: &FitResult) -> Result<Vec<CrossResidual>, FitError> {
    if fit.dataset != observations.fingerprint() {
        return Err(FitError::IncomparableModels(format!(
            "{} was fitted to a different observation set",
            fit.model.label()
        )));
    }
    if !fit.is_usable() {
        return Err(FitError::InvalidInput(format!(
            "{} was cancelled; no fitted values",
            fit.model.label()
        )));
    }

    let f = fit.model.function;
    let mut out = Vec::with_capacity(observations.len());
    for (rec, &ci) in observations.records().iter().zip(observations.assignments()) {
        let Some(clade) = fit.clades.get(ci) else {
            return Err(FitError::IncomparableModels(format!(
                "{} has no estimate for clade {ci}",
                fit.model.label()
            )));
        };
        let y_fit = f.predict(&clade.params, rec.x);
        if !y_fit.is_finite() {
            return Err(FitError::NumericalInstability(format!(
                "non-finite prediction for clade '{}' at x={}",
                clade.clade, rec.x
            )));
        }
        out.push(CrossResidual {
            record: rec.clone(),
            clade: clade.clade.clone(),
            y_fit,
            residual: rec.y - y_fit,
        });
    }
    Ok(out)
}

/// The `top_n` largest positive and negative residuals.
pub fn extreme_residuals(residuals: &[CrossResidual], top_n: usize) -> Extremes {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual.total_cmp(&a.residual));
    let above = sorted.iter().take(top_n).cloned().collect();

    sorted.reverse();
    let below = sorted.iter().take(top_n).cloned().collect();

    Extremes { above, below }
}

/// Compare estimated clade parameters with the simulation truth.
///
/// Unestimated clades are skipped.
pub fn parameter_recovery(fit: &FitResult, truth: &SimulationTruth) -> Result<Vec<ParameterError>, FitError> {
    if fit.clades.len() != truth.clade_params.len() {
        return Err(FitError::InvalidParameterShape(format!(
            "fit has {} clades, truth has {}",
            fit.clades.len(),
            truth.clade_params.len()
        )));
    }
    let names = fit.model.function.param_names();
    let mut out = Vec::new();
    for (est, true_params) in fit.clades.iter().zip(&truth.clade_params) {
        if !est.estimated {
            continue;
        }
        if est.params.len() != true_params.len() {
            return Err(FitError::InvalidParameterShape(format!(
                "clade '{}' has {} estimates for {} true parameters",
                est.clade,
                est.params.len(),
                true_params.len()
            )));
        }
        for ((name, &e), &t) in names.iter().zip(&est.params).zip(true_params) {
            out.push(ParameterError {
                clade: est.clade.clone(),
                parameter: (*name).to_string(),
                truth: t,
                estimate: e,
                abs_error: (e - t).abs(),
            });
        }
    }
    Ok(out)
}
