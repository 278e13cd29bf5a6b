//! Model scoring and ranking using AIC / BIC.
//!
//! For a fit with weighted residual sum of squares `RSS`, `n` observations
//! and `p` effective parameters:
//! - AIC = 2p + n * ln(RSS/n)
//! - BIC = p * ln(n) + n * ln(RSS/n)
//!
//! Ranking rules:
//! 1. Cancelled fits are excluded (listed separately)
//! 2. Sort by ascending score
//! 3. Ties go to fewer effective parameters, then to registration order
//!
//! Scores are only comparable within one observation set.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::domain::{Criterion, FitResult, ModelSpec, ObservationSet};
use crate::error::FitError;
use crate::fit::fitter::MIN_MEAN_RSS;

/// Information criterion value (lower is better).
pub fn criterion_value(criterion: Criterion, rss: f64, n: usize, p: f64) -> f64 {
    let nf = n as f64;
    let fit_term = nf * (rss / nf).max(MIN_MEAN_RSS).ln();
    match criterion {
        Criterion::Aic => 2.0 * p + fit_term,
        Criterion::Bic => p * nf.ln() + fit_term,
    }
}

/// Score one fit against the observation set it claims to describe.
pub fn score(fit: &FitResult, observations: &ObservationSet, criterion: Criterion) -> Result<f64, FitError> {
    if fit.dataset != observations.fingerprint() {
        return Err(FitError::IncomparableModels(format!(
            "{} was fitted to a different observation set",
            fit.model.label()
        )));
    }
    score_fit(fit, criterion)
}

pub(crate) fn score_fit(fit: &FitResult, criterion: Criterion) -> Result<f64, FitError> {
    if !fit.is_usable() {
        return Err(FitError::InvalidInput(format!(
            "{} was cancelled and cannot be scored",
            fit.model.label()
        )));
    }
    let q = &fit.quality;
    if q.n == 0 {
        return Err(FitError::InsufficientData(format!(
            "{} has no observations to score",
            fit.model.label()
        )));
    }
    let s = criterion_value(criterion, q.rss, q.n, q.effective_params);
    if !s.is_finite() {
        return Err(FitError::NumericalInstability(format!(
            "{} has a non-finite score (rss={}, p={})",
            fit.model.label(),
            q.rss,
            q.effective_params
        )));
    }
    Ok(s)
}

/// One ranked model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub model: ModelSpec,
    pub fit: FitResult,
    pub score: f64,
    /// Score minus the best score in the table.
    pub delta: f64,
}

/// Ranked fits of one observation set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub criterion: Option<Criterion>,
    pub entries: Vec<ComparisonEntry>,
    /// Fits left out of the ranking (cancelled).
    pub excluded: Vec<FitResult>,
}

impl ComparisonTable {
    pub fn best(&self) -> Option<&ComparisonEntry> {
        self.entries.first()
    }

    pub fn get(&self, model: ModelSpec) -> Option<&ComparisonEntry> {
        self.entries.iter().find(|e| e.model == model)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rank fits of a common observation set.
///
/// The ordering depends only on the fits, never on their input order.
pub fn rank(fits: Vec<FitResult>, criterion: Criterion) -> Result<ComparisonTable, FitError> {
    if let Some(first) = fits.first() {
        if let Some(other) = fits.iter().find(|f| f.dataset != first.dataset) {
            return Err(FitError::IncomparableModels(format!(
                "{} and {} were fitted to different observation sets",
                first.model.label(),
                other.model.label()
            )));
        }
    }

    let mut entries = Vec::with_capacity(fits.len());
    let mut excluded = Vec::new();
    for fit in fits {
        if !fit.is_usable() {
            excluded.push(fit);
            continue;
        }
        let score = score_fit(&fit, criterion)?;
        entries.push(ComparisonEntry {
            model: fit.model,
            fit,
            score,
            delta: 0.0,
        });
    }

    entries.sort_by(compare_entries);
    excluded.sort_by_key(|f| f.model.registration_index());

    if let Some(best) = entries.first().map(|e| e.score) {
        for e in entries.iter_mut() {
            e.delta = e.score - best;
        }
    }

    Ok(ComparisonTable {
        criterion: Some(criterion),
        entries,
        excluded,
    })
}

fn compare_entries(a: &ComparisonEntry, b: &ComparisonEntry) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| {
            a.fit
                .quality
                .effective_params
                .total_cmp(&b.fit.quality.effective_params)
        })
        .then_with(|| a.model.registration_index().cmp(&b.model.registration_index()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConvergenceStatus, FitQuality, FunctionKind, PoolingKind};

    fn fake(function: FunctionKind, pooling: PoolingKind, rss: f64, p: f64, dataset: u64) -> FitResult {
        FitResult {
            model: ModelSpec::new(function, pooling),
            clades: Vec::new(),
            hyper: None,
            flat_params: Vec::new(),
            quality: FitQuality {
                rss,
                log_likelihood: 0.0,
                n: 20,
                effective_params: p,
            },
            status: ConvergenceStatus::Converged,
            iterations: 1,
            dataset,
        }
    }

    #[test]
    fn bic_penalizes_more_than_aic_for_large_n() {
        let aic = criterion_value(Criterion::Aic, 1.0, 100, 3.0);
        let bic = criterion_value(Criterion::Bic, 1.0, 100, 3.0);
        assert!(bic > aic);
    }

    #[test]
    fn ranking_sorts_by_score_then_parameters() {
        let fits = vec![
            fake(FunctionKind::Quadratic, PoolingKind::Pooled, 1.0, 3.0, 7),
            fake(FunctionKind::Linear, PoolingKind::Unpooled, 0.9, 6.0, 7),
            fake(FunctionKind::Linear, PoolingKind::Pooled, 1.0, 2.0, 7),
        ];
        let table = rank(fits, Criterion::Bic).unwrap();
        let order: Vec<String> = table.entries.iter().map(|e| e.model.label()).collect();
        assert_eq!(order[0], "linear/pooled");
        assert_eq!(table.best().unwrap().delta, 0.0);
        assert!(table.entries.iter().all(|e| e.delta >= 0.0));
    }

    #[test]
    fn exact_ties_fall_back_to_registration_order() {
        let fits = vec![
            fake(FunctionKind::Exponential, PoolingKind::Pooled, 1.0, 2.0, 7),
            fake(FunctionKind::Linear, PoolingKind::Pooled, 1.0, 2.0, 7),
        ];
        let table = rank(fits, Criterion::Aic).unwrap();
        assert_eq!(table.entries[0].model.function, FunctionKind::Linear);
    }

    #[test]
    fn ranking_ignores_completion_order() {
        let fits = vec![
            fake(FunctionKind::Quadratic, PoolingKind::Pooled, 1.0, 3.0, 7),
            fake(FunctionKind::Linear, PoolingKind::Unpooled, 0.9, 6.0, 7),
            fake(FunctionKind::Exponential, PoolingKind::Pooled, 1.0, 2.0, 7),
            fake(FunctionKind::Linear, PoolingKind::Pooled, 1.0, 2.0, 7),
            fake(FunctionKind::Logistic, PoolingKind::PartialPooled, 0.95, 4.5, 7),
        ];
        let labels = |t: &ComparisonTable| t.entries.iter().map(|e| e.model.label()).collect::<Vec<_>>();
        let expected = labels(&rank(fits.clone(), Criterion::Bic).unwrap());

        let mut reversed = fits.clone();
        reversed.reverse();
        assert_eq!(labels(&rank(reversed, Criterion::Bic).unwrap()), expected);

        let mut rotated = fits;
        rotated.rotate_left(2);
        assert_eq!(labels(&rank(rotated, Criterion::Bic).unwrap()), expected);
    }

    #[test]
    fn mixed_datasets_are_incomparable() {
        let fits = vec![
            fake(FunctionKind::Linear, PoolingKind::Pooled, 1.0, 2.0, 1),
            fake(FunctionKind::Linear, PoolingKind::Unpooled, 1.0, 4.0, 2),
        ];
        assert!(matches!(
            rank(fits, Criterion::Bic),
            Err(FitError::IncomparableModels(_))
        ));
    }

    #[test]
    fn cancelled_fits_are_excluded() {
        let mut cancelled = fake(FunctionKind::Linear, PoolingKind::Unpooled, f64::NAN, f64::NAN, 3);
        cancelled.status = ConvergenceStatus::Cancelled;
        let fits = vec![cancelled, fake(FunctionKind::Linear, PoolingKind::Pooled, 1.0, 2.0, 3)];
        let table = rank(fits, Criterion::Bic).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.excluded.len(), 1);
    }
}
