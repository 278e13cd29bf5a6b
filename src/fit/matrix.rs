//! The model matrix: every requested (function × pooling) pair fitted to one
//! observation set.
//!
//! Fits are independent and run on the rayon pool when `config.parallel` is
//! set. A failing model is recorded in its own slot and never aborts the batch.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{FitConfig, FitResult, FunctionKind, ModelSpec, ObservationSet, PoolingKind, Tree};
use crate::error::FitError;
use crate::fit::fitter::fit;
use crate::fit::optimizer::CancelToken;
use crate::fit::selection::{ComparisonTable, rank, score_fit};

/// Sentinel selecting every registered entry.
pub const ALL_SENTINEL: &str = "all";

/// Requested models in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    models: Vec<ModelSpec>,
}

impl ModelSelection {
    /// Expand function and pooling names (with the `all` sentinel) into the
    /// cross product, deduplicated and sorted by registration order.
    pub fn parse<S: AsRef<str>>(functions: &[S], poolings: &[S]) -> Result<Self, FitError> {
        let functions = expand(functions, &FunctionKind::ALL, FunctionKind::from_name)?;
        let poolings = expand(poolings, &PoolingKind::ALL, PoolingKind::from_name)?;
        if functions.is_empty() || poolings.is_empty() {
            return Err(FitError::InvalidInput(
                "at least one function and one pooling strategy are required".to_string(),
            ));
        }

        let mut models: Vec<ModelSpec> = functions
            .iter()
            .flat_map(|&f| poolings.iter().map(move |&p| ModelSpec::new(f, p)))
            .collect();
        models.sort_by_key(|m| m.registration_index());
        models.dedup();
        Ok(Self { models })
    }

    /// Every registered model.
    pub fn all() -> Self {
        let models = FunctionKind::ALL
            .iter()
            .flat_map(|&f| PoolingKind::ALL.iter().map(move |&p| ModelSpec::new(f, p)))
            .collect();
        Self { models }
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn expand<S, T, F>(names: &[S], registry: &[T], lookup: F) -> Result<Vec<T>, FitError>
where
    S: AsRef<str>,
    T: Copy,
    F: Fn(&str) -> Result<T, FitError>,
{
    let mut out = Vec::new();
    for name in names {
        let name = name.as_ref().trim();
        if name.eq_ignore_ascii_case(ALL_SENTINEL) {
            out.extend_from_slice(registry);
        } else {
            out.push(lookup(name)?);
        }
    }
    Ok(out)
}

/// One slot of the matrix.
#[derive(Debug, Clone)]
pub struct MatrixEntry {
    pub model: ModelSpec,
    pub outcome: Result<FitResult, FitError>,
}

/// All slots plus the ranking of the successful fits.
#[derive(Debug, Clone)]
pub struct MatrixRun {
    pub entries: Vec<MatrixEntry>,
    pub table: ComparisonTable,
}

impl MatrixRun {
    pub fn failures(&self) -> impl Iterator<Item = (ModelSpec, &FitError)> {
        self.entries
            .iter()
            .filter_map(|e| e.outcome.as_ref().err().map(|err| (e.model, err)))
    }

    pub fn successes(&self) -> impl Iterator<Item = &FitResult> {
        self.entries.iter().filter_map(|e| e.outcome.as_ref().ok())
    }
}

/// Fit every selected model and rank the results.
pub fn fit_models(
    selection: &ModelSelection,
    tree: &Tree,
    observations: &ObservationSet,
    config: &FitConfig,
    cancel: &CancelToken,
) -> Result<MatrixRun, FitError> {
    config.validate()?;

    let run_one = |&model: &ModelSpec| {
        let outcome = fit(model, tree, observations, config, cancel);
        if let Err(e) = &outcome {
            warn!(model = %model.label(), code = e.code(), error = %e, "model failed");
        }
        MatrixEntry { model, outcome }
    };

    // Results come back in selection order regardless of completion order.
    let mut entries: Vec<MatrixEntry> = if config.parallel {
        selection.models().par_iter().map(run_one).collect()
    } else {
        selection.models().iter().map(run_one).collect()
    };

    // A fit that cannot be scored fails its own slot, not the ranking.
    for entry in entries.iter_mut() {
        let unscorable = match &entry.outcome {
            Ok(fit) if fit.is_usable() => score_fit(fit, config.criterion).err(),
            _ => None,
        };
        if let Some(e) = unscorable {
            warn!(model = %entry.model.label(), error = %e, "model cannot be scored");
            entry.outcome = Err(e);
        }
    }

    let fits: Vec<FitResult> = entries
        .iter()
        .filter_map(|e| e.outcome.as_ref().ok().cloned())
        .collect();
    let table = rank(fits, config.criterion)?;

    Ok(MatrixRun { entries, table })
}
