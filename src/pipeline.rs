//! Entry points used by command front-ends.
//!
//! One call fits a full model matrix, one call simulates a dataset:
//! selection -> fit (parallel) -> rank, and request -> simulate.
//! Front-ends only render the returned structures.

use tracing::info;

use crate::data::{SimulatedDataset, SimulationRequest, simulate};
use crate::domain::{FitConfig, ObservationSet, Tree};
use crate::error::FitError;
use crate::fit::{CancelToken, MatrixRun, ModelSelection, fit_models};

/// Fit every requested (function × pooling) pair and rank the successes.
///
/// Names may include the sentinel `all`. Per-model failures are recorded in
/// their matrix slot; only invalid requests fail the whole call.
pub fn fit_matrix<S: AsRef<str>>(
    functions: &[S],
    poolings: &[S],
    tree: &Tree,
    observations: &ObservationSet,
    config: &FitConfig,
    cancel: &CancelToken,
) -> Result<MatrixRun, FitError> {
    let selection = ModelSelection::parse(functions, poolings)?;
    info!(
        models = selection.len(),
        observations = observations.len(),
        clades = observations.clades().len(),
        parallel = config.parallel,
        "fitting model matrix"
    );

    let run = fit_models(&selection, tree, observations, config, cancel)?;

    let failed = run.failures().count();
    let ranked = run.table.len();
    let cancelled = run.table.excluded.len();
    match run.table.best() {
        Some(best) => info!(
            ranked,
            cancelled,
            failed,
            best = %best.model.label(),
            score = best.score,
            "model matrix finished"
        ),
        None => info!(cancelled, failed, "model matrix finished without usable fits"),
    }
    Ok(run)
}

/// Simulate one dataset.
pub fn generate(request: &SimulationRequest<'_>) -> Result<SimulatedDataset, FitError> {
    let dataset = simulate(request)?;
    info!(
        model = %dataset.model.label(),
        seed = dataset.seed,
        observations = dataset.observations.len(),
        "generated dataset"
    );
    Ok(dataset)
}
