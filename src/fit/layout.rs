//! Flat parameter layouts for each pooling strategy.
//!
//! The fitting objective is a map from one flat vector to a scalar; the layout
//! says which slice of that vector each clade reads:
//!
//! - unpooled: disjoint `k`-wide ranges per clade (`k × C` total)
//! - pooled: every clade reads the same `k` slots
//! - partial-pooled: disjoint clade ranges followed by a `2k` hyper block
//!   (means, then dispersions)

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::domain::{FunctionKind, ObservationSet, PoolingKind};
use crate::error::FitError;

/// Hyper-parameter block of a partial-pooled layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperBlock {
    pub mean: Range<usize>,
    pub dispersion: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterLayout {
    pub pooling: PoolingKind,
    pub function: FunctionKind,
    clade_ranges: Vec<Range<usize>>,
    hyper: Option<HyperBlock>,
    len: usize,
}

impl ParameterLayout {
    /// Shape-only layout for `n_clades` clades (no data checks).
    pub fn new(pooling: PoolingKind, function: FunctionKind, n_clades: usize) -> Self {
        let k = function.param_count();
        let (clade_ranges, hyper, len) = match pooling {
            PoolingKind::Unpooled => {
                let ranges = (0..n_clades).map(|c| c * k..(c + 1) * k).collect();
                (ranges, None, k * n_clades)
            }
            PoolingKind::Pooled => (vec![0..k; n_clades], None, k),
            PoolingKind::PartialPooled => {
                let base = k * n_clades;
                let ranges = (0..n_clades).map(|c| c * k..(c + 1) * k).collect();
                let hyper = HyperBlock {
                    mean: base..base + k,
                    dispersion: base + k..base + 2 * k,
                };
                (ranges, Some(hyper), base + 2 * k)
            }
        };
        Self {
            pooling,
            function,
            clade_ranges,
            hyper,
            len,
        }
    }

    /// Length of a user-supplied parameter vector for simulation.
    ///
    /// Partial-pooled simulations take only the hyper block; clade vectors
    /// are drawn from it.
    pub fn simulation_len(pooling: PoolingKind, function: FunctionKind, n_clades: usize) -> usize {
        let k = function.param_count();
        match pooling {
            PoolingKind::Unpooled => k * n_clades,
            PoolingKind::Pooled => k,
            PoolingKind::PartialPooled => 2 * k,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn k(&self) -> usize {
        self.function.param_count()
    }

    pub fn n_clades(&self) -> usize {
        self.clade_ranges.len()
    }

    pub fn clade_range(&self, clade: usize) -> Range<usize> {
        self.clade_ranges[clade].clone()
    }

    /// Slice of `flat` read by `clade`.
    pub fn clade_params<'a>(&self, flat: &'a [f64], clade: usize) -> &'a [f64] {
        &flat[self.clade_range(clade)]
    }

    pub fn hyper(&self) -> Option<&HyperBlock> {
        self.hyper.as_ref()
    }
}

/// Build the layout for fitting `function` under `pooling` to `observations`.
///
/// Data requirements:
/// - unpooled: every clade has either zero or at least `k` observations, and
///   at least one clade has data
/// - pooled: every clade has observations and the total is at least `k`
/// - partial-pooled: at least one clade has data and the total is at least `k`
pub fn build_parameter_layout(
    pooling: PoolingKind,
    function: FunctionKind,
    observations: &ObservationSet,
) -> Result<ParameterLayout, FitError> {
    let k = function.param_count();
    let sizes = observations.clade_sizes();
    if sizes.is_empty() {
        return Err(FitError::InsufficientData("no clades defined".to_string()));
    }
    let total: usize = sizes.iter().sum();
    let names = observations.clade_names();

    match pooling {
        PoolingKind::Unpooled => {
            if let Some(c) = sizes.iter().position(|&n| n > 0 && n < k) {
                return Err(FitError::InsufficientData(format!(
                    "clade '{}' has {} observations; {} needs at least {k} per clade when unpooled",
                    names[c],
                    sizes[c],
                    function.name()
                )));
            }
        }
        PoolingKind::Pooled => {
            if let Some(c) = sizes.iter().position(|&n| n == 0) {
                return Err(FitError::InsufficientData(format!(
                    "clade '{}' has no observations; every clade must contribute when pooled",
                    names[c]
                )));
            }
        }
        PoolingKind::PartialPooled => {}
    }

    if total == 0 {
        return Err(FitError::InsufficientData("no observations".to_string()));
    }
    if total < k {
        return Err(FitError::InsufficientData(format!(
            "{total} observations cannot determine {k} parameters of {}",
            function.name()
        )));
    }

    Ok(ParameterLayout::new(pooling, function, sizes.len()))
}
