//! Fitting configuration.
//!
//! `FitConfig::default()` is suitable for small trees; callers can override
//! individual knobs in code or through the environment (`from_env`).

use std::env::VarError;

use serde::{Deserialize, Serialize};

use crate::domain::types::Criterion;
use crate::error::FitError;

/// Numeric knobs for the fitting engine and evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Iteration budget per minimizer run.
    pub max_iters: u64,
    /// Simplex standard-deviation tolerance on objective values.
    pub tolerance: f64,
    /// Restarts from the incumbent after a run terminates.
    pub restarts: usize,
    /// Alternation rounds for partial pooling.
    pub outer_iters: usize,
    /// Relative objective change that ends the partial-pooling alternation.
    pub outer_tolerance: f64,
    /// Lower bound on hyper-dispersion estimates.
    pub dispersion_floor: f64,
    /// Largest parameter magnitude an optimum may reach; beyond it the fit
    /// has diverged.
    pub param_bound: f64,
    /// Criterion used to score and rank fits.
    pub criterion: Criterion,
    /// Fit the model matrix on the rayon pool.
    pub parallel: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iters: 2_000,
            tolerance: 1e-12,
            restarts: 2,
            outer_iters: 50,
            outer_tolerance: 1e-8,
            dispersion_floor: 1e-6,
            param_bound: 1e12,
            criterion: Criterion::Bic,
            parallel: true,
        }
    }
}

impl FitConfig {
    /// Defaults overridden by `VELOCITREE_*` variables (a `.env` file is read
    /// first when present).
    pub fn from_env() -> Result<Self, FitError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key))
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `VELOCITREE_*` key.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, FitError>
    where
        L: Fn(&str) -> Result<String, VarError>,
    {
        let get = |key: &str| env_value(key, lookup(key));
        let mut config = Self::default();
        if let Some(v) = get("VELOCITREE_MAX_ITERS")? {
            config.max_iters = parse_value("VELOCITREE_MAX_ITERS", &v)?;
        }
        if let Some(v) = get("VELOCITREE_TOLERANCE")? {
            config.tolerance = parse_value("VELOCITREE_TOLERANCE", &v)?;
        }
        if let Some(v) = get("VELOCITREE_RESTARTS")? {
            config.restarts = parse_value("VELOCITREE_RESTARTS", &v)?;
        }
        if let Some(v) = get("VELOCITREE_OUTER_ITERS")? {
            config.outer_iters = parse_value("VELOCITREE_OUTER_ITERS", &v)?;
        }
        if let Some(v) = get("VELOCITREE_OUTER_TOLERANCE")? {
            config.outer_tolerance = parse_value("VELOCITREE_OUTER_TOLERANCE", &v)?;
        }
        if let Some(v) = get("VELOCITREE_PARAM_BOUND")? {
            config.param_bound = parse_value("VELOCITREE_PARAM_BOUND", &v)?;
        }
        if let Some(v) = get("VELOCITREE_CRITERION")? {
            config.criterion = Criterion::from_name(&v)?;
        }
        if let Some(v) = get("VELOCITREE_PARALLEL")? {
            config.parallel = parse_value("VELOCITREE_PARALLEL", &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<(), FitError> {
        if self.max_iters == 0 {
            return Err(FitError::InvalidInput("max_iters must be > 0".to_string()));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "tolerance must be finite and > 0, got {}",
                self.tolerance
            )));
        }
        if self.outer_iters == 0 {
            return Err(FitError::InvalidInput("outer_iters must be > 0".to_string()));
        }
        if !(self.outer_tolerance.is_finite() && self.outer_tolerance > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "outer_tolerance must be finite and > 0, got {}",
                self.outer_tolerance
            )));
        }
        if !(self.dispersion_floor.is_finite() && self.dispersion_floor > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "dispersion_floor must be finite and > 0, got {}",
                self.dispersion_floor
            )));
        }
        if !(self.param_bound.is_finite() && self.param_bound > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "param_bound must be finite and > 0, got {}",
                self.param_bound
            )));
        }
        Ok(())
    }
}

fn env_value(key: &str, value: Result<String, VarError>) -> Result<Option<String>, FitError> {
    match value {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(e) => Err(FitError::InvalidInput(format!("{key}: {e}"))),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, FitError> {
    raw.trim()
        .parse()
        .map_err(|_| FitError::InvalidInput(format!("{key}: cannot parse '{raw}'")))
}
