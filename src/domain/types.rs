//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - handed to reporting/plotting layers read-only
//! - persisted by callers that cache results across runs

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Closed interval `[min, max]` (either end may be infinite).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub const REAL: Interval = Interval {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };
    pub const NON_NEGATIVE: Interval = Interval {
        min: 0.0,
        max: f64::INFINITY,
    };
    pub const UNIT: Interval = Interval { min: 0.0, max: 1.0 };

    /// True for finite values inside the interval.
    pub fn contains(&self, v: f64) -> bool {
        v.is_finite() && v >= self.min && v <= self.max
    }

    /// Clamp into the interval (finite bounds only).
    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }
}

/// Registered parametric functional forms.
///
/// Declaration order is the registration order used for "all" expansion and
/// for deterministic tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// `y = a + b·x`
    Linear,
    /// `y = L / (1 + exp(-r·(x - x0)))`, output in `[0, 1]`
    Logistic,
    /// `y = a + b·x + c·x²`
    Quadratic,
    /// `y = a·exp(b·x)`
    Exponential,
    /// `y = A - (A - B)·exp(-c·x)`, defined for `x ≥ 0`
    Asymptotic,
}

impl FunctionKind {
    pub const ALL: [FunctionKind; 5] = [
        FunctionKind::Linear,
        FunctionKind::Logistic,
        FunctionKind::Quadratic,
        FunctionKind::Exponential,
        FunctionKind::Asymptotic,
    ];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            FunctionKind::Linear => "linear",
            FunctionKind::Logistic => "logistic",
            FunctionKind::Quadratic => "quadratic",
            FunctionKind::Exponential => "exponential",
            FunctionKind::Asymptotic => "asymptotic",
        }
    }

    /// Look up a registered function by name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self, FitError> {
        let wanted = name.trim().to_ascii_lowercase();
        FunctionKind::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| FitError::UnknownFunction(name.to_string()))
    }

    /// Number of parameters `k` (fixed per function).
    pub fn param_count(self) -> usize {
        self.param_names().len()
    }

    /// Ordered parameter names.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            FunctionKind::Linear => &["intercept", "slope"],
            FunctionKind::Logistic => &["ceiling", "rate", "midpoint"],
            FunctionKind::Quadratic => &["intercept", "linear", "quadratic"],
            FunctionKind::Exponential => &["scale", "rate"],
            FunctionKind::Asymptotic => &["asymptote", "baseline", "rate"],
        }
    }

    /// Valid independent-variable values.
    pub fn input_domain(self) -> Interval {
        match self {
            FunctionKind::Asymptotic => Interval::NON_NEGATIVE,
            _ => Interval::REAL,
        }
    }

    /// Valid dependent-variable values.
    pub fn output_domain(self) -> Interval {
        match self {
            FunctionKind::Logistic => Interval::UNIT,
            _ => Interval::REAL,
        }
    }

    /// Representative parameter vector on a unit time scale.
    ///
    /// Used as the prior centre when simulating without explicit parameters.
    pub fn reference_params(self) -> &'static [f64] {
        match self {
            FunctionKind::Linear => &[0.1, 0.8],
            FunctionKind::Logistic => &[0.85, 8.0, 0.5],
            FunctionKind::Quadratic => &[0.05, 0.3, 0.6],
            FunctionKind::Exponential => &[0.2, 1.5],
            FunctionKind::Asymptotic => &[1.0, 0.05, 3.0],
        }
    }
}

/// Registered pooling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingKind {
    /// Each clade has an independent parameter vector.
    Unpooled,
    /// All clades share one parameter vector.
    Pooled,
    /// Clade vectors shrink toward a shared hyper-mean.
    PartialPooled,
}

impl PoolingKind {
    pub const ALL: [PoolingKind; 3] = [
        PoolingKind::Unpooled,
        PoolingKind::Pooled,
        PoolingKind::PartialPooled,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PoolingKind::Unpooled => "unpooled",
            PoolingKind::Pooled => "pooled",
            PoolingKind::PartialPooled => "partpooled",
        }
    }

    /// Look up a pooling strategy by name. Accepts `partial-pooled` and
    /// `partial_pooled` as aliases of `partpooled`.
    pub fn from_name(name: &str) -> Result<Self, FitError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "unpooled" => Ok(PoolingKind::Unpooled),
            "pooled" => Ok(PoolingKind::Pooled),
            "partpooled" | "partial-pooled" | "partial_pooled" | "partialpooled" => {
                Ok(PoolingKind::PartialPooled)
            }
            _ => Err(FitError::UnknownPooling(name.to_string())),
        }
    }
}

/// A (function, pooling) pair: the unit of fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub function: FunctionKind,
    pub pooling: PoolingKind,
}

impl ModelSpec {
    pub fn new(function: FunctionKind, pooling: PoolingKind) -> Self {
        Self { function, pooling }
    }

    /// Position in the full registry matrix (functions outer, poolings inner).
    pub fn registration_index(self) -> usize {
        let f = FunctionKind::ALL
            .iter()
            .position(|&k| k == self.function)
            .unwrap_or(0);
        let p = PoolingKind::ALL
            .iter()
            .position(|&k| k == self.pooling)
            .unwrap_or(0);
        f * PoolingKind::ALL.len() + p
    }

    /// Label such as `linear/unpooled`.
    pub fn label(self) -> String {
        format!("{}/{}", self.function.name(), self.pooling.name())
    }
}

/// Information criterion used to score fits (lower is better).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Aic,
    Bic,
}

impl Criterion {
    pub fn from_name(name: &str) -> Result<Self, FitError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "aic" => Ok(Criterion::Aic),
            "bic" => Ok(Criterion::Bic),
            other => Err(FitError::InvalidInput(format!("unknown criterion '{other}'"))),
        }
    }
}

/// How a fit terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Objective improvement fell below tolerance.
    Converged,
    /// Iteration budget exhausted; estimates are finite but not certified.
    MaxIterations,
    /// Stopped on request; estimates are unusable.
    Cancelled,
}

/// Estimates for one clade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CladeEstimate {
    pub clade: String,
    pub n_obs: usize,
    /// `false` when the clade had no observations (parameters are NaN).
    pub estimated: bool,
    pub params: Vec<f64>,
    /// Standard errors (unpooled/pooled) or conditional posterior spread
    /// (partial-pooled); `None` when the curvature is not invertible or the
    /// fit is exactly determined.
    pub std_errors: Option<Vec<f64>>,
}

/// Hyper-parameters of a partial-pooled fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperEstimate {
    pub mean: Vec<f64>,
    pub dispersion: Vec<f64>,
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    /// Weighted residual sum of squares over estimated clades.
    pub rss: f64,
    /// Gaussian log-likelihood with the noise variance profiled out.
    pub log_likelihood: f64,
    pub n: usize,
    /// Free parameters charged by the information criteria.
    pub effective_params: f64,
}

/// Result of fitting one model to one observation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelSpec,
    pub clades: Vec<CladeEstimate>,
    pub hyper: Option<HyperEstimate>,
    /// Flat parameter vector in layout order.
    pub flat_params: Vec<f64>,
    pub quality: FitQuality,
    pub status: ConvergenceStatus,
    pub iterations: u64,
    /// Fingerprint of the observation set this fit was computed on.
    pub dataset: u64,
}

impl FitResult {
    /// Whether the estimates can be ranked and consumed.
    pub fn is_usable(&self) -> bool {
        self.status != ConvergenceStatus::Cancelled
    }

    /// Estimate for a clade by name.
    pub fn clade(&self, name: &str) -> Option<&CladeEstimate> {
        self.clades.iter().find(|c| c.clade == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_round_trip() {
        for f in FunctionKind::ALL {
            assert_eq!(FunctionKind::from_name(f.name()).unwrap(), f);
            assert_eq!(f.reference_params().len(), f.param_count());
        }
        for p in PoolingKind::ALL {
            assert_eq!(PoolingKind::from_name(p.name()).unwrap(), p);
        }
        assert_eq!(
            PoolingKind::from_name("partial-pooled").unwrap(),
            PoolingKind::PartialPooled
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            FunctionKind::from_name("logarithmic"),
            Err(FitError::UnknownFunction(_))
        ));
        assert!(matches!(
            PoolingKind::from_name("hierarchical"),
            Err(FitError::UnknownPooling(_))
        ));
    }

    #[test]
    fn parameter_counts_are_fixed() {
        let counts: Vec<usize> = FunctionKind::ALL.iter().map(|f| f.param_count()).collect();
        assert_eq!(counts, vec![2, 3, 3, 2, 3]);
    }

    #[test]
    fn registration_index_covers_matrix() {
        let mut seen = Vec::new();
        for f in FunctionKind::ALL {
            for p in PoolingKind::ALL {
                seen.push(ModelSpec::new(f, p).registration_index());
            }
        }
        assert_eq!(seen, (0..15).collect::<Vec<_>>());
    }
}
