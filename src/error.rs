use thiserror::Error;

/// Errors raised by the fitting and simulation core.
///
/// Every variant carries a human-readable context message. Errors are `Clone`
/// so that a batch run can attach a failure to the model slot it belongs to
/// without aborting the whole matrix.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// A function name that is not in the registry.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A pooling strategy name that is not in the registry.
    #[error("unknown pooling strategy: {0}")]
    UnknownPooling(String),

    /// An input or output value outside a function's declared domain.
    #[error("domain error: {0}")]
    DomainError(String),

    /// Too few observations to determine the requested parameters.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The minimizer walked away from a usable solution.
    #[error("optimization diverged: {0}")]
    OptimizationDivergence(String),

    /// A non-finite value appeared where a finite one is required.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// Fit results computed over different observation sets.
    #[error("incomparable models: {0}")]
    IncomparableModels(String),

    /// A parameter vector whose length does not match the layout.
    #[error("invalid parameter shape: {0}")]
    InvalidParameterShape(String),

    /// A lineage that is not in the tree or not assigned to any clade.
    #[error("unresolved lineage: {0}")]
    UnresolvedLineage(String),

    /// Malformed tree, observation or configuration input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FitError {
    /// Stable numeric code for each error kind (usable as a process exit code).
    pub fn code(&self) -> u8 {
        match self {
            FitError::InvalidInput(_) => 2,
            FitError::UnknownFunction(_) | FitError::UnknownPooling(_) => 3,
            FitError::UnresolvedLineage(_) => 4,
            FitError::InvalidParameterShape(_) => 5,
            FitError::DomainError(_) => 6,
            FitError::InsufficientData(_) => 7,
            FitError::OptimizationDivergence(_) => 8,
            FitError::NumericalInstability(_) => 9,
            FitError::IncomparableModels(_) => 10,
        }
    }
}
