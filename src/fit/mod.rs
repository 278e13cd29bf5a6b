//! Model fitting orchestration.
//!
//! Responsibilities:
//!
//! - lay out flat parameter vectors per pooling strategy
//! - minimize the fitting objective (argmin Nelder–Mead)
//! - fit single models and the full model matrix (parallel)
//! - score and rank fits with AIC / BIC

pub mod fitter;
pub mod layout;
pub mod matrix;
pub mod optimizer;
pub mod selection;

pub use fitter::*;
pub use layout::*;
pub use matrix::*;
pub use optimizer::*;
pub use selection::*;
