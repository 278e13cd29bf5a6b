//! Mathematical utilities: least squares, search grids and curvature.

pub mod curvature;
pub mod grid;
pub mod ols;

pub use curvature::*;
pub use grid::*;
pub use ols::*;
