//! `velocitree` library crate.
//!
//! Fits and compares phenotypic-change ("velocity") functions across the
//! clades of a phylogenetic tree, and simulates datasets from known models.
//!
//! - `domain`: tree, clades, observations, model and result types, config
//! - `models`: the function library
//! - `fit`: layouts, optimizer, fitting engine, ranking, model matrix
//! - `data`: random trees and the simulator
//! - `pipeline`: the `fit_matrix` / `generate` entry points
//! - `report`: residuals and parameter recovery

pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod models;
pub mod pipeline;
pub mod report;

pub use error::FitError;
pub use pipeline::{fit_matrix, generate};
