//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - the tree topology and clade membership (`Tree`, `CladeMap`)
//! - validated cross observations (`ObservationSet`)
//! - registries and fit outputs (`FunctionKind`, `PoolingKind`, `FitResult`, etc.)
//! - fitting configuration (`FitConfig`)

pub mod clades;
pub mod config;
pub mod observations;
pub mod tree;
pub mod types;

pub use clades::*;
pub use config::*;
pub use observations::*;
pub use tree::*;
pub use types::*;
