//! Phenotypic velocity function library.
//!
//! Functions are identified by `FunctionKind` and evaluated through small,
//! pure methods so that fitting and simulation code can stay generic.

pub mod function;

pub use function::*;
