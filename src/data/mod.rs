//! Synthetic data: random trees and simulated cross observations.

pub mod random_tree;
pub mod simulate;

pub use random_tree::*;
pub use simulate::*;
