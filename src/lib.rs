#![deny(unused_variables)]
#![deny(clippy::no_effect_underscore_binding)]

//! Regularized principal component analysis by alternating least squares.
//!
//! The engine factors a row-partitioned matrix `A ≈ X·Y` under quadratic
//! regularization and recovers orthonormal principal directions from the two
//! small factors once the iteration has converged. See [`pca::AlsPca`] for the
//! entry point.

#[path = "../pca/mod.rs"]
pub mod pca;
