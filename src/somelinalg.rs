//! some linear algebra functions used throughout the code
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

/// adapter around the unsymmetric sparse LU engine: symbolic analysis,
/// numeric factorization and back-substitution as separate phases
pub mod sparse_lu;
