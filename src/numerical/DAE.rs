/// three-array coordinate sparse matrix container and CSR conversion
pub mod sparse_matrix;
/// user callback contracts: RHS, Jacobian, Mass matrix, Observer
pub mod callbacks;
/// Jacobian provider: analytical or numerical (finite differences)
pub mod jacobian;
/// enumerated solver options
pub mod solver_options;
/// norms, error weights and the solver error taxonomy
pub mod common;
/// history ring buffer and BDF coefficients on a non-uniform stencil
pub mod DAE_utils;
/// the BDF time integrator itself
pub mod DAE_solver;
/// api for the DAE solver
pub mod DAE_api;

mod DAE_tests;
