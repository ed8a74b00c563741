//! # Sparse LU adapter
//!
//! Wraps the unsymmetric sparse direct solver of faer behind the three-phase
//! contract the integrator relies on:
//!
//! | phase    | action                                   | when                        |
//! |----------|------------------------------------------|-----------------------------|
//! | symbolic | analyze sparsity, build elimination order | once per pattern change     |
//! | numeric  | LU factor the current values              | each step (or each Newton iteration) |
//! | solve    | back/forward substitution                 | each Newton iteration       |
//!
//! The sparsity pattern is fingerprinted by the sorted (i, j) pair list of
//! the matrix; the symbolic phase is re-run only when the fingerprint
//! changes. This is the only module that names the third-party LU engine -
//! the rest of the solver depends on this contract alone.

use crate::numerical::DAE::common::{SolverError, all_finite};
use crate::numerical::DAE::sparse_matrix::SparseMatrix;
use faer::Mat;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use log::{debug, warn};
use nalgebra::DVector;

pub struct SparseLu {
    n: usize,
    symbolic: Option<SymbolicLu<usize>>,
    numeric: Option<Lu<usize, f64>>,
    fingerprint: Vec<(usize, usize)>,
    /// phase counters, reused by the integrator statistics
    pub n_symbolic: usize,
    pub n_factor: usize,
    pub n_solve: usize,
}

impl SparseLu {
    pub fn new(n: usize) -> Self {
        SparseLu {
            n,
            symbolic: None,
            numeric: None,
            fingerprint: Vec::new(),
            n_symbolic: 0,
            n_factor: 0,
            n_solve: 0,
        }
    }

    /// Drops the cached symbolic and numeric factorizations.
    pub fn reset(&mut self) {
        self.symbolic = None;
        self.numeric = None;
        self.fingerprint.clear();
    }

    /// Symbolic phase: analyzes the sparsity of `a` and builds the
    /// elimination order. A no-op while the pattern fingerprint is unchanged.
    pub fn analyze(&mut self, a: &SparseMatrix) -> Result<(), SolverError> {
        let pattern = a.pattern();
        if self.symbolic.is_some() && pattern == self.fingerprint {
            return Ok(());
        }
        if self.symbolic.is_some() {
            debug!(
                "sparsity pattern changed ({} -> {} non-zeros), symbolic LU re-run",
                self.fingerprint.len(),
                pattern.len()
            );
        }
        let mat = a.to_faer(self.n, self.n)?;
        let symbolic = SymbolicLu::try_new(mat.symbolic()).map_err(|e| {
            SolverError::Singular(format!("symbolic LU analysis failed: {:?}", e))
        })?;
        self.symbolic = Some(symbolic);
        self.numeric = None;
        self.fingerprint = pattern;
        self.n_symbolic += 1;
        Ok(())
    }

    /// Numeric phase: factors the current values of `a`. Re-runs the
    /// symbolic phase itself when the pattern changed. On a factorization
    /// failure the symbolic phase is rebuilt once before the failure is
    /// surfaced as a singular-matrix error.
    pub fn factorize(&mut self, a: &SparseMatrix) -> Result<(), SolverError> {
        if !a.values_finite() {
            return Err(SolverError::NumericBreakdown(
                "non-finite entries in the iteration matrix".to_string(),
            ));
        }
        self.analyze(a)?;
        let mat = a.to_faer(self.n, self.n)?;
        let symbolic = self
            .symbolic
            .clone()
            .ok_or_else(|| SolverError::Memory("symbolic factorization missing".to_string()))?;
        match Lu::try_new_with_symbolic(symbolic, mat.as_ref()) {
            Ok(lu) => {
                self.numeric = Some(lu);
                self.n_factor += 1;
                Ok(())
            }
            Err(_) => {
                warn!("numeric LU failed, rebuilding the symbolic phase once");
                self.symbolic = None;
                self.analyze(a)?;
                let symbolic = self.symbolic.clone().ok_or_else(|| {
                    SolverError::Memory("symbolic factorization missing".to_string())
                })?;
                match Lu::try_new_with_symbolic(symbolic, mat.as_ref()) {
                    Ok(lu) => {
                        self.numeric = Some(lu);
                        self.n_factor += 1;
                        Ok(())
                    }
                    Err(e) => Err(SolverError::Singular(format!(
                        "sparse LU factorization failed: {:?}",
                        e
                    ))),
                }
            }
        }
    }

    /// Solve phase: back/forward substitution with the current factors.
    pub fn solve(&mut self, b: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        let lu = self.numeric.as_ref().ok_or_else(|| {
            SolverError::Singular("solve called before numeric factorization".to_string())
        })?;
        let rhs = Mat::from_fn(self.n, 1, |row, _| b[row]);
        let sol = lu.solve(&rhs);
        self.n_solve += 1;
        let x = DVector::from_fn(self.n, |row, _| sol[(row, 0)]);
        if !all_finite(&x) {
            return Err(SolverError::NumericBreakdown(
                "non-finite solution from back-substitution".to_string(),
            ));
        }
        Ok(x)
    }
}
