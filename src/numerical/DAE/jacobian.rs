//! # Jacobian provider
//!
//! Either the user supplies an analytical Jacobian (preferred, the sparsity
//! pattern is trusted) or the solver estimates it numerically from the RHS
//! by one-sided finite differences:
//!
//! ```text
//! J[i][j] ~ (f_i(x + h_j*e_j, t) - f_i(x, t)) / h_j,   h_j = max(|x_j|*eps, eps)
//! ```
//!
//! with eps = `jacobian_fd_tol`. One evaluation costs N+1 RHS calls, hence
//! O(N^2) operations. Column perturbations are independent, so they run in
//! parallel and join before the estimate is assembled; the result does not
//! depend on the thread schedule because columns are collected in index
//! order. Elements below the recording threshold are dropped, which is what
//! keeps the estimate sparse.

use crate::numerical::DAE::callbacks::{Jacobian, RHS};
use crate::numerical::DAE::sparse_matrix::SparseMatrix;
use nalgebra::DVector;
use rayon::prelude::*;

/// Numerical finite-difference estimator built on top of the RHS callback.
pub struct NumericalJacobian {
    /// perturbation used for every column, eps above
    pub fd_tol: f64,
    /// elements with |J[i][j]| below this are not recorded
    pub record_tol: f64,
}

impl NumericalJacobian {
    pub fn new(fd_tol: f64, record_tol: f64) -> Self {
        NumericalJacobian { fd_tol, record_tol }
    }

    /// Estimates J = df/dx at (x, t) into `jac`. Returns the number of RHS
    /// calls made (N + 1).
    pub fn estimate(
        &self,
        jac: &mut SparseMatrix,
        rhs: &dyn RHS,
        x: &DVector<f64>,
        t: f64,
    ) -> usize {
        let n = x.len();
        let mut f0 = DVector::zeros(n);
        rhs.call(&mut f0, x, t);

        let fd_tol = self.fd_tol;
        let record_tol = self.record_tol;
        // one column per task; each task owns its perturbed copy of x
        let columns: Vec<Vec<(usize, f64)>> = (0..n)
            .into_par_iter()
            .map(|col| {
                let mut x1 = x.clone();
                let h = f64::max(x1[col].abs() * fd_tol, fd_tol);
                x1[col] += h;
                let mut f1 = DVector::zeros(n);
                rhs.call(&mut f1, &x1, t);
                let mut entries: Vec<(usize, f64)> = Vec::new();
                for row in 0..n {
                    let der = (f1[row] - f0[row]) / h;
                    if der.abs() > record_tol {
                        entries.push((row, der));
                    }
                }
                entries
            })
            .collect();

        jac.clear();
        for (col, entries) in columns.iter().enumerate() {
            for &(row, der) in entries {
                jac.add_element(der, row, col);
            }
        }
        jac.finalize();
        n + 1
    }
}

/// Composition over the two Jacobian sources. The integrator treats both as
/// black boxes; the only observable difference is cost.
pub enum JacobianProvider {
    Analytic(Box<dyn Jacobian>),
    Numerical(NumericalJacobian),
}

impl JacobianProvider {
    /// Fills `jac` with J(x, t). Returns the number of extra RHS calls the
    /// evaluation consumed (0 for the analytical path).
    pub fn evaluate(
        &mut self,
        jac: &mut SparseMatrix,
        rhs: &dyn RHS,
        x: &DVector<f64>,
        t: f64,
    ) -> usize {
        match self {
            JacobianProvider::Analytic(user_jac) => {
                jac.clear();
                user_jac.call(jac, x, t);
                jac.finalize();
                0
            }
            JacobianProvider::Numerical(estimator) => estimator.estimate(jac, rhs, x, t),
        }
    }
}
