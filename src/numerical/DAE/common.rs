extern crate nalgebra as na;

use na::DVector;
use std::error::Error;
use std::fmt;

/// Error taxonomy of the DAE solver. Kinds, not types: every failure the
/// integrator can surface to the caller is one of these, and each kind maps
/// to a stable non-zero integer status code (`0` is reserved for success).
///
/// Recovery policy: only step-size and order adjustments are recovered
/// locally by the integrator. Everything below is what is left after the
/// local recovery gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Sparse-matrix invariants violated (duplicate entries, out-of-range
    /// indices, inconsistent array lengths)
    Shape(String),
    /// Iteration matrix is singular at the current (x, t)
    Singular(String),
    /// Linear-solver pivot/growth failure, non-finite factors or solution
    NumericBreakdown(String),
    /// Newton iteration did not converge after the retry budget
    NonlinearFail(String),
    /// Step size driven below dt_min by repeated rejections
    StepUnderflow(String),
    /// Allocation failure in some subsystem
    Memory(String),
    /// RHS or Jacobian produced non-finite output, or the problem setup
    /// itself is unusable
    UserError(String),
}

impl SolverError {
    /// Integer status code of the error kind. `integrate_status` returns 0
    /// on success and this code on failure.
    pub fn code(&self) -> i32 {
        match self {
            SolverError::Shape(_) => 1,
            SolverError::Singular(_) => 2,
            SolverError::NumericBreakdown(_) => 3,
            SolverError::NonlinearFail(_) => 4,
            SolverError::StepUnderflow(_) => 5,
            SolverError::Memory(_) => 6,
            SolverError::UserError(_) => 7,
        }
    }
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::Shape(msg) => write!(f, "sparse matrix shape error: {}", msg),
            SolverError::Singular(msg) => write!(f, "singular iteration matrix: {}", msg),
            SolverError::NumericBreakdown(msg) => write!(f, "numeric breakdown: {}", msg),
            SolverError::NonlinearFail(msg) => write!(f, "Newton iteration failed: {}", msg),
            SolverError::StepUnderflow(msg) => write!(f, "time step underflow: {}", msg),
            SolverError::Memory(msg) => write!(f, "allocation failure: {}", msg),
            SolverError::UserError(msg) => write!(f, "user error: {}", msg),
        }
    }
}

impl Error for SolverError {}

/// Per-component error weights w_i = atol + rtol*|x_i| used by the WRMS norm
/// both in the Newton convergence test and in the local error test.
pub fn error_weights(x: &DVector<f64>, atol: f64, rtol: f64) -> DVector<f64> {
    x.map(|xi| atol + rtol * xi.abs())
}

/// Weighted root-mean-square norm: ||v||_WRMS = |v ./ w|_2 / sqrt(n).
/// A step or a Newton correction is acceptable when this norm is <= 1
/// (error test) or <= newton_tol (convergence test).
pub fn wrms_norm(v: &DVector<f64>, w: &DVector<f64>) -> f64 {
    if v.len() == 0 {
        return 0.0;
    }
    let scaled = v.component_div(w);
    scaled.norm() / (v.len() as f64).sqrt()
}

pub fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|&x| x.is_finite())
}

/// Newton tolerance derived from rtol when the user did not set one.
pub fn default_newton_tol(rtol: f64) -> f64 {
    f64::max(
        10.0 * f64::EPSILON / rtol,
        f64::min(0.03, rtol.powf(0.5)),
    )
}
