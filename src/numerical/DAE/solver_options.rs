//! Enumerated solver options. Immutable during a run.

use crate::numerical::DAE::common::SolverError;
use crate::numerical::DAE::DAE_utils::MAX_ORDER;

/// Time step controller choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStepping {
    /// Soderlind H211b digital filter on the local error estimate; falls
    /// back to the elementary controller on the first controlled step and
    /// after every order change. The default.
    AdaptiveH211b,
    /// Step doubling/halving driven by the Newton iteration count of the
    /// accepted step. The local error test still guards acceptance.
    SimpleStability,
    /// Constant step dt_init, no error rejection. The last step is still
    /// clipped to land exactly on t1.
    Fixed,
}

/// Configuration record for the DAE solver.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// initial time (the integration runs on [t0, t1])
    pub t0: f64,
    /// initial time step
    pub dt_init: f64,
    /// lower bound of the time step; driving h below it is a fatal error
    pub dt_min: f64,
    /// upper bound of the time step
    pub dt_max: f64,
    /// absolute tolerance of the WRMS norms
    pub atol: f64,
    /// relative tolerance of the WRMS norms
    pub rtol: f64,
    /// maximum permitted BDF order, 1..=6
    pub bdf_order: usize,
    /// step controller choice
    pub time_stepping: TimeStepping,
    /// Newton iteration cap per step attempt
    pub max_newton_iter: usize,
    /// Newton convergence tolerance on ||dx||_WRMS; None derives it from rtol
    pub newton_tol: Option<f64>,
    /// if false, the iteration matrix is factorized once per step attempt
    /// and the factorization is reused across the Newton iterations
    pub fact_every_iter: bool,
    /// diagnostic emission level: 0 silent, 1 run summary, 2 per-step lines
    pub verbosity: usize,
    /// perturbation of the numerical Jacobian estimator
    pub jacobian_fd_tol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            t0: 0.0,
            dt_init: 0.1,
            dt_min: 1e-12,
            dt_max: f64::INFINITY,
            atol: 1e-6,
            rtol: 1e-3,
            bdf_order: 5,
            time_stepping: TimeStepping::AdaptiveH211b,
            max_newton_iter: 8,
            newton_tol: None,
            fact_every_iter: true,
            verbosity: 0,
            jacobian_fd_tol: 1e-8,
        }
    }
}

impl SolverOptions {
    /// Checks the option invariants before a run starts.
    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.dt_init > 0.0) {
            return Err(SolverError::UserError(
                "dt_init must be positive".to_string(),
            ));
        }
        if !(self.dt_min > 0.0) || self.dt_min > self.dt_max {
            return Err(SolverError::UserError(format!(
                "invalid step bounds: dt_min = {}, dt_max = {}",
                self.dt_min, self.dt_max
            )));
        }
        if self.dt_init < self.dt_min || self.dt_init > self.dt_max {
            return Err(SolverError::UserError(format!(
                "dt_init = {} outside of [dt_min, dt_max] = [{}, {}]",
                self.dt_init, self.dt_min, self.dt_max
            )));
        }
        if !(self.atol > 0.0) || !(self.rtol > 0.0) {
            return Err(SolverError::UserError(format!(
                "tolerances must be positive: atol = {}, rtol = {}",
                self.atol, self.rtol
            )));
        }
        if self.bdf_order < 1 || self.bdf_order > MAX_ORDER {
            return Err(SolverError::UserError(format!(
                "bdf_order = {} outside of 1..={}",
                self.bdf_order, MAX_ORDER
            )));
        }
        if self.max_newton_iter < 1 {
            return Err(SolverError::UserError(
                "max_newton_iter must be at least 1".to_string(),
            ));
        }
        if let Some(tol) = self.newton_tol {
            if !(tol > 0.0) {
                return Err(SolverError::UserError(
                    "newton_tol must be positive".to_string(),
                ));
            }
        }
        if !(self.jacobian_fd_tol > 0.0) {
            return Err(SolverError::UserError(
                "jacobian_fd_tol must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SolverOptions::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let mut opt = SolverOptions::default();
        opt.bdf_order = 7;
        assert!(opt.validate().is_err());

        let mut opt = SolverOptions::default();
        opt.dt_init = -1.0;
        assert!(opt.validate().is_err());

        let mut opt = SolverOptions::default();
        opt.dt_min = 1.0;
        opt.dt_init = 0.5;
        assert!(opt.validate().is_err());

        let mut opt = SolverOptions::default();
        opt.rtol = 0.0;
        assert!(opt.validate().is_err());
    }
}
