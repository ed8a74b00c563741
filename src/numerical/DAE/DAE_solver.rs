//! # BDF time integrator for DAE systems
//!
//! ## Mathematical Foundation
//!
//! The solver integrates systems of differential-algebraic equations of the
//! semi-explicit/implicit form
//!
//! ```text
//! M(t) * dx/dt = f(x, t),    x(t0) given
//! ```
//!
//! where the mass matrix M may be singular: a zero row encodes a purely
//! algebraic constraint on x. The time discretization is the variable-step,
//! variable-order Backward Differentiation Formula written on the actual
//! (possibly non-uniform) timestamp stencil:
//!
//! ```text
//! sum_{k=0..p} alpha_k * x_{n+1-k} = h * M^{-1} * f(x_{n+1}, t_{n+1})
//! ```
//!
//! which in residual form for the Newton iteration reads
//!
//! ```text
//! r(x) = M(t_{n+1}) * ( sum_k alpha_k * x_{n+1-k} ) - h * f(x, t_{n+1}) = 0
//! ```
//!
//! with the iteration matrix
//!
//! ```text
//! A = alpha_0 * M(t_{n+1}) - h * J(x, t_{n+1}),    J = df/dx
//! ```
//!
//! The coefficients alpha_k are recomputed from the divided-difference form
//! of the BDF polynomial whenever h or p changes.
//!
//! ## Algorithm Flow
//!
//! 1. **Prediction**: polynomial extrapolation through the last p accepted
//!    points evaluated at t_{n+1}.
//! 2. **Correction**: Newton iteration A*dx = -r with the sparse LU adapter;
//!    converged when ||dx||_WRMS <= newton_tol with weights
//!    w_i = atol + rtol*|x_i|.
//! 3. **Error estimation**: the order-(p+1) divided difference across the
//!    history plus the new candidate, scaled by the BDF error constant;
//!    the step is accepted when ||LTE||_WRMS <= 1.
//! 4. **Step/order control**: h_new = h * max(0.1, min(10, safety *
//!    ||LTE||^(-1/(p+1)))); the order giving the largest predicted step
//!    among {p-1, p, p+1} wins, growth gated on history depth and on the
//!    number of steps since the last order change.
//! 5. **Observer**: called exactly once per accepted step, never on
//!    rejected trials.
//!
//! ## Failure semantics
//!
//! Newton non-convergence halves the step; after three consecutive
//! rejections the order drops by one (down to 1), after five the run fails
//! with the nonlinear-failure status. A singular iteration matrix earns one
//! step halving before it becomes fatal. Driving h below dt_min is fatal.
//! On any fatal error `x` keeps the last accepted state.

use crate::numerical::DAE::DAE_utils::{
    MAX_ORDER, SolutionHistory, bdf_derivative_weights, bdf_error_const, lagrange_extrapolate,
};
use crate::numerical::DAE::callbacks::{MassMatrix, Observer, RHS};
use crate::numerical::DAE::common::{
    SolverError, all_finite, default_newton_tol, error_weights, wrms_norm,
};
use crate::numerical::DAE::jacobian::JacobianProvider;
use crate::numerical::DAE::solver_options::{SolverOptions, TimeStepping};
use crate::numerical::DAE::sparse_matrix::SparseMatrix;
use crate::somelinalg::sparse_lu::SparseLu;
use log::{debug, info, warn};
use nalgebra::DVector;
use std::time::Instant;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.1;
const MAX_FACTOR: f64 = 10.0;
/// consecutive rejections before the order is dropped by one
const REJECTS_ORDER_DROP: usize = 3;
/// consecutive Newton rejections before the run fails
const REJECTS_FATAL: usize = 5;

/// Integrator life cycle. Idle until the first call, Starting until a single
/// BDF-1 step has built history, then Stepping with excursions to Rejected
/// on Newton or error-test failures; Terminal on t1 or on a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorState {
    Idle,
    Starting,
    Stepping,
    Rejected,
    Terminal,
}

/// Run counters, reset by every integration.
#[derive(Debug, Clone, Default)]
pub struct SolverStats {
    pub n_steps: usize,
    pub n_rejected: usize,
    pub n_newton_iters: usize,
    pub n_rhs_evals: usize,
    pub n_jac_evals: usize,
    pub n_mass_evals: usize,
    pub n_symbolic: usize,
    pub n_factor: usize,
    pub n_solve: usize,
    pub final_order: usize,
    pub final_dt: f64,
}

enum StepOutcome {
    Accepted {
        x_new: DVector<f64>,
        t_new: f64,
        err_norm: f64,
        err_norm_down: f64,
        err_norm_up: f64,
        newton_iters: usize,
    },
    NewtonFail,
    ErrorTestFail {
        err_norm: f64,
    },
    /// singular iteration matrix or numeric breakdown: one halving retry
    SingularMatrix(SolverError),
}

/// The BDF integrator core. Owns the history buffer, the iteration matrix
/// workspaces and the linear solver adapter; driven by
/// [`crate::numerical::DAE::DAE_api::DAESolver`].
pub struct BDFIntegrator {
    rhs: Box<dyn RHS>,
    jac: JacobianProvider,
    mass: Box<dyn MassMatrix>,
    pub opt: SolverOptions,

    n: usize,
    pub state: IntegratorState,
    t: f64,
    h: f64,
    order: usize,
    history: SolutionHistory,
    lin: SparseLu,

    mass_holder: SparseMatrix,
    mass_fresh: bool,
    jac_holder: SparseMatrix,

    newton_tol: f64,
    consecutive_rejects: usize,
    steps_since_order_change: usize,
    // H211b filter memory
    err_norm_prev: Option<f64>,
    h_prev: Option<f64>,

    pub stats: SolverStats,
}

impl BDFIntegrator {
    pub fn new(
        rhs: Box<dyn RHS>,
        jac: JacobianProvider,
        mass: Box<dyn MassMatrix>,
        opt: SolverOptions,
    ) -> Self {
        BDFIntegrator {
            rhs,
            jac,
            mass,
            opt,
            n: 0,
            state: IntegratorState::Idle,
            t: 0.0,
            h: 0.0,
            order: 1,
            history: SolutionHistory::new(MAX_ORDER + 2),
            lin: SparseLu::new(0),
            mass_holder: SparseMatrix::new(),
            mass_fresh: false,
            jac_holder: SparseMatrix::new(),
            newton_tol: 0.0,
            consecutive_rejects: 0,
            steps_since_order_change: 0,
            err_norm_prev: None,
            h_prev: None,
            stats: SolverStats::default(),
        }
    }

    pub fn current_time(&self) -> f64 {
        self.t
    }

    pub fn current_order(&self) -> usize {
        self.order
    }

    /// Integrates the system on [t0, t1] in place on `x`. On success `x`
    /// holds the state at exactly t1; on failure it holds the last accepted
    /// state. The observer, if any, receives every accepted step.
    pub fn integrate(
        &mut self,
        x: &mut DVector<f64>,
        t1: f64,
        observer: Option<&mut dyn Observer>,
    ) -> Result<(), SolverError> {
        let started = Instant::now();
        let result = self.run(x, t1, observer);
        self.stats.n_symbolic = self.lin.n_symbolic;
        self.stats.n_factor = self.lin.n_factor;
        self.stats.n_solve = self.lin.n_solve;
        self.stats.final_order = self.order;
        self.stats.final_dt = self.h;
        self.state = IntegratorState::Terminal;
        match &result {
            Ok(()) => info!(
                "integration finished at t = {:e}: {} steps, {} rejected, {} ms",
                t1,
                self.stats.n_steps,
                self.stats.n_rejected,
                started.elapsed().as_millis()
            ),
            Err(e) => warn!("integration failed at t = {:e}: {}", self.t, e),
        }
        result
    }

    fn run(
        &mut self,
        x: &mut DVector<f64>,
        t1: f64,
        mut observer: Option<&mut dyn Observer>,
    ) -> Result<(), SolverError> {
        self.opt.validate()?;
        self.n = x.len();
        if self.n == 0 {
            return Err(SolverError::UserError("empty state vector".to_string()));
        }
        if !all_finite(x) {
            return Err(SolverError::UserError(
                "initial state contains non-finite components".to_string(),
            ));
        }
        if !(t1 > self.opt.t0) {
            return Err(SolverError::UserError(format!(
                "t1 = {} must be greater than t0 = {}",
                t1, self.opt.t0
            )));
        }

        // Starting: p := 1, h := dt_init, history seeded with x(t0)
        self.state = IntegratorState::Starting;
        self.t = self.opt.t0;
        self.h = self.opt.dt_init.min(self.opt.dt_max);
        self.order = 1;
        self.history.reset(self.t, x);
        self.lin = SparseLu::new(self.n);
        self.newton_tol = self
            .opt
            .newton_tol
            .unwrap_or_else(|| default_newton_tol(self.opt.rtol));
        self.consecutive_rejects = 0;
        self.steps_since_order_change = 0;
        self.err_norm_prev = None;
        self.h_prev = None;
        self.stats = SolverStats::default();
        self.mass_fresh = false;

        // prime the mass matrix, the Jacobian and the symbolic phase of the
        // linear solver at (x(t0), t0)
        self.refresh_mass(self.t)?;
        self.eval_jacobian(x, self.t)?;
        let prime_h = self.h.min(t1 - self.t);
        let c = bdf_derivative_weights(self.t + prime_h, &[self.t]);
        let a = self.assemble_iteration_matrix(c[0] * prime_h, prime_h);
        self.lin.analyze(&a)?;
        debug!(
            "solver primed: n = {}, nnz(M) = {}, nnz(J) = {}, newton_tol = {:.3e}",
            self.n,
            self.mass_holder.n_elements(),
            self.jac_holder.n_elements(),
            self.newton_tol
        );

        // true while the immediately preceding trial failed in the linear
        // solver; a second singular failure in a row is fatal
        let mut singular_retry = false;
        while self.t < t1 {
            // clip the final step to land exactly on t1, no overshoot
            let t_new = if self.t + self.h >= t1 {
                t1
            } else {
                self.t + self.h
            };
            if !(t_new > self.t) {
                break;
            }

            let h_att = t_new - self.t;
            match self.attempt_step(t_new, h_att)? {
                StepOutcome::Accepted {
                    x_new,
                    t_new,
                    err_norm,
                    err_norm_down,
                    err_norm_up,
                    newton_iters,
                } => {
                    self.consecutive_rejects = 0;
                    singular_retry = false;
                    self.history.push(t_new, x_new.clone());
                    self.t = t_new;
                    x.copy_from(&x_new);
                    self.stats.n_steps += 1;
                    self.steps_since_order_change += 1;
                    if self.opt.verbosity >= 2 {
                        info!(
                            "step {} accepted: t = {:.6e}, h = {:.3e}, order = {}, {} newton iters, err = {:.3e}",
                            self.stats.n_steps, self.t, h_att, self.order, newton_iters, err_norm
                        );
                    } else {
                        debug!(
                            "step {} accepted: t = {:.6e}, h = {:.3e}, order = {}, {} newton iters, err = {:.3e}",
                            self.stats.n_steps, self.t, h_att, self.order, newton_iters, err_norm
                        );
                    }
                    if let Some(obs) = observer.as_deref_mut() {
                        obs.call(x, self.t);
                    }
                    self.state = IntegratorState::Stepping;
                    if self.t < t1 {
                        self.adapt(err_norm, err_norm_down, err_norm_up, newton_iters, h_att);
                    }
                }
                StepOutcome::NewtonFail => {
                    self.state = IntegratorState::Rejected;
                    self.stats.n_rejected += 1;
                    self.consecutive_rejects += 1;
                    // the next trial is a different one, the singular
                    // halving budget starts over
                    singular_retry = false;
                    debug!(
                        "newton did not converge at t = {:.6e} (h = {:.3e}), rejection {} in a row",
                        t_new, h_att, self.consecutive_rejects
                    );
                    if self.consecutive_rejects >= REJECTS_FATAL {
                        return Err(SolverError::NonlinearFail(format!(
                            "newton failed {} times in a row near t = {:e}",
                            REJECTS_FATAL, self.t
                        )));
                    }
                    if self.consecutive_rejects >= REJECTS_ORDER_DROP && self.order > 1 {
                        self.order -= 1;
                        self.steps_since_order_change = 0;
                        self.err_norm_prev = None;
                        debug!("order dropped to {}", self.order);
                    }
                    self.h = 0.5 * h_att;
                    self.check_step_underflow()?;
                }
                StepOutcome::ErrorTestFail { err_norm } => {
                    self.state = IntegratorState::Rejected;
                    self.stats.n_rejected += 1;
                    self.consecutive_rejects += 1;
                    singular_retry = false;
                    debug!(
                        "error test failed at t = {:.6e}: err = {:.3e} (h = {:.3e})",
                        t_new, err_norm, h_att
                    );
                    if self.consecutive_rejects >= REJECTS_ORDER_DROP && self.order > 1 {
                        self.order -= 1;
                        self.steps_since_order_change = 0;
                        self.err_norm_prev = None;
                    }
                    let factor = (SAFETY * err_norm.powf(-1.0 / (self.order as f64 + 1.0)))
                        .clamp(MIN_FACTOR, 0.9);
                    self.h = h_att * factor;
                    self.check_step_underflow()?;
                }
                StepOutcome::SingularMatrix(e) => {
                    self.state = IntegratorState::Rejected;
                    self.stats.n_rejected += 1;
                    if singular_retry {
                        return Err(e);
                    }
                    warn!(
                        "linear solver failed at t = {:.6e} ({}), retrying with h/2",
                        t_new, e
                    );
                    singular_retry = true;
                    self.h = 0.5 * h_att;
                    self.check_step_underflow()?;
                }
            }
        }
        Ok(())
    }

    fn check_step_underflow(&self) -> Result<(), SolverError> {
        if self.h < self.opt.dt_min {
            return Err(SolverError::StepUnderflow(format!(
                "h = {:e} fell below dt_min = {:e} at t = {:e}",
                self.h, self.opt.dt_min, self.t
            )));
        }
        Ok(())
    }

    /// One trial step to t_new. Everything local to the trial lives here;
    /// the history and the committed state are touched only by the caller
    /// on acceptance.
    fn attempt_step(&mut self, t_new: f64, h: f64) -> Result<StepOutcome, SolverError> {
        let p = self.order.min(self.history.len());
        let (past_times, past_states) = self.history.window(p);

        // BDF coefficients on the actual stencil, alpha_k = h * c_k
        let c = bdf_derivative_weights(t_new, &past_times);
        let alpha: Vec<f64> = c.iter().map(|ck| ck * h).collect();

        // predictor: extrapolation through the last p accepted points
        let x_pred = lagrange_extrapolate(t_new, &past_times, &past_states);
        let weights = error_weights(&x_pred, self.opt.atol, self.opt.rtol);

        // frozen part of the BDF combination: sum_{k=1..p} alpha_k * x_{n+1-k}
        let mut hist_sum: DVector<f64> = DVector::zeros(self.n);
        for k in 1..=p {
            hist_sum += alpha[k] * self.history.state(k - 1);
        }

        self.refresh_mass(t_new)?;
        self.eval_jacobian(&x_pred, t_new)?;
        let a = self.assemble_iteration_matrix(alpha[0], h);
        if let Err(e) = self.lin.analyze(&a) {
            return Ok(StepOutcome::SingularMatrix(e));
        }
        match self.lin.factorize(&a) {
            Ok(()) => {}
            Err(e @ SolverError::Singular(_)) | Err(e @ SolverError::NumericBreakdown(_)) => {
                return Ok(StepOutcome::SingularMatrix(e));
            }
            Err(e) => return Err(e),
        }

        // Newton loop on r(x) = M*(alpha_0*x + hist_sum) - h*f(x, t_new)
        let mut xk = x_pred.clone();
        let mut fvec = DVector::zeros(self.n);
        let mut converged = false;
        let mut iters = 0;
        for k in 0..self.opt.max_newton_iter {
            self.rhs.call(&mut fvec, &xk, t_new);
            self.stats.n_rhs_evals += 1;
            if !all_finite(&fvec) {
                return Err(SolverError::UserError(format!(
                    "RHS produced non-finite output at t = {:e}",
                    t_new
                )));
            }
            if self.opt.fact_every_iter && k > 0 {
                self.eval_jacobian(&xk, t_new)?;
                let a = self.assemble_iteration_matrix(alpha[0], h);
                match self.lin.factorize(&a) {
                    Ok(()) => {}
                    Err(e @ SolverError::Singular(_))
                    | Err(e @ SolverError::NumericBreakdown(_)) => {
                        return Ok(StepOutcome::SingularMatrix(e));
                    }
                    Err(e) => return Err(e),
                }
            }
            let bdf_comb = alpha[0] * &xk + &hist_sum;
            let residual = self.mass_holder.mul_vec(&bdf_comb) - h * &fvec;
            let delta = match self.lin.solve(&(-residual)) {
                Ok(d) => d,
                Err(e) => return Ok(StepOutcome::SingularMatrix(e)),
            };
            xk += &delta;
            iters = k + 1;
            let dx_norm = wrms_norm(&delta, &weights);
            if !dx_norm.is_finite() {
                return Ok(StepOutcome::SingularMatrix(SolverError::NumericBreakdown(
                    format!("non-finite newton correction at t = {:e}", t_new),
                )));
            }
            if dx_norm <= self.newton_tol {
                converged = true;
                break;
            }
        }
        self.stats.n_newton_iters += iters;
        if !converged {
            return Ok(StepOutcome::NewtonFail);
        }

        // local truncation error: order-(p+1) divided difference across the
        // history plus the new candidate, written as the remainder against
        // the extrapolant through the last p+1 accepted points
        let w_new = error_weights(&xk, self.opt.atol, self.opt.rtol);
        let q = (p + 1).min(self.history.len());
        let (lte_times, lte_states) = self.history.window(q);
        let x_ext = lagrange_extrapolate(t_new, &lte_times, &lte_states);
        let lte = bdf_error_const(p) * (&xk - &x_ext);
        let err_norm = wrms_norm(&lte, &w_new);

        if self.opt.time_stepping != TimeStepping::Fixed && err_norm > 1.0 {
            return Ok(StepOutcome::ErrorTestFail { err_norm });
        }

        // error estimates one order down and one order up, for the order
        // selection; infinity marks "not available / not allowed"
        let err_norm_down = if p > 1 {
            let down = bdf_error_const(p - 1) * (&xk - &x_pred);
            wrms_norm(&down, &w_new)
        } else {
            f64::INFINITY
        };
        let err_norm_up = if p < self.opt.bdf_order
            && self.history.len() >= p + 2
            && self.steps_since_order_change >= p
        {
            let (up_times, up_states) = self.history.window(p + 2);
            let x_up = lagrange_extrapolate(t_new, &up_times, &up_states);
            let up = bdf_error_const(p + 1) * (&xk - &x_up);
            wrms_norm(&up, &w_new)
        } else {
            f64::INFINITY
        };

        Ok(StepOutcome::Accepted {
            x_new: xk,
            t_new,
            err_norm,
            err_norm_down,
            err_norm_up,
            newton_iters: iters,
        })
    }

    /// Step/order adaptation after an accepted step.
    fn adapt(
        &mut self,
        err_norm: f64,
        err_norm_down: f64,
        err_norm_up: f64,
        newton_iters: usize,
        h_used: f64,
    ) {
        if self.opt.time_stepping == TimeStepping::Fixed {
            // constant step; ramp the order up to the cap as soon as the
            // history can support it
            if self.order < self.opt.bdf_order && self.history.len() > self.order {
                self.order += 1;
            }
            self.h = self.opt.dt_init;
            return;
        }

        // order selection: the order with the largest predicted step wins
        let f_keep = elementary_factor(err_norm, self.order);
        let mut best_order = self.order;
        let mut best_factor = f_keep;
        if err_norm_down.is_finite() && self.order > 1 {
            let f = elementary_factor(err_norm_down, self.order - 1);
            if f > best_factor {
                best_order = self.order - 1;
                best_factor = f;
            }
        }
        if err_norm_up.is_finite() {
            let f = elementary_factor(err_norm_up, self.order + 1);
            if f > best_factor {
                best_order = self.order + 1;
                best_factor = f;
            }
        }

        let order_changed = best_order != self.order;
        if order_changed {
            debug!(
                "order {} -> {} (predicted step factor {:.3})",
                self.order, best_order, best_factor
            );
            self.order = best_order;
            self.steps_since_order_change = 0;
        }

        let factor = match self.opt.time_stepping {
            TimeStepping::SimpleStability => {
                // step control from the nonlinear solve behaviour alone
                if newton_iters <= 2 {
                    2.0
                } else if newton_iters + 1 >= self.opt.max_newton_iter {
                    0.5
                } else {
                    1.0
                }
            }
            TimeStepping::AdaptiveH211b => {
                if order_changed {
                    // restart the filter on the fresh error scale
                    self.err_norm_prev = None;
                    best_factor
                } else {
                    match (self.err_norm_prev, self.h_prev) {
                        (Some(err_prev), Some(h_prev))
                            if err_norm > 0.0 && err_prev > 0.0 && h_prev > 0.0 =>
                        {
                            let beta = 1.0 / (4.0 * (self.order as f64 + 1.0));
                            (1.0 / err_norm).powf(beta)
                                * (1.0 / err_prev).powf(beta)
                                * (h_used / h_prev).powf(-0.25)
                        }
                        _ => f_keep,
                    }
                }
            }
            TimeStepping::Fixed => unreachable!(),
        };

        let factor = factor.clamp(MIN_FACTOR, MAX_FACTOR);
        self.h = (h_used * factor).clamp(self.opt.dt_min, self.opt.dt_max);
        self.err_norm_prev = Some(err_norm);
        self.h_prev = Some(h_used);
    }

    /// Mass matrix, evaluated at most once per step and memoized when the
    /// callback declares itself constant.
    fn refresh_mass(&mut self, t: f64) -> Result<(), SolverError> {
        if self.mass_fresh && self.mass.is_constant() {
            return Ok(());
        }
        self.mass_holder.clear();
        self.mass.call(&mut self.mass_holder, t);
        self.mass_holder.finalize();
        self.mass_holder.validate(self.n)?;
        if !self.mass_holder.values_finite() {
            return Err(SolverError::UserError(format!(
                "mass matrix produced non-finite entries at t = {:e}",
                t
            )));
        }
        self.stats.n_mass_evals += 1;
        self.mass_fresh = true;
        Ok(())
    }

    fn eval_jacobian(&mut self, x: &DVector<f64>, t: f64) -> Result<(), SolverError> {
        let rhs_calls = self
            .jac
            .evaluate(&mut self.jac_holder, self.rhs.as_ref(), x, t);
        self.stats.n_rhs_evals += rhs_calls;
        self.stats.n_jac_evals += 1;
        self.jac_holder.validate(self.n)?;
        if !self.jac_holder.values_finite() {
            return Err(SolverError::UserError(format!(
                "Jacobian produced non-finite entries at t = {:e}",
                t
            )));
        }
        Ok(())
    }

    /// A = alpha_0 * M - h * J. Overlapping mass/Jacobian entries are summed
    /// on conversion inside the adapter.
    fn assemble_iteration_matrix(&self, alpha0: f64, h: f64) -> SparseMatrix {
        let mut a = SparseMatrix::with_capacity(
            self.mass_holder.n_elements() + self.jac_holder.n_elements(),
        );
        for k in 0..self.mass_holder.n_elements() {
            a.add_element(
                alpha0 * self.mass_holder.a[k],
                self.mass_holder.i[k],
                self.mass_holder.j[k],
            );
        }
        for k in 0..self.jac_holder.n_elements() {
            a.add_element(
                -h * self.jac_holder.a[k],
                self.jac_holder.i[k],
                self.jac_holder.j[k],
            );
        }
        a.finalize();
        a
    }
}

/// Unclamped elementary step factor safety * err^(-1/(order+1)). Left
/// unclamped so the order selection can compare the candidates; the caller
/// clamps to [0.1, 10] before applying. An error at round-off level (e.g.
/// polynomial trajectories) predicts an unbounded step.
fn elementary_factor(err_norm: f64, order: usize) -> f64 {
    if err_norm <= f64::EPSILON {
        return f64::INFINITY;
    }
    SAFETY * err_norm.powf(-1.0 / (order as f64 + 1.0))
}
