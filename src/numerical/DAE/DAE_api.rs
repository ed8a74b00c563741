//! High-level API of the DAE solver.
//!
//! `DAESolver` wires the user callbacks, the Jacobian provider and the BDF
//! core together, and carries the conveniences that do not belong in the
//! core: accumulation of the accepted (t, x) sequence, CSV export and the
//! run statistics table.

use crate::numerical::DAE::DAE_solver::{BDFIntegrator, SolverStats};
use crate::numerical::DAE::callbacks::{Jacobian, MassMatrix, Observer, RHS};
use crate::numerical::DAE::common::SolverError;
use crate::numerical::DAE::jacobian::{JacobianProvider, NumericalJacobian};
use crate::numerical::DAE::solver_options::SolverOptions;
use log::error;
use nalgebra::DVector;
use tabled::{builder::Builder, settings::Style};

/// DAE solver facade: construct with the problem callbacks, then run
/// `integrate(x, t1)` in place on the initial state.
pub struct DAESolver {
    core: BDFIntegrator,
    observer: Option<Box<dyn Observer>>,
    keep_results: bool,
    verbosity: usize,
    t_result: Vec<f64>,
    y_result: Vec<DVector<f64>>,
}

impl DAESolver {
    /// Builds the solver. When no analytical Jacobian is supplied, a
    /// numerical finite-difference estimator over the RHS is used instead
    /// (perturbation `jacobian_fd_tol`, recording threshold `atol`).
    pub fn new(
        rhs: Box<dyn RHS>,
        jac: Option<Box<dyn Jacobian>>,
        mass: Box<dyn MassMatrix>,
        opt: SolverOptions,
    ) -> Self {
        let provider = match jac {
            Some(user_jac) => JacobianProvider::Analytic(user_jac),
            None => JacobianProvider::Numerical(NumericalJacobian::new(
                opt.jacobian_fd_tol,
                opt.atol,
            )),
        };
        let verbosity = opt.verbosity;
        DAESolver {
            core: BDFIntegrator::new(rhs, provider, mass, opt),
            observer: None,
            keep_results: false,
            verbosity,
            t_result: Vec::new(),
            y_result: Vec::new(),
        }
    }

    /// Registers the observer called once per accepted step.
    pub fn set_observer(&mut self, observer: Box<dyn Observer>) {
        self.observer = Some(observer);
    }

    /// Enables accumulation of the accepted (t, x) sequence for
    /// `get_result`/`save_result`.
    pub fn keep_results(&mut self, keep: bool) {
        self.keep_results = keep;
    }

    /// Integrates the system on [t0, t1] in place on `x`. On failure `x`
    /// holds the last accepted state.
    pub fn integrate(&mut self, x: &mut DVector<f64>, t1: f64) -> Result<(), SolverError> {
        self.t_result.clear();
        self.y_result.clear();
        let keep = self.keep_results;
        let t_result = &mut self.t_result;
        let y_result = &mut self.y_result;
        let user_observer = &mut self.observer;
        let mut recorder = |x: &DVector<f64>, t: f64| {
            if keep {
                t_result.push(t);
                y_result.push(x.clone());
            }
            if let Some(obs) = user_observer.as_deref_mut() {
                obs.call(x, t);
            }
        };
        let result = self.core.integrate(x, t1, Some(&mut recorder));
        if self.verbosity >= 1 {
            self.print_stats();
        }
        result
    }

    /// Same as `integrate` but with the classic integer status surface:
    /// 0 on clean termination, the error-kind code otherwise.
    pub fn integrate_status(&mut self, x: &mut DVector<f64>, t1: f64) -> i32 {
        match self.integrate(x, t1) {
            Ok(()) => 0,
            Err(e) => {
                error!("{}", e);
                e.code()
            }
        }
    }

    pub fn stats(&self) -> &SolverStats {
        &self.core.stats
    }

    /// Accumulated accepted steps, available after a run with
    /// `keep_results(true)`.
    pub fn get_result(&self) -> (&[f64], &[DVector<f64>]) {
        (&self.t_result, &self.y_result)
    }

    /// Saves the accumulated result as CSV: one row per accepted step,
    /// columns t, x0, x1, ...
    pub fn save_result(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut wtr = csv::Writer::from_path(path)?;
        let n = self.y_result.first().map(|x| x.len()).unwrap_or(0);
        let mut header = vec!["t".to_string()];
        for k in 0..n {
            header.push(format!("x{}", k));
        }
        wtr.write_record(&header)?;
        for (t, x) in self.t_result.iter().zip(&self.y_result) {
            let mut row = vec![t.to_string()];
            row.extend(x.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn print_stats(&self) {
        let stats = &self.core.stats;
        let rows = vec![
            vec!["accepted steps".to_string(), stats.n_steps.to_string()],
            vec!["rejected attempts".to_string(), stats.n_rejected.to_string()],
            vec![
                "newton iterations".to_string(),
                stats.n_newton_iters.to_string(),
            ],
            vec!["RHS evaluations".to_string(), stats.n_rhs_evals.to_string()],
            vec![
                "jacobian evaluations".to_string(),
                stats.n_jac_evals.to_string(),
            ],
            vec![
                "mass matrix evaluations".to_string(),
                stats.n_mass_evals.to_string(),
            ],
            vec!["symbolic analyses".to_string(), stats.n_symbolic.to_string()],
            vec![
                "numeric factorizations".to_string(),
                stats.n_factor.to_string(),
            ],
            vec!["triangular solves".to_string(), stats.n_solve.to_string()],
            vec!["final order".to_string(), stats.final_order.to_string()],
            vec!["final dt".to_string(), format!("{:.3e}", stats.final_dt)],
        ];
        let mut table = Builder::from(rows).build();
        table.with(Style::modern_rounded());
        println!("{}", table);
    }
}
