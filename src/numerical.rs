#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// SOLVER OF STIFF DAE SYSTEMS M(t)*dx/dt = f(x,t)
/// variable-step, variable-order BDF with Newton iteration and sparse LU
/// API for this is RustedDAE::numerical::DAE::DAE_api::DAESolver;
/// Example#1
/// ```
/// use RustedDAE::numerical::DAE::DAE_api::DAESolver;
/// use RustedDAE::numerical::DAE::callbacks::MassMatrixIdentity;
/// use RustedDAE::numerical::DAE::solver_options::SolverOptions;
/// use nalgebra::DVector;
/// // exponential decay x' = -x, solved with the numerical Jacobian
/// let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
///     f[0] = -x[0];
/// };
/// let mut opt = SolverOptions::default();
/// opt.dt_init = 1e-3;
/// opt.rtol = 1e-6;
/// opt.atol = 1e-8;
/// let mut solver = DAESolver::new(
///     Box::new(rhs),
///     None,
///     Box::new(MassMatrixIdentity::new(1)),
///     opt,
/// );
/// let mut x = DVector::from_vec(vec![1.0]);
/// solver.integrate(&mut x, 1.0).unwrap();
/// assert!((x[0] - (-1.0f64).exp()).abs() < 1e-4);
/// ```
pub mod DAE;
