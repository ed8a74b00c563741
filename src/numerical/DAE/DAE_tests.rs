#[cfg(test)]
mod tests {
    use crate::numerical::DAE::DAE_api::DAESolver;
    use crate::numerical::DAE::callbacks::{MassMatrixIdentity, MassMatrixZero, MassMatrix};
    use crate::numerical::DAE::common::SolverError;
    use crate::numerical::DAE::solver_options::{SolverOptions, TimeStepping};
    use crate::numerical::DAE::sparse_matrix::SparseMatrix;
    use nalgebra::DVector;
    use std::cell::RefCell;
    use std::f64::consts::PI;
    use std::rc::Rc;

    /// Unit circle DAE:
    ///
    ///   x' = y
    ///   0  = x^2 + y^2 - 1,    x(0) = 0, y(0) = 1
    ///
    /// The solution is x = sin(t), y = cos(t) up to the fold at t = pi/2
    /// where the constraint Jacobian degenerates in y; past the fold the
    /// integrator sticks to the x = 1, y = 0 branch.
    #[test]
    fn test_s1_unit_circle_dae() {
        let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
            f[0] = x[1];
            f[1] = x[0] * x[0] + x[1] * x[1] - 1.0;
        };
        let mass = |m: &mut SparseMatrix, _t: f64| {
            m.add_element(1.0, 0, 0);
            m.add_element(0.0, 1, 1);
        };
        let jac = |j: &mut SparseMatrix, x: &DVector<f64>, _t: f64| {
            j.add_element(1.0, 0, 1);
            j.add_element(2.0 * x[0], 1, 0);
            j.add_element(2.0 * x[1], 1, 1);
        };

        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-4;
        opt.rtol = 1e-6;
        opt.atol = 1e-8;

        let mut solver = DAESolver::new(Box::new(rhs), Some(Box::new(jac)), Box::new(mass), opt);
        let observed: Rc<RefCell<Vec<(f64, f64, f64)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = observed.clone();
        solver.set_observer(Box::new(move |x: &DVector<f64>, t: f64| {
            sink.borrow_mut().push((t, x[0], x[1]));
        }));

        let mut x = DVector::from_vec(vec![0.0, 1.0]);
        solver.integrate(&mut x, PI).unwrap();

        let observed = observed.borrow();
        assert!(!observed.is_empty());
        for &(t, xv, yv) in observed.iter() {
            let circle_err = (xv * xv + yv * yv - 1.0).abs();
            assert!(
                circle_err <= 1e-6,
                "constraint violated at t = {}: {}",
                t,
                circle_err
            );
            // skip a small window around the fold where the branches meet
            if t <= PI / 2.0 - 0.05 {
                assert!(
                    (xv - t.sin()).abs() <= 1e-6,
                    "x(t) off sin(t) at t = {}: {}",
                    t,
                    (xv - t.sin()).abs()
                );
            } else if t >= PI / 2.0 + 0.05 {
                assert!((xv - 1.0).abs() <= 1e-6, "x(t) off 1 at t = {}: {}", t, xv);
            }
        }
        assert_eq!(observed.last().unwrap().0, PI);
    }

    /// Robertson stiff kinetics to t = 1e11. Species mass balance
    /// x0 + x1 + x2 = 1 is an invariant of the RHS and must survive the
    /// whole run; no step underflow allowed.
    #[test]
    fn test_s2_robertson_kinetics() {
        let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
            f[0] = -0.04 * x[0] + 1.0e4 * x[1] * x[2];
            f[1] = 0.04 * x[0] - 1.0e4 * x[1] * x[2] - 3.0e7 * x[1] * x[1];
            f[2] = 3.0e7 * x[1] * x[1];
        };
        let jac = |j: &mut SparseMatrix, x: &DVector<f64>, _t: f64| {
            j.add_element(-0.04, 0, 0);
            j.add_element(1.0e4 * x[2], 0, 1);
            j.add_element(1.0e4 * x[1], 0, 2);
            j.add_element(0.04, 1, 0);
            j.add_element(-1.0e4 * x[2] - 6.0e7 * x[1], 1, 1);
            j.add_element(-1.0e4 * x[1], 1, 2);
            j.add_element(6.0e7 * x[1], 2, 1);
        };

        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-6;
        opt.rtol = 1e-4;
        opt.atol = 1e-12;
        opt.newton_tol = Some(1e-6);

        let mut solver = DAESolver::new(
            Box::new(rhs),
            Some(Box::new(jac)),
            Box::new(MassMatrixIdentity::new(3)),
            opt,
        );
        let worst_balance: Rc<RefCell<f64>> = Rc::new(RefCell::new(0.0));
        let sink = worst_balance.clone();
        solver.set_observer(Box::new(move |x: &DVector<f64>, _t: f64| {
            let drift = (x[0] + x[1] + x[2] - 1.0).abs();
            let mut worst = sink.borrow_mut();
            if drift > *worst {
                *worst = drift;
            }
        }));

        let mut x = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        solver.integrate(&mut x, 1.0e11).unwrap();

        assert!(*worst_balance.borrow() <= 1e-8);
        // nearly everything has converted to the third species by t = 1e11
        assert!(x[2] > 0.999, "x2 = {}", x[2]);
        assert!(x[0] < 1e-4 && x[0] >= 0.0, "x0 = {}", x[0]);
        assert!(x[1].abs() < 1e-6, "x1 = {}", x[1]);
    }

    /// 2-D diffusion on a 10x10 finite-volume grid with zero-flux boundaries
    /// and a point source initial condition. By t = 10 the field has relaxed
    /// to the uniform state C = 1 (the slowest mode decays like
    /// exp(-D*pi^2*t)); nine probe points are compared against it. The run
    /// uses the numerical Jacobian and the factorize-once-per-step fast path.
    #[test]
    fn test_s3_diffusion_2d() {
        const N: usize = 10;
        const D: f64 = 1.0;
        let cell = 1.0 / N as f64;
        let coeff = D / (cell * cell);

        let rhs = move |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
            for row in 0..N {
                for col in 0..N {
                    let k = row * N + col;
                    let mut acc = 0.0;
                    let mut neighbors = 0.0;
                    if row > 0 {
                        acc += x[k - N];
                        neighbors += 1.0;
                    }
                    if row + 1 < N {
                        acc += x[k + N];
                        neighbors += 1.0;
                    }
                    if col > 0 {
                        acc += x[k - 1];
                        neighbors += 1.0;
                    }
                    if col + 1 < N {
                        acc += x[k + 1];
                        neighbors += 1.0;
                    }
                    f[k] = coeff * (acc - neighbors * x[k]);
                }
            }
        };

        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-3;
        opt.rtol = 1e-5;
        opt.atol = 1e-8;
        opt.fact_every_iter = false;

        let mut solver = DAESolver::new(
            Box::new(rhs),
            None,
            Box::new(MassMatrixIdentity::new(N * N)),
            opt,
        );

        let mut x = DVector::zeros(N * N);
        x[5 * N + 5] = (N * N) as f64; // delta function, total mass 1
        let total0: f64 = x.iter().sum::<f64>() * cell * cell;
        solver.integrate(&mut x, 10.0).unwrap();

        // uniform reference C = 1 everywhere at t = 10
        let probes = [
            0,
            N - 1,
            N * N - N,
            N * N - 1,
            5 * N + 5,
            N / 2,
            (N - 1) * N + N / 2,
            5 * N,
            5 * N + N - 1,
        ];
        for &k in probes.iter() {
            let rel = (x[k] - 1.0).abs();
            assert!(rel < 0.01, "probe {} off the reference: C = {}", k, x[k]);
        }
        // zero-flux boundaries conserve the total mass
        let total: f64 = x.iter().sum::<f64>() * cell * cell;
        assert!((total - total0).abs() < 1e-6);
        // the 5-point pattern never changes, one symbolic analysis suffices
        assert!(solver.stats().n_symbolic <= 2);
    }

    /// Keplerian two-body orbit (pure ODE): circular orbit, 10 periods.
    /// Energy drift must stay within 1e-4 relative at rtol = 1e-8.
    #[test]
    fn test_s4_two_body_orbit() {
        let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
            let r2 = x[0] * x[0] + x[1] * x[1];
            let r3 = r2 * r2.sqrt();
            f[0] = x[2];
            f[1] = x[3];
            f[2] = -x[0] / r3;
            f[3] = -x[1] / r3;
        };
        let jac = |j: &mut SparseMatrix, x: &DVector<f64>, _t: f64| {
            let r2 = x[0] * x[0] + x[1] * x[1];
            let r = r2.sqrt();
            let r3 = r2 * r;
            let r5 = r3 * r2;
            j.add_element(1.0, 0, 2);
            j.add_element(1.0, 1, 3);
            j.add_element(-1.0 / r3 + 3.0 * x[0] * x[0] / r5, 2, 0);
            j.add_element(3.0 * x[0] * x[1] / r5, 2, 1);
            j.add_element(3.0 * x[0] * x[1] / r5, 3, 0);
            j.add_element(-1.0 / r3 + 3.0 * x[1] * x[1] / r5, 3, 1);
        };

        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-4;
        opt.rtol = 1e-8;
        opt.atol = 1e-8;

        let mut solver = DAESolver::new(
            Box::new(rhs),
            Some(Box::new(jac)),
            Box::new(MassMatrixIdentity::new(4)),
            opt,
        );
        let energy = |x: &DVector<f64>| {
            let r = (x[0] * x[0] + x[1] * x[1]).sqrt();
            0.5 * (x[2] * x[2] + x[3] * x[3]) - 1.0 / r
        };
        let e0 = -0.5;
        let worst: Rc<RefCell<f64>> = Rc::new(RefCell::new(0.0));
        let sink = worst.clone();
        solver.set_observer(Box::new(move |x: &DVector<f64>, _t: f64| {
            let r = (x[0] * x[0] + x[1] * x[1]).sqrt();
            let e = 0.5 * (x[2] * x[2] + x[3] * x[3]) - 1.0 / r;
            let drift = ((e - e0) / e0).abs();
            let mut w = sink.borrow_mut();
            if drift > *w {
                *w = drift;
            }
        }));

        let mut x = DVector::from_vec(vec![1.0, 0.0, 0.0, 1.0]);
        solver.integrate(&mut x, 20.0 * PI).unwrap();

        assert!(
            *worst.borrow() <= 1e-4,
            "energy drift {} over 10 periods",
            *worst.borrow()
        );
        assert!((energy(&x) - e0).abs() / 0.5 <= 1e-4);
    }

    /// Identity and zero mass helpers (S5).
    #[test]
    fn test_s5_mass_helpers() {
        let n = 12;
        let mut m = SparseMatrix::new();
        MassMatrixIdentity::new(n).call(&mut m, 3.5);
        assert_eq!(m.n_elements(), n);
        for k in 0..n {
            assert_eq!((m.a[k], m.i[k], m.j[k]), (1.0, k, k));
        }
        assert!(m.validate(n).is_ok());

        let mut z = SparseMatrix::new();
        MassMatrixZero.call(&mut z, 0.0);
        assert_eq!(z.n_elements(), 0);
        assert!(z.validate(n).is_ok());
    }

    /// A contrived RHS whose Jacobian is singular at t = 0 but regular for
    /// t > 0: J = diag(64, t), det J = 64*t. The start must not fail
    /// fatally. With dt_init = 1/64 the first BDF-1 trial assembles
    /// A = diag(1 - h*64, 1 - h*t) whose (0,0) entry is exactly zero, so
    /// the linear solver fails on the first trial; the integrator halves
    /// the step once (A becomes diag(1/2, ...)), the retried trial is
    /// accepted and the integration proceeds to t1.
    #[test]
    fn test_s6_singular_jacobian_at_start() {
        let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, t: f64| {
            f[0] = 64.0 * x[0];
            f[1] = t * x[1];
        };
        let jac = |j: &mut SparseMatrix, _x: &DVector<f64>, t: f64| {
            j.add_element(64.0, 0, 0);
            j.add_element(t, 1, 1);
        };

        let mut opt = SolverOptions::default();
        // power of two, so h*64 = 1 holds exactly on the first trial
        opt.dt_init = 1.0 / 64.0;
        opt.rtol = 1e-4;
        opt.atol = 1e-6;

        let mut solver = DAESolver::new(
            Box::new(rhs),
            Some(Box::new(jac)),
            Box::new(MassMatrixIdentity::new(2)),
            opt,
        );
        let first_step: Rc<RefCell<Option<f64>>> = Rc::new(RefCell::new(None));
        let sink = first_step.clone();
        solver.set_observer(Box::new(move |_x: &DVector<f64>, t: f64| {
            let mut first = sink.borrow_mut();
            if first.is_none() {
                *first = Some(t);
            }
        }));

        // the stiff component starts at zero, so only the singular pivot is
        // special about the first trial, not the accuracy
        let mut x = DVector::from_vec(vec![0.0, 1.0]);
        solver.integrate(&mut x, 1.0).unwrap();
        // the singular first trial was rejected and the step halved once
        assert!(solver.stats().n_rejected >= 1);
        assert!(first_step.borrow().unwrap() < 1.0 / 64.0);
        // x1' = t*x1 gives x1(1) = exp(1/2); x0 stays at zero
        assert!(x[0].abs() < 1e-12, "x0 = {}", x[0]);
        assert!((x[1] - (0.5f64).exp()).abs() < 1e-3, "x1 = {}", x[1]);
    }

    /// Observer times form a strictly increasing sequence ending at exactly
    /// t1, one call per accepted step and none for rejected trials.
    #[test]
    fn test_monotone_observer_times() {
        let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
            f[0] = -x[0];
            f[1] = -10.0 * x[1];
        };
        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-3;
        opt.rtol = 1e-6;
        opt.atol = 1e-9;

        let mut solver = DAESolver::new(
            Box::new(rhs),
            None,
            Box::new(MassMatrixIdentity::new(2)),
            opt,
        );
        let times: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = times.clone();
        solver.set_observer(Box::new(move |_x: &DVector<f64>, t: f64| {
            sink.borrow_mut().push(t);
        }));

        let t1 = 3.0;
        let mut x = DVector::from_vec(vec![1.0, 1.0]);
        solver.integrate(&mut x, t1).unwrap();

        let times = times.borrow();
        assert_eq!(times.len(), solver.stats().n_steps);
        for w in times.windows(2) {
            assert!(w[1] > w[0], "non-monotone observer times");
        }
        assert_eq!(*times.last().unwrap(), t1);
    }

    /// Two runs with identical inputs and options produce bitwise-identical
    /// outputs, numerical Jacobian included (its parallel columns are
    /// assembled in index order).
    #[test]
    fn test_determinism() {
        let run = || {
            let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
                let n = x.len();
                for k in 0..n {
                    let left = if k > 0 { x[k - 1] } else { x[k] };
                    let right = if k + 1 < n { x[k + 1] } else { x[k] };
                    f[k] = 40.0 * (left - 2.0 * x[k] + right) - 0.1 * x[k] * x[k];
                }
            };
            let mut opt = SolverOptions::default();
            opt.dt_init = 1e-3;
            opt.rtol = 1e-6;
            opt.atol = 1e-9;
            let mut solver = DAESolver::new(
                Box::new(rhs),
                None,
                Box::new(MassMatrixIdentity::new(20)),
                opt,
            );
            solver.keep_results(true);
            let mut x = DVector::from_fn(20, |k, _| ((k as f64) * 0.3).sin().abs());
            solver.integrate(&mut x, 1.0).unwrap();
            let (ts, _) = solver.get_result();
            (x, ts.to_vec())
        };
        let (x1, t1) = run();
        let (x2, t2) = run();
        assert_eq!(t1, t2);
        for k in 0..x1.len() {
            assert_eq!(x1[k].to_bits(), x2[k].to_bits(), "component {}", k);
        }
    }

    /// BDF of order p integrates polynomial trajectories of degree <= p
    /// exactly (to round-off): x' = (1, 2t, 3t^2) with identity mass gives
    /// x(t) = (t, t^2, t^3).
    #[test]
    fn test_polynomial_exactness() {
        let rhs = |f: &mut DVector<f64>, _x: &DVector<f64>, t: f64| {
            f[0] = 1.0;
            f[1] = 2.0 * t;
            f[2] = 3.0 * t * t;
        };
        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-10;
        opt.rtol = 1e-10;
        opt.atol = 1e-10;
        opt.bdf_order = 3;

        let mut solver = DAESolver::new(
            Box::new(rhs),
            None,
            Box::new(MassMatrixIdentity::new(3)),
            opt,
        );
        let mut x = DVector::zeros(3);
        solver.integrate(&mut x, 1.0).unwrap();
        assert!((x[0] - 1.0).abs() <= 1e-9, "x0 = {}", x[0]);
        assert!((x[1] - 1.0).abs() <= 1e-9, "x1 = {}", x[1]);
        assert!((x[2] - 1.0).abs() <= 1e-9, "x2 = {}", x[2]);
    }

    /// Halving a fixed step reduces the final-time error by about 2^p.
    /// The step is pinned through dt_max while the startup resolves itself
    /// at a tiny dt_init, so the measured ratio is the asymptotic one.
    #[test]
    fn test_convergence_order() {
        let final_error = |p: usize, h: f64| -> f64 {
            let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
                f[0] = -x[0];
            };
            let mut opt = SolverOptions::default();
            opt.dt_init = 1e-8;
            opt.dt_max = h;
            opt.rtol = 1e-3;
            opt.atol = 1e-3;
            opt.bdf_order = p;
            let mut solver = DAESolver::new(
                Box::new(rhs),
                None,
                Box::new(MassMatrixIdentity::new(1)),
                opt,
            );
            let mut x = DVector::from_vec(vec![1.0]);
            solver.integrate(&mut x, 2.0).unwrap();
            (x[0] - (-2.0f64).exp()).abs()
        };
        for p in 1..=3usize {
            let e1 = final_error(p, 0.05);
            let e2 = final_error(p, 0.025);
            let ratio = e1 / e2;
            assert!(
                ratio >= 0.75 * (2.0f64).powi(p as i32),
                "order {}: error ratio {} (e1 = {:e}, e2 = {:e})",
                p,
                ratio,
                e1,
                e2
            );
        }
    }

    /// A structurally singular iteration matrix earns one step halving and
    /// then surfaces as the singular-matrix status.
    #[test]
    fn test_singular_matrix_is_fatal_after_retry() {
        // 0 = 1 on the second row: the Jacobian row is empty, the mass row
        // is zero, so A has an empty row whatever the step size is
        let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
            f[0] = x[1];
            f[1] = 1.0;
        };
        let jac = |j: &mut SparseMatrix, _x: &DVector<f64>, _t: f64| {
            j.add_element(1.0, 0, 1);
        };
        let mass = |m: &mut SparseMatrix, _t: f64| {
            m.add_element(1.0, 0, 0);
        };
        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-3;
        let mut solver = DAESolver::new(Box::new(rhs), Some(Box::new(jac)), Box::new(mass), opt);
        let mut x = DVector::from_vec(vec![0.0, 0.0]);
        let err = solver.integrate(&mut x, 1.0).unwrap_err();
        assert!(matches!(
            err,
            SolverError::Singular(_) | SolverError::NumericBreakdown(_)
        ));
        assert_ne!(err.code(), 0);
    }

    /// Non-finite RHS output is a user error, and x keeps the last accepted
    /// state.
    #[test]
    fn test_nonfinite_rhs_is_user_error() {
        let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, t: f64| {
            f[0] = if t > 0.5 { f64::NAN } else { -x[0] };
        };
        let mut opt = SolverOptions::default();
        opt.dt_init = 1e-2;
        let mut solver = DAESolver::new(
            Box::new(rhs),
            None,
            Box::new(MassMatrixIdentity::new(1)),
            opt,
        );
        let mut x = DVector::from_vec(vec![1.0]);
        let err = solver.integrate(&mut x, 1.0).unwrap_err();
        assert!(matches!(err, SolverError::UserError(_)));
        assert_eq!(err.code(), 7);
        assert!(x[0].is_finite());
    }

    /// The three step controllers all reach t1 on a mildly stiff problem.
    #[test]
    fn test_all_controllers_terminate() {
        for stepping in [
            TimeStepping::AdaptiveH211b,
            TimeStepping::SimpleStability,
            TimeStepping::Fixed,
        ] {
            let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
                f[0] = -51.0 * x[0];
            };
            let mut opt = SolverOptions::default();
            opt.dt_init = 1e-3;
            opt.time_stepping = stepping;
            opt.rtol = 1e-5;
            opt.atol = 1e-7;
            let mut solver = DAESolver::new(
                Box::new(rhs),
                None,
                Box::new(MassMatrixIdentity::new(1)),
                opt,
            );
            let mut x = DVector::from_vec(vec![1.0]);
            solver.integrate(&mut x, 1.0).unwrap();
            let exact = (-51.0f64).exp();
            assert!(
                (x[0] - exact).abs() < 1e-3,
                "{:?}: x = {}, exact = {}",
                stepping,
                x[0],
                exact
            );
        }
    }
}
