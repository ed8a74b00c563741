#![allow(non_snake_case)]
use RustedDAE::Utils::logger::{init_console_logging, level_from_verbosity};
use RustedDAE::numerical::DAE::DAE_api::DAESolver;
use RustedDAE::numerical::DAE::callbacks::MassMatrixIdentity;
use RustedDAE::numerical::DAE::solver_options::SolverOptions;
use RustedDAE::numerical::DAE::sparse_matrix::SparseMatrix;
use nalgebra::DVector;

fn main() {
    let example = 0;
    match example {
        0 => {
            // SIMPLE DAE WITH A SINGULAR MASS MATRIX
            //
            // x' = y
            // 0  = x*x + y*y - 1
            //
            // x(0) = 0, y(0) = 1; the solution is x = sin(t), y = cos(t)
            // up to t = pi/2, and x = 1, y = 0 afterwards.
            let rhs = |f: &mut DVector<f64>, x: &DVector<f64>, _t: f64| {
                f[0] = x[1];
                f[1] = x[0] * x[0] + x[1] * x[1] - 1.0;
            };
            // M = |1 0|
            //     |0 0|
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
            opt.verbosity = 1;
            init_console_logging(level_from_verbosity(opt.verbosity));

            let mut solver =
                DAESolver::new(Box::new(rhs), Some(Box::new(jac)), Box::new(mass), opt);
            let observer = |x: &DVector<f64>, t: f64| {
                let circle_err = (x[0] * x[0] + x[1] * x[1] - 1.0).abs();
                println!(
                    "t = {:>12.6}  x = {:>12.6}  y = {:>12.6}  |x^2+y^2-1| = {:.2e}",
                    t, x[0], x[1], circle_err
                );
            };
            solver.set_observer(Box::new(observer));

            let mut x = DVector::from_vec(vec![0.0, 1.0]);
            let status = solver.integrate_status(&mut x, std::f64::consts::PI);
            println!("status = {}, x(pi) = ({:.8}, {:.8})", status, x[0], x[1]);
        }
        1 => {
            // ROBERTSON STIFF KINETICS up to t = 1e11
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
            opt.verbosity = 1;
            init_console_logging(level_from_verbosity(opt.verbosity));

            let mut solver = DAESolver::new(
                Box::new(rhs),
                Some(Box::new(jac)),
                Box::new(MassMatrixIdentity::new(3)),
                opt,
            );
            let mut last_decade = f64::NEG_INFINITY;
            let observer = move |x: &DVector<f64>, t: f64| {
                if t > 0.0 && t.log10() >= last_decade + 1.0 {
                    last_decade = t.log10().floor();
                    println!(
                        "t = {:>10.3e}  x = ({:.6e}, {:.6e}, {:.6e})  sum = {:.12}",
                        t,
                        x[0],
                        x[1],
                        x[2],
                        x[0] + x[1] + x[2]
                    );
                }
            };
            solver.set_observer(Box::new(observer));

            let mut x = DVector::from_vec(vec![1.0, 0.0, 0.0]);
            let status = solver.integrate_status(&mut x, 1.0e11);
            println!(
                "status = {}, x(1e11) = ({:.6e}, {:.6e}, {:.6e})",
                status, x[0], x[1], x[2]
            );
        }
        _ => {
            println!("unknown example {}", example);
        }
    }
}
