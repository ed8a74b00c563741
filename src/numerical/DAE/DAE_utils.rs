//! History buffer and the divided-difference machinery of the variable-step
//! BDF method.
//!
//! The BDF relation of order p on a non-uniform stencil reads
//!
//! ```text
//! sum_{k=0..p} alpha_k(h-history) * x_{n+1-k} = h * dx/dt(t_{n+1})
//! ```
//!
//! where the alpha_k are h times the derivative weights of the polynomial
//! interpolating the stencil {t_{n+1}, t_n, ..., t_{n+1-p}}, evaluated at
//! t_{n+1}. The weights are recomputed from the actual timestamps whenever
//! h or p changes, so the formula stays consistent on graded step sequences.

use nalgebra::DVector;

/// Hard cap of the BDF order family.
pub const MAX_ORDER: usize = 6;

/// Ring of past accepted states and their timestamps, newest last.
/// Owned exclusively by the integrator; seeded with x(t0), one entry added
/// per accepted step, the oldest dropped once the ring is full.
#[derive(Debug, Clone)]
pub struct SolutionHistory {
    times: Vec<f64>,
    states: Vec<DVector<f64>>,
    capacity: usize,
}

impl SolutionHistory {
    pub fn new(capacity: usize) -> Self {
        SolutionHistory {
            times: Vec::with_capacity(capacity),
            states: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn reset(&mut self, t0: f64, x0: &DVector<f64>) {
        self.times.clear();
        self.states.clear();
        self.times.push(t0);
        self.states.push(x0.clone());
    }

    pub fn push(&mut self, t: f64, x: DVector<f64>) {
        if self.times.len() == self.capacity {
            self.times.remove(0);
            self.states.remove(0);
        }
        self.times.push(t);
        self.states.push(x);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// k-th point counted from the newest one (k = 0 is the latest accepted).
    pub fn time(&self, k: usize) -> f64 {
        self.times[self.times.len() - 1 - k]
    }

    pub fn state(&self, k: usize) -> &DVector<f64> {
        &self.states[self.states.len() - 1 - k]
    }

    pub fn last_time(&self) -> f64 {
        self.time(0)
    }

    pub fn last_state(&self) -> &DVector<f64> {
        self.state(0)
    }

    /// The m newest points, newest first.
    pub fn window(&self, m: usize) -> (Vec<f64>, Vec<&DVector<f64>>) {
        let mut times = Vec::with_capacity(m);
        let mut states = Vec::with_capacity(m);
        for k in 0..m {
            times.push(self.time(k));
            states.push(self.state(k));
        }
        (times, states)
    }
}

/// Derivative weights c_k of the interpolating polynomial through
/// {t_new, past[0], ..., past[p-1]} evaluated at t_new:
///
/// ```text
/// x'(t_new) ~ c[0]*x_new + sum_{k=1..p} c[k]*x(past[k-1])
/// ```
///
/// `past` is newest first. Multiplying by h gives the BDF alpha_k.
/// On a uniform stencil this reproduces the classical BDF tables.
pub fn bdf_derivative_weights(t_new: f64, past: &[f64]) -> Vec<f64> {
    let p = past.len();
    let mut c = vec![0.0; p + 1];
    let mut c0 = 0.0;
    for &tau in past {
        c0 += 1.0 / (t_new - tau);
    }
    c[0] = c0;
    for k in 0..p {
        let tk = past[k];
        let mut num = 1.0;
        let mut den = tk - t_new;
        for (jj, &tau) in past.iter().enumerate() {
            if jj == k {
                continue;
            }
            num *= t_new - tau;
            den *= tk - tau;
        }
        c[k + 1] = num / den;
    }
    c
}

/// Lagrange evaluation of the polynomial through (`times[k]`, `states[k]`)
/// at `t`. Used both for the predictor (extrapolation through the last p
/// accepted points) and for the divided-difference error estimate.
pub fn lagrange_extrapolate(t: f64, times: &[f64], states: &[&DVector<f64>]) -> DVector<f64> {
    let m = times.len();
    let n = states[0].len();
    let mut out: DVector<f64> = DVector::zeros(n);
    for k in 0..m {
        let mut lk = 1.0;
        for jj in 0..m {
            if jj != k {
                lk *= (t - times[jj]) / (times[k] - times[jj]);
            }
        }
        out += lk * states[k];
    }
    out
}

/// Error constant of the BDF method of order p: the local truncation error
/// estimate is C_p times the order-(p+1) divided difference remainder.
pub fn bdf_error_const(p: usize) -> f64 {
    1.0 / (p as f64 + 1.0)
}
