//! # Coordinate sparse matrix container
//!
//! Three parallel arrays carry the non-zero values together with their row
//! and column indices:
//!
//! ```text
//! a[k]  - value of the k-th non-zero element
//! i[k]  - row index of the k-th element
//! j[k]  - column index of the k-th element
//! ```
//!
//! The container is filled by the user callbacks (mass matrix, analytical
//! Jacobian) and by the numerical Jacobian estimator, then converted either
//! to compressed-row form or to the column-major form consumed by the sparse
//! LU engine. Invariants after `finalize()`: indices in [0, N), entries
//! sorted row-major with column-ascending ties, each (i, j) pair at most
//! once. `validate()` checks them and fails with the shape error kind.

use crate::numerical::DAE::common::SolverError;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DVector;

/// Sparse matrix in the simplified 3-array coordinate format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseMatrix {
    /// non-zero values
    pub a: Vec<f64>,
    /// row index of each element in `a`
    pub i: Vec<usize>,
    /// column index of each element in `a`
    pub j: Vec<usize>,
}

/// Compressed-row image of a coordinate matrix: `ia` holds N+1 row pointers,
/// `ja` and `a` the flat column indices and values.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub ia: Vec<usize>,
    pub ja: Vec<usize>,
    pub a: Vec<f64>,
}

impl SparseMatrix {
    pub fn new() -> Self {
        SparseMatrix {
            a: Vec::new(),
            i: Vec::new(),
            j: Vec::new(),
        }
    }

    pub fn with_capacity(nnz: usize) -> Self {
        let mut m = SparseMatrix::new();
        m.reserve(nnz);
        m
    }

    pub fn reserve(&mut self, nnz: usize) {
        self.a.reserve(nnz);
        self.i.reserve(nnz);
        self.j.reserve(nnz);
    }

    /// Inserts one element. Argument order follows the container layout:
    /// value first, then its row and column indices.
    pub fn add_element(&mut self, value: f64, row: usize, col: usize) {
        self.a.push(value);
        self.i.push(row);
        self.j.push(col);
    }

    pub fn n_elements(&self) -> usize {
        self.a.len()
    }

    /// Drops all elements but keeps the allocated capacity, so a matrix
    /// refilled every step does not reallocate.
    pub fn clear(&mut self) {
        self.a.clear();
        self.i.clear();
        self.j.clear();
    }

    /// Sorts the elements row-major with column-ascending ties. Stable with
    /// respect to duplicate (i, j) pairs.
    pub fn finalize(&mut self) {
        let nnz = self.a.len();
        let mut perm: Vec<usize> = (0..nnz).collect();
        perm.sort_by_key(|&k| (self.i[k], self.j[k]));
        let a: Vec<f64> = perm.iter().map(|&k| self.a[k]).collect();
        let i: Vec<usize> = perm.iter().map(|&k| self.i[k]).collect();
        let j: Vec<usize> = perm.iter().map(|&k| self.j[k]).collect();
        self.a = a;
        self.i = i;
        self.j = j;
    }

    /// Checks the container invariants for an N x N matrix: consistent array
    /// lengths, indices inside [0, N), no duplicate (i, j) pairs.
    pub fn validate(&self, n: usize) -> Result<(), SolverError> {
        if self.a.len() != self.i.len() || self.a.len() != self.j.len() {
            return Err(SolverError::Shape(format!(
                "inconsistent array lengths: a = {}, i = {}, j = {}",
                self.a.len(),
                self.i.len(),
                self.j.len()
            )));
        }
        for k in 0..self.a.len() {
            if self.i[k] >= n || self.j[k] >= n {
                return Err(SolverError::Shape(format!(
                    "element {} has index ({}, {}) outside of [0, {})",
                    k, self.i[k], self.j[k], n
                )));
            }
        }
        let mut pairs: Vec<(usize, usize)> =
            self.i.iter().cloned().zip(self.j.iter().cloned()).collect();
        pairs.sort();
        for w in pairs.windows(2) {
            if w[0] == w[1] {
                return Err(SolverError::Shape(format!(
                    "duplicate element at ({}, {})",
                    w[0].0, w[0].1
                )));
            }
        }
        Ok(())
    }

    pub fn values_finite(&self) -> bool {
        self.a.iter().all(|&x| x.is_finite())
    }

    /// Sorted, deduplicated list of the (i, j) pairs. Used by the linear
    /// solver adapter as the sparsity pattern fingerprint.
    pub fn pattern(&self) -> Vec<(usize, usize)> {
        let mut pairs: Vec<(usize, usize)> =
            self.i.iter().cloned().zip(self.j.iter().cloned()).collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Converts to compressed-row form for an N x N matrix. Rows come out
    /// ascending with columns ascending inside each row; duplicate (i, j)
    /// entries, if any survived, are summed here (and flagged by
    /// `validate()`, which the integrator runs on every user-filled matrix).
    pub fn to_csr(&self, n: usize) -> Result<CsrMatrix, SolverError> {
        if self.a.len() != self.i.len() || self.a.len() != self.j.len() {
            return Err(SolverError::Shape(
                "inconsistent array lengths in CSR conversion".to_string(),
            ));
        }
        let nnz = self.a.len();
        let mut perm: Vec<usize> = (0..nnz).collect();
        perm.sort_by_key(|&k| (self.i[k], self.j[k]));

        let mut ja: Vec<usize> = Vec::with_capacity(nnz);
        let mut a: Vec<f64> = Vec::with_capacity(nnz);
        let mut counts = vec![0usize; n];
        let mut last: Option<(usize, usize)> = None;
        for &k in &perm {
            let (row, col) = (self.i[k], self.j[k]);
            if row >= n || col >= n {
                return Err(SolverError::Shape(format!(
                    "index ({}, {}) outside of [0, {})",
                    row, col, n
                )));
            }
            if last == Some((row, col)) {
                // sorted order makes duplicates adjacent: sum them
                let top = a.len() - 1;
                a[top] += self.a[k];
                continue;
            }
            ja.push(col);
            a.push(self.a[k]);
            counts[row] += 1;
            last = Some((row, col));
        }
        let mut ia = Vec::with_capacity(n + 1);
        ia.push(0);
        let mut acc = 0;
        for row in 0..n {
            acc += counts[row];
            ia.push(acc);
        }
        Ok(CsrMatrix { ia, ja, a })
    }

    /// Builds the column-major sparse matrix the LU engine consumes.
    /// Duplicate (i, j) entries are summed by the triplet constructor, which
    /// is what the iteration matrix assembly `alpha0*M - h*J` relies on for
    /// overlapping mass/Jacobian patterns.
    pub fn to_faer(
        &self,
        nrows: usize,
        ncols: usize,
    ) -> Result<SparseColMat<usize, f64>, SolverError> {
        let triplets: Vec<Triplet<usize, usize, f64>> = (0..self.a.len())
            .map(|k| Triplet::new(self.i[k], self.j[k], self.a[k]))
            .collect();
        SparseColMat::<usize, f64>::try_new_from_triplets(nrows, ncols, &triplets).map_err(|e| {
            SolverError::Shape(format!("sparse matrix construction failed: {:?}", e))
        })
    }

    /// y = M * v over the raw triplets. Works on unsorted data, duplicates
    /// accumulate, which matches the summation semantics of the conversions.
    pub fn mul_vec(&self, v: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(v.len());
        for k in 0..self.a.len() {
            y[self.i[k]] += self.a[k] * v[self.j[k]];
        }
        y
    }
}
