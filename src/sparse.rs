//! Sparse containers for the Jacobian evaluators and the solver ABI.
//!
//! Internally everything is CSC; the solver boundary speaks column-major
//! COO with 1-indexed column start positions and per-column lengths, so the
//! conversion here is a straight copy that preserves CSC iteration order.

use std::collections::HashSet;

use crate::backend::Evaluator;
use crate::expr::{self, Sym};

/// Compressed sparse column matrix with `f64` values.
///
/// `colptr` has length `n + 1` and is 0-based; the non-zeros of column `j`
/// live in `rowval[colptr[j]..colptr[j + 1]]` / `nzval[..]`.
#[derive(Debug, Clone)]
pub struct CscMatrix {
    pub m: usize,
    pub n: usize,
    pub colptr: Vec<usize>,
    pub rowval: Vec<usize>,
    pub nzval: Vec<f64>,
}

impl CscMatrix {
    /// Build the symbolic structure from `(row, col)` pairs in CSC order
    /// (column-major, rows ascending within a column). Values start at zero.
    pub fn from_pattern(m: usize, n: usize, pattern: &[(usize, usize)]) -> Self {
        let mut colptr = vec![0usize; n + 1];
        for &(_, col) in pattern {
            colptr[col + 1] += 1;
        }
        for j in 0..n {
            colptr[j + 1] += colptr[j];
        }
        let rowval = pattern.iter().map(|&(row, _)| row).collect();
        CscMatrix {
            m,
            n,
            colptr,
            rowval,
            nzval: vec![0.0; pattern.len()],
        }
    }

    /// An `m × n` matrix with no structural non-zeros.
    pub fn zeros(m: usize, n: usize) -> Self {
        CscMatrix {
            m,
            n,
            colptr: vec![0; n + 1],
            rowval: Vec::new(),
            nzval: Vec::new(),
        }
    }

    pub fn nnz(&self) -> usize {
        self.rowval.len()
    }

    /// Value at `(i, j)`, zero if the position is not structural.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        for k in self.colptr[j]..self.colptr[j + 1] {
            if self.rowval[k] == i {
                return self.nzval[k];
            }
        }
        0.0
    }

    /// Sparse matrix-vector product `out = self · x`.
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        debug_assert_eq!(x.len(), self.n);
        debug_assert_eq!(out.len(), self.m);
        out.fill(0.0);
        for j in 0..self.n {
            let xj = x[j];
            for k in self.colptr[j]..self.colptr[j + 1] {
                out[self.rowval[k]] += self.nzval[k] * xj;
            }
        }
    }

    /// COO triplets `(row, col, value)` in CSC order.
    pub fn triplets(&self) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::with_capacity(self.nnz());
        for j in 0..self.n {
            for k in self.colptr[j]..self.colptr[j + 1] {
                out.push((self.rowval[k], j, self.nzval[k]));
            }
        }
        out
    }
}

/// Fill the solver's COO arrays from a CSC matrix, trusting that `data` is
/// laid out contiguously in CSC order.
///
/// `col[j]` receives the 1-indexed start position of column `j`, `len[j]`
/// the per-column count, `row[k]` the 1-indexed row index, `data[k]` the
/// value.
pub fn csc_to_coo_contiguous(
    mat: &CscMatrix,
    col: &mut [i32],
    len: &mut [i32],
    row: &mut [i32],
    data: &mut [f64],
) {
    debug_assert_eq!(col.len(), mat.n);
    debug_assert_eq!(len.len(), mat.n);
    debug_assert_eq!(row.len(), mat.nnz());
    debug_assert_eq!(data.len(), mat.nnz());
    for j in 0..mat.n {
        col[j] = (mat.colptr[j] + 1) as i32;
        len[j] = (mat.colptr[j + 1] - mat.colptr[j]) as i32;
    }
    for (k, &r) in mat.rowval.iter().enumerate() {
        row[k] = (r + 1) as i32;
    }
    data.copy_from_slice(&mat.nzval);
}

/// Fill the solver's COO arrays entry by entry, recomputing each position
/// from the column pointers instead of assuming contiguity of `data`.
pub fn csc_to_coo_scattered(
    mat: &CscMatrix,
    col: &mut [i32],
    len: &mut [i32],
    row: &mut [i32],
    data: &mut [f64],
) {
    for j in 0..mat.n {
        col[j] = (mat.colptr[j] + 1) as i32;
        len[j] = (mat.colptr[j + 1] - mat.colptr[j]) as i32;
        let start = (col[j] - 1) as usize;
        for (offset, k) in (mat.colptr[j]..mat.colptr[j + 1]).enumerate() {
            row[start + offset] = (mat.rowval[k] + 1) as i32;
            data[start + offset] = mat.nzval[k];
        }
    }
}

/// An in-place sparse matrix-valued function: fixed pattern, preallocated
/// CSC scratch, and the non-zero positions that are structurally constant
/// in the differentiation variable.
#[derive(Debug)]
pub struct SparseFunction {
    evaluator: Evaluator,
    /// 0-based row indices in nnz (CSC) order.
    pub rows: Vec<usize>,
    /// 0-based column indices in nnz (CSC) order.
    pub cols: Vec<usize>,
    /// Scratch matrix; `evaluate` overwrites its `nzval`.
    pub scratch: CscMatrix,
    /// 0-based nnz-order indices of entries whose expression does not
    /// reference the differentiation variable.
    pub constant_entries: Vec<usize>,
}

impl SparseFunction {
    pub(crate) fn new(
        evaluator: Evaluator,
        pattern: Vec<(usize, usize)>,
        nrows: usize,
        ncols: usize,
        constant_entries: Vec<usize>,
    ) -> Self {
        debug_assert_eq!(evaluator.num_outputs(), pattern.len());
        debug_assert!(constant_entries.len() <= pattern.len());
        debug_assert!(constant_entries.iter().all(|&k| k < pattern.len()));
        let scratch = CscMatrix::from_pattern(nrows, ncols, &pattern);
        let (rows, cols) = pattern.into_iter().unzip();
        SparseFunction {
            evaluator,
            rows,
            cols,
            scratch,
            constant_entries,
        }
    }

    /// Evaluate the matrix at `(z, θ)` into the scratch.
    pub fn evaluate(&mut self, z: &[f64], theta: &[f64]) {
        self.evaluator.call(&mut self.scratch.nzval, z, theta);
    }

    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    pub fn nrows(&self) -> usize {
        self.scratch.m
    }

    pub fn ncols(&self) -> usize {
        self.scratch.n
    }
}

/// Indices (nnz order) of Jacobian entries whose symbolic expression
/// references none of the variables in `vars`.
///
/// These feed the solver's linear-elements presolve hint: an entry constant
/// in the differentiation variable stays numerically fixed for the whole
/// solve, whatever `θ` pinned it to.
pub fn constant_entries(triplets: &[(usize, usize, Sym)], vars: &[Sym]) -> Vec<usize> {
    let var_indices: HashSet<u32> = vars
        .iter()
        .filter_map(|v| match &*v.0 {
            expr::Node::Var(i) => Some(*i),
            _ => None,
        })
        .collect();
    triplets
        .iter()
        .enumerate()
        .filter(|(_, (_, _, e))| !expr::depends_on_any(e, &var_indices))
        .map(|(k, _)| k)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SymbolicContext;

    fn sample_csc() -> CscMatrix {
        // [1 0 4]
        // [2 3 0]
        let mut mat = CscMatrix::from_pattern(2, 3, &[(0, 0), (1, 0), (1, 1), (0, 2)]);
        mat.nzval.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        mat
    }

    #[test]
    fn coo_conversion_is_one_indexed_csc_order() {
        let mat = sample_csc();
        let mut col = [0i32; 3];
        let mut len = [0i32; 3];
        let mut row = [0i32; 4];
        let mut data = [0.0f64; 4];
        csc_to_coo_contiguous(&mat, &mut col, &mut len, &mut row, &mut data);
        assert_eq!(col, [1, 3, 4]);
        assert_eq!(len, [2, 1, 1]);
        assert_eq!(row, [1, 2, 2, 1]);
        assert_eq!(data, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn scattered_conversion_matches_contiguous() {
        let mat = sample_csc();
        let mut col_a = [0i32; 3];
        let mut len_a = [0i32; 3];
        let mut row_a = [0i32; 4];
        let mut data_a = [0.0f64; 4];
        csc_to_coo_contiguous(&mat, &mut col_a, &mut len_a, &mut row_a, &mut data_a);

        let mut col_b = [0i32; 3];
        let mut len_b = [0i32; 3];
        let mut row_b = [0i32; 4];
        let mut data_b = [0.0f64; 4];
        csc_to_coo_scattered(&mat, &mut col_b, &mut len_b, &mut row_b, &mut data_b);

        assert_eq!(col_a, col_b);
        assert_eq!(len_a, len_b);
        assert_eq!(row_a, row_b);
        assert_eq!(data_a, data_b);
    }

    #[test]
    fn matvec() {
        let mat = sample_csc();
        let mut out = [0.0; 2];
        mat.mul_vec(&[1.0, 1.0, 1.0], &mut out);
        assert_eq!(out, [5.0, 5.0]);
    }

    #[test]
    fn constant_entry_classification() {
        let mut ctx = SymbolicContext::new();
        let z = ctx.make_variables(2);
        let theta = ctx.make_variables(1);
        // F = [z0² + θ0·z1, 3·z0 + z1]
        let exprs = vec![z[0].powi(2) + &theta[0] * &z[1], 3.0 * &z[0] + &z[1]];
        let triplets = crate::backend::sparse_jacobian(&exprs, &z);
        // CSC order: (0,0)=2z0, (1,0)=3, (0,1)=θ0, (1,1)=1
        let constants = constant_entries(&triplets, &z);
        assert_eq!(constants, vec![1, 2, 3]);

        // The same entries w.r.t. θ: θ0 is *not* constant, the rest are.
        let constants_theta = constant_entries(&triplets, &theta);
        assert_eq!(constants_theta, vec![0, 1, 3]);
    }

    #[test]
    fn empty_matrix_has_consistent_shape() {
        let mat = CscMatrix::zeros(4, 0);
        assert_eq!(mat.nnz(), 0);
        assert_eq!(mat.colptr, vec![0]);
    }
}
