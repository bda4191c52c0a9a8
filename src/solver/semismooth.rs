//! The complementarity engine behind the callback wire contract.
//!
//! Solves `F(z) ⟂ lb ≤ z ≤ ub` by a damped semismooth Newton method on the
//! Fischer–Burmeister reformulation: the box MCP is recast as the nonsmooth
//! root problem `Φ(z) = 0` with merit `ψ = ½‖Φ‖²`, Newton directions from a
//! generalized Jacobian of `Φ`, and Armijo backtracking with a steepest-
//! descent fallback when the Newton system is singular or not a descent
//! direction.
//!
//! The engine sees the problem only through the two callbacks of the wire
//! contract: `F(n, z, out) → status` and
//! `J(n, nnz, z, col, len, row, data) → status` with 1-indexed column start
//! positions, per-column lengths, and non-zeros in CSC order. Newton
//! systems are assembled into a `faer` sparse matrix and factorized with
//! its sparse LU; the factorization panics on structurally singular input,
//! so it runs under `catch_unwind`.

use std::time::{Duration, Instant};

use faer::linalg::solvers::SpSolver;
use faer::sparse::SparseColMat;
use faer::Col;

/// Raw termination codes reported over the wire.
pub const RAW_SOLVED: i32 = 1;
pub const RAW_NO_PROGRESS: i32 = 2;
pub const RAW_ITERATION_LIMIT: i32 = 3;
pub const RAW_TIME_LIMIT: i32 = 4;
pub const RAW_DOMAIN_ERROR: i32 = 5;
pub const RAW_INTERNAL_ERROR: i32 = 6;

/// Parameters for the backtracking Armijo line search on the merit
/// function.
#[derive(Debug, Clone)]
pub struct ArmijoParams {
    /// Sufficient decrease parameter.
    pub c: f64,
    /// Backtracking factor.
    pub rho: f64,
    /// Minimum step size before declaring no progress.
    pub alpha_min: f64,
}

impl Default for ArmijoParams {
    fn default() -> Self {
        ArmijoParams {
            c: 1e-4,
            rho: 0.5,
            alpha_min: 1e-12,
        }
    }
}

/// Engine options threaded through from the driver.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of (major) Newton iterations.
    pub max_iterations: usize,
    /// Stop when `‖Φ‖∞` falls below this.
    pub convergence_tolerance: f64,
    /// Wall-clock budget, checked once per iteration.
    pub time_limit: Option<Duration>,
    pub armijo: ArmijoParams,
    /// Suppress the per-iteration log.
    pub silent: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            max_iterations: 500,
            convergence_tolerance: 1e-10,
            time_limit: None,
            armijo: ArmijoParams::default(),
            silent: true,
        }
    }
}

/// What the engine hands back over the wire.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub status: i32,
    pub z: Vec<f64>,
    /// `‖Φ‖∞` at the final iterate.
    pub residual_norm: f64,
    pub iterations: usize,
    pub jacobian_evaluations: usize,
}

/// Fischer–Burmeister function `φ(p, q) = √(p² + q²) − p − q`.
///
/// `φ(p, q) = 0` iff `p ≥ 0`, `q ≥ 0`, `p·q = 0`.
fn fischer(p: f64, q: f64) -> f64 {
    p.hypot(q) - p - q
}

/// An element of the generalized gradient of `φ`. At the degenerate point
/// `(0, 0)` the limit along the diagonal, `(−1, −1)`, is used.
fn fischer_partials(p: f64, q: f64) -> (f64, f64) {
    let r = p.hypot(q);
    if r > 0.0 {
        (p / r - 1.0, q / r - 1.0)
    } else {
        (-1.0, -1.0)
    }
}

/// Per-row reformulation data: `Φ[i]` plus the coefficients `(d_a, d_b)`
/// such that row `i` of the generalized Jacobian of `Φ` is
/// `d_a·eᵢ + d_b·(row i of ∂F/∂z)`.
fn reformulate(
    z: &[f64],
    fval: &[f64],
    lb: &[f64],
    ub: &[f64],
    phi: &mut [f64],
    d_a: &mut [f64],
    d_b: &mut [f64],
) {
    for i in 0..z.len() {
        let (l, u, zi, fi) = (lb[i], ub[i], z[i], fval[i]);
        if l == f64::NEG_INFINITY && u == f64::INFINITY {
            phi[i] = fi;
            d_a[i] = 0.0;
            d_b[i] = 1.0;
        } else if u == f64::INFINITY {
            let a = zi - l;
            phi[i] = fischer(a, fi);
            let (pa, pb) = fischer_partials(a, fi);
            d_a[i] = pa;
            d_b[i] = pb;
        } else if l == f64::NEG_INFINITY {
            let b = u - zi;
            phi[i] = -fischer(b, -fi);
            let (pa, pb) = fischer_partials(b, -fi);
            d_a[i] = pa;
            d_b[i] = pb;
        } else {
            let a = zi - l;
            let b = u - zi;
            let inner = fischer(b, -fi);
            phi[i] = fischer(a, inner);
            let (oa, ob) = fischer_partials(a, inner);
            let (ia, ib) = fischer_partials(b, -fi);
            d_a[i] = oa - ob * ia;
            d_b[i] = -ob * ib;
        }
    }
}

fn norm_inf(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Assemble the Newton matrix from triplets and solve `T·d = rhs`.
///
/// Returns `None` when assembly or factorization fails or the solution is
/// not finite; faer's sparse LU panics on singular matrices, hence the
/// `catch_unwind` shield.
fn factor_and_solve(n: usize, triplets: &[(usize, usize, f64)], rhs: &[f64]) -> Option<Vec<f64>> {
    let mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, triplets).ok()?;
    let lu = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| mat.sp_lu().ok()))
        .ok()
        .flatten()?;
    let rhs_col = Col::<f64>::from_fn(n, |i| rhs[i]);
    let sol = lu.solve(&rhs_col);
    let out: Vec<f64> = (0..n).map(|i| sol[i]).collect();
    if out.iter().all(|v| v.is_finite()) {
        Some(out)
    } else {
        None
    }
}

/// Recover 0-based `(row, col)` pairs in nnz order from the wire arrays.
fn decode_structure(n: usize, nnz: usize, col: &[i32], len: &[i32], row: &[i32]) -> Vec<(usize, usize)> {
    let mut structure = vec![(0usize, 0usize); nnz];
    for j in 0..n {
        let start = (col[j] - 1) as usize;
        for t in 0..len[j] as usize {
            structure[start + t] = ((row[start + t] - 1) as usize, j);
        }
    }
    structure
}

/// Solve the box MCP defined by the two callbacks.
///
/// `linear_elements` lists 1-indexed nnz positions of `∂F/∂z` whose value
/// does not depend on `z`; when *every* entry is linear (and the structure
/// is flagged constant) the Jacobian is evaluated once and reused for all
/// iterations.
#[allow(clippy::too_many_arguments)]
pub fn solve_mcp<Fc, Jc>(
    n: usize,
    nnz: usize,
    mut f_cb: Fc,
    mut j_cb: Jc,
    lb: &[f64],
    ub: &[f64],
    z0: &[f64],
    jacobian_structure_constant: bool,
    linear_elements: &[usize],
    options: &EngineOptions,
) -> EngineReport
where
    Fc: FnMut(usize, &[f64], &mut [f64]) -> i32,
    Jc: FnMut(usize, usize, &[f64], &mut [i32], &mut [i32], &mut [i32], &mut [f64]) -> i32,
{
    let start_time = Instant::now();
    let mut z = z0.to_vec();
    let mut fval = vec![0.0; n];
    let mut phi = vec![0.0; n];
    let mut d_a = vec![0.0; n];
    let mut d_b = vec![0.0; n];
    let mut col = vec![0i32; n];
    let mut len = vec![0i32; n];
    let mut row = vec![0i32; nnz];
    let mut data = vec![0.0f64; nnz];
    let mut structure: Vec<(usize, usize)> = Vec::new();
    let mut has_diag = vec![false; n];
    let mut jacobian_evaluations = 0usize;
    let jacobian_fixed = jacobian_structure_constant && linear_elements.len() == nnz;

    let report = |status: i32, z: Vec<f64>, res: f64, iters: usize, jevals: usize| EngineReport {
        status,
        z,
        residual_norm: res,
        iterations: iters,
        jacobian_evaluations: jevals,
    };

    if f_cb(n, &z, &mut fval) != 0 {
        return report(RAW_DOMAIN_ERROR, z, f64::INFINITY, 0, 0);
    }

    let mut iterations = 0;
    loop {
        reformulate(&z, &fval, lb, ub, &mut phi, &mut d_a, &mut d_b);
        let residual = norm_inf(&phi);

        if !options.silent {
            eprintln!("iter {:4}  |phi| {:.6e}", iterations, residual);
        }
        if residual <= options.convergence_tolerance {
            clamp_to_bounds(&mut z, lb, ub);
            return report(RAW_SOLVED, z, residual, iterations, jacobian_evaluations);
        }
        if iterations >= options.max_iterations {
            return report(
                RAW_ITERATION_LIMIT,
                z,
                residual,
                iterations,
                jacobian_evaluations,
            );
        }
        if let Some(limit) = options.time_limit {
            if start_time.elapsed() > limit {
                return report(RAW_TIME_LIMIT, z, residual, iterations, jacobian_evaluations);
            }
        }

        // Refresh the Jacobian unless every element is linear and already
        // evaluated.
        if jacobian_evaluations == 0 || !jacobian_fixed {
            if j_cb(n, nnz, &z, &mut col, &mut len, &mut row, &mut data) != 0 {
                return report(
                    RAW_DOMAIN_ERROR,
                    z,
                    residual,
                    iterations,
                    jacobian_evaluations,
                );
            }
            jacobian_evaluations += 1;
            if structure.is_empty() || !jacobian_structure_constant {
                structure = decode_structure(n, nnz, &col, &len, &row);
                has_diag.fill(false);
                for &(r, c) in &structure {
                    if r == c {
                        has_diag[r] = true;
                    }
                }
            }
        }

        // Generalized Jacobian of Φ: T = D_a + D_b · J.
        let mut triplets: Vec<(usize, usize, f64)> = Vec::with_capacity(nnz + n);
        for (k, &(r, c)) in structure.iter().enumerate() {
            let mut v = d_b[r] * data[k];
            if r == c {
                v += d_a[r];
            }
            triplets.push((r, c, v));
        }
        for r in 0..n {
            if !has_diag[r] && d_a[r] != 0.0 {
                triplets.push((r, r, d_a[r]));
            }
        }

        // Merit gradient ∇ψ = Tᵀ Φ.
        let mut grad = vec![0.0; n];
        for &(r, c, v) in &triplets {
            grad[c] += v * phi[r];
        }

        let neg_phi: Vec<f64> = phi.iter().map(|p| -p).collect();
        let newton = factor_and_solve(n, &triplets, &neg_phi);

        let (direction, slope) = match newton {
            Some(d) => {
                let dg = dot(&grad, &d);
                if dg < 0.0 {
                    (d, dg)
                } else {
                    let d: Vec<f64> = grad.iter().map(|g| -g).collect();
                    let dg = -dot(&grad, &grad);
                    (d, dg)
                }
            }
            None => {
                let d: Vec<f64> = grad.iter().map(|g| -g).collect();
                let dg = -dot(&grad, &grad);
                (d, dg)
            }
        };

        if slope == 0.0 {
            // Stationary point of the merit function short of a solution.
            return report(RAW_NO_PROGRESS, z, residual, iterations, jacobian_evaluations);
        }

        // Backtracking Armijo search on ψ = ½‖Φ‖².
        let psi0 = 0.5 * dot(&phi, &phi);
        let mut alpha = 1.0;
        let mut z_trial = vec![0.0; n];
        let mut f_trial = vec![0.0; n];
        let mut phi_trial = vec![0.0; n];
        loop {
            if alpha < options.armijo.alpha_min {
                return report(RAW_NO_PROGRESS, z, residual, iterations, jacobian_evaluations);
            }
            for i in 0..n {
                z_trial[i] = z[i] + alpha * direction[i];
            }
            if f_cb(n, &z_trial, &mut f_trial) != 0 {
                return report(
                    RAW_DOMAIN_ERROR,
                    z,
                    residual,
                    iterations,
                    jacobian_evaluations,
                );
            }
            reformulate(&z_trial, &f_trial, lb, ub, &mut phi_trial, &mut d_a, &mut d_b);
            let psi_trial = 0.5 * dot(&phi_trial, &phi_trial);
            if psi_trial <= psi0 + options.armijo.c * alpha * slope {
                break;
            }
            alpha *= options.armijo.rho;
        }

        z.copy_from_slice(&z_trial);
        fval.copy_from_slice(&f_trial);
        iterations += 1;
    }
}

/// Project the final iterate back into the box; convergence leaves at most
/// roundoff-level violations.
fn clamp_to_bounds(z: &mut [f64], lb: &[f64], ub: &[f64]) {
    for i in 0..z.len() {
        z[i] = z[i].max(lb[i]).min(ub[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-dimensional complementarity: F(z) = z − 1, z ≥ 0 ⇒ z* = 1.
    #[test]
    fn scalar_interior_solution() {
        let f = |_n: usize, z: &[f64], out: &mut [f64]| {
            out[0] = z[0] - 1.0;
            0
        };
        let j = |_n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]| {
            col[0] = 1;
            len[0] = 1;
            row[0] = 1;
            data[0] = 1.0;
            0
        };
        let report = solve_mcp(
            1,
            1,
            f,
            j,
            &[0.0],
            &[f64::INFINITY],
            &[0.0],
            true,
            &[],
            &EngineOptions::default(),
        );
        assert_eq!(report.status, RAW_SOLVED);
        assert!((report.z[0] - 1.0).abs() < 1e-8);
    }

    /// F(z) = z + 1 with z ≥ 0 has the boundary solution z* = 0 (F > 0).
    #[test]
    fn scalar_boundary_solution() {
        let f = |_n: usize, z: &[f64], out: &mut [f64]| {
            out[0] = z[0] + 1.0;
            0
        };
        let j = |_n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]| {
            col[0] = 1;
            len[0] = 1;
            row[0] = 1;
            data[0] = 1.0;
            0
        };
        let report = solve_mcp(
            1,
            1,
            f,
            j,
            &[0.0],
            &[f64::INFINITY],
            &[0.5],
            true,
            &[],
            &EngineOptions::default(),
        );
        assert_eq!(report.status, RAW_SOLVED);
        assert!(report.z[0].abs() < 1e-8);
    }

    /// Finite box: F(z) = z − 2 on [0, 1] pushes z to the upper bound.
    #[test]
    fn scalar_upper_bound_active() {
        let f = |_n: usize, z: &[f64], out: &mut [f64]| {
            out[0] = z[0] - 2.0;
            0
        };
        let j = |_n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]| {
            col[0] = 1;
            len[0] = 1;
            row[0] = 1;
            data[0] = 1.0;
            0
        };
        let report = solve_mcp(
            1,
            1,
            f,
            j,
            &[0.0],
            &[1.0],
            &[0.5],
            true,
            &[],
            &EngineOptions::default(),
        );
        assert_eq!(report.status, RAW_SOLVED);
        assert!((report.z[0] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn domain_error_is_reported() {
        let f = |_n: usize, _z: &[f64], _out: &mut [f64]| 1;
        let j = |_n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 _col: &mut [i32],
                 _len: &mut [i32],
                 _row: &mut [i32],
                 _data: &mut [f64]| 0;
        let report = solve_mcp(
            1,
            1,
            f,
            j,
            &[0.0],
            &[1.0],
            &[0.5],
            true,
            &[],
            &EngineOptions::default(),
        );
        assert_eq!(report.status, RAW_DOMAIN_ERROR);
    }
}
