//! Implicit differentiation of the solution map `θ ↦ z*(θ)`.
//!
//! At a solution, each strictly inactive coordinate satisfies
//! `F_i(z*, θ) = 0` as a smooth equality; differentiating the restricted
//! system gives `A[I,I]·∂z*[I]/∂θ + B[I,:] = 0` with `A = ∂F/∂z` and
//! `B = ∂F/∂θ`. Boundary-active coordinates are frozen at their bound and
//! contribute zero rows. The restricted solve uses the column-pivoted QR
//! from [`crate::linalg`], so a degenerate active set degrades to a finite
//! least-squares solution instead of NaN.

use crate::error::McpError;
use crate::linalg::{col_piv_qr_factor, transpose};
use crate::problem::ParametricMcp;
use crate::solver::Solution;
use crate::sparse::CscMatrix;

/// Options for the sensitivity operations.
#[derive(Clone, Debug)]
pub struct SensitivityOptions {
    /// Tolerance `τ` of the strictly-inactive predicate.
    pub active_tolerance: f64,
}

impl Default for SensitivityOptions {
    fn default() -> Self {
        SensitivityOptions {
            active_tolerance: 1e-3,
        }
    }
}

/// Indices strictly interior to the box: at least `τ` from both bounds,
/// and only when the bounds themselves are separated by more than `2τ`
/// (thin feasible strips are treated as fully active).
pub fn strictly_inactive(z: &[f64], lb: &[f64], ub: &[f64], tau: f64) -> Vec<usize> {
    (0..z.len())
        .filter(|&i| ub[i] - lb[i] > 2.0 * tau && z[i] >= lb[i] + tau && z[i] <= ub[i] - tau)
        .collect()
}

/// The solution sensitivity `∂z*/∂θ` as a sparse `n × m` matrix.
///
/// Rows outside the strictly-inactive set are structurally zero; when the
/// set is empty the result has no structural non-zeros at all.
pub fn jacobian_wrt_theta(
    problem: &mut ParametricMcp,
    solution: &Solution,
    theta: &[f64],
    options: &SensitivityOptions,
) -> Result<CscMatrix, McpError> {
    let (n, m) = check_dimensions(problem, &solution.z, theta)?;
    let restricted = match RestrictedSystem::gather(problem, &solution.z, theta, options)? {
        Some(r) => r,
        None => return Ok(CscMatrix::zeros(n, m)),
    };

    let factors = col_piv_qr_factor(&restricted.neg_a);
    let b_columns = transpose(&restricted.b);
    let x_columns = factors.solve_lstsq_columns(&b_columns);

    // Scatter the dense |I| × m block into the sparse n × m result.
    let pattern: Vec<(usize, usize)> = (0..m)
        .flat_map(|j| restricted.inactive.iter().map(move |&i| (i, j)))
        .collect();
    let mut out = CscMatrix::from_pattern(n, m, &pattern);
    let mut k = 0;
    for x_col in &x_columns {
        for &v in x_col {
            out.nzval[k] = v;
            k += 1;
        }
    }
    Ok(out)
}

/// Directional sensitivity `ż = (∂z*/∂θ)·θ̇` without forming the full
/// Jacobian: one restricted solve against the single right-hand side
/// `B[I,:]·θ̇`.
pub fn tangent(
    problem: &mut ParametricMcp,
    z_star: &[f64],
    theta: &[f64],
    theta_dot: &[f64],
    options: &SensitivityOptions,
) -> Result<Vec<f64>, McpError> {
    let (n, m) = check_dimensions(problem, z_star, theta)?;
    if theta_dot.len() != m {
        return Err(McpError::DimensionMismatch {
            what: "theta_dot",
            expected: m,
            found: theta_dot.len(),
        });
    }
    let restricted = match RestrictedSystem::gather(problem, z_star, theta, options)? {
        Some(r) => r,
        None => return Ok(vec![0.0; n]),
    };

    let rhs: Vec<f64> = restricted
        .b
        .iter()
        .map(|row| row.iter().zip(theta_dot).map(|(&b, &d)| b * d).sum())
        .collect();
    let x = col_piv_qr_factor(&restricted.neg_a).solve_lstsq(&rhs);

    let mut z_dot = vec![0.0; n];
    for (&i, &v) in restricted.inactive.iter().zip(&x) {
        z_dot[i] = v;
    }
    Ok(z_dot)
}

/// Adjoint sensitivity `θ̄ = (∂z*/∂θ)ᵀ·z̄`: solve the transposed restricted
/// system for `λ`, then accumulate `B[I,:]ᵀ·λ`.
pub fn adjoint(
    problem: &mut ParametricMcp,
    z_star: &[f64],
    theta: &[f64],
    z_bar: &[f64],
    options: &SensitivityOptions,
) -> Result<Vec<f64>, McpError> {
    let (n, m) = check_dimensions(problem, z_star, theta)?;
    if z_bar.len() != n {
        return Err(McpError::DimensionMismatch {
            what: "z_bar",
            expected: n,
            found: z_bar.len(),
        });
    }
    let restricted = match RestrictedSystem::gather(problem, z_star, theta, options)? {
        Some(r) => r,
        None => return Ok(vec![0.0; m]),
    };

    let rhs: Vec<f64> = restricted.inactive.iter().map(|&i| z_bar[i]).collect();
    let neg_a_t = transpose(&restricted.neg_a);
    let lambda = col_piv_qr_factor(&neg_a_t).solve_lstsq(&rhs);

    let mut theta_bar = vec![0.0; m];
    for (row, &l) in restricted.b.iter().zip(&lambda) {
        for (j, &b) in row.iter().enumerate() {
            theta_bar[j] += b * l;
        }
    }
    Ok(theta_bar)
}

/// The dense restriction of the implicit system to the strictly-inactive
/// set: `neg_a = −A[I,I]` and `b = B[I,:]`.
struct RestrictedSystem {
    inactive: Vec<usize>,
    neg_a: Vec<Vec<f64>>,
    b: Vec<Vec<f64>>,
}

impl RestrictedSystem {
    /// Evaluate both Jacobians at `(z*, θ)` and gather the restricted
    /// blocks. `None` when the strictly-inactive set is empty.
    fn gather(
        problem: &mut ParametricMcp,
        z_star: &[f64],
        theta: &[f64],
        options: &SensitivityOptions,
    ) -> Result<Option<RestrictedSystem>, McpError> {
        if problem.jacobian_theta.is_none() {
            return Err(McpError::MissingSensitivities);
        }
        let n = problem.problem_size();
        let m = problem.parameter_dimension();
        let inactive = strictly_inactive(
            z_star,
            &problem.lower_bounds,
            &problem.upper_bounds,
            options.active_tolerance,
        );
        if inactive.is_empty() {
            return Ok(None);
        }

        let mut position = vec![usize::MAX; n];
        for (p, &i) in inactive.iter().enumerate() {
            position[i] = p;
        }
        let size = inactive.len();

        problem.jacobian_z.evaluate(z_star, theta);
        let mut neg_a = vec![vec![0.0; size]; size];
        let jz = &problem.jacobian_z;
        for (k, (&r, &c)) in jz.rows.iter().zip(&jz.cols).enumerate() {
            if position[r] != usize::MAX && position[c] != usize::MAX {
                neg_a[position[r]][position[c]] = -jz.scratch.nzval[k];
            }
        }

        let jt = problem.jacobian_theta.as_mut().expect("checked above");
        jt.evaluate(z_star, theta);
        let mut b = vec![vec![0.0; m]; size];
        for (k, (&r, &c)) in jt.rows.iter().zip(&jt.cols).enumerate() {
            if position[r] != usize::MAX {
                b[position[r]][c] = jt.scratch.nzval[k];
            }
        }

        Ok(Some(RestrictedSystem { inactive, neg_a, b }))
    }
}

fn check_dimensions(
    problem: &ParametricMcp,
    z_star: &[f64],
    theta: &[f64],
) -> Result<(usize, usize), McpError> {
    let n = problem.problem_size();
    let m = problem.parameter_dimension();
    if theta.len() != m {
        return Err(McpError::DimensionMismatch {
            what: "theta",
            expected: m,
            found: theta.len(),
        });
    }
    if z_star.len() != n {
        return Err(McpError::DimensionMismatch {
            what: "solution",
            expected: n,
            found: z_star.len(),
        });
    }
    Ok((n, m))
}
