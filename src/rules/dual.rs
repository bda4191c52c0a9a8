//! Forward-mode rule over `num_dual` dual numbers.

use num_dual::Dual64;

use crate::error::McpError;
use crate::problem::ParametricMcp;
use crate::sensitivity::{self, SensitivityOptions};
use crate::solver::{solve, SolveInfo, SolveOptions, Status};

/// A solution whose components carry tangents: `z[i] = z*[i] + ż[i]·ε`.
#[derive(Debug, Clone)]
pub struct DualSolution {
    pub z: Vec<Dual64>,
    pub status: Status,
    pub info: SolveInfo,
}

/// Solve with a parameter vector carrying perturbations.
///
/// The primal solve runs at the real parts; the tangent
/// `ż = (∂z*/∂θ)·θ̇` is one restricted linear solve, and each solution
/// component is re-wrapped as a dual. Status and diagnostics are forwarded
/// unchanged from the primal solve.
pub fn solve_dual(
    problem: &mut ParametricMcp,
    theta: &[Dual64],
    solve_options: &SolveOptions,
    sensitivity_options: &SensitivityOptions,
) -> Result<DualSolution, McpError> {
    let values: Vec<f64> = theta.iter().map(|d| d.re).collect();
    let tangents: Vec<f64> = theta.iter().map(|d| d.eps).collect();

    let solution = solve(problem, &values, solve_options)?;
    let z_dot = sensitivity::tangent(
        problem,
        &solution.z,
        &values,
        &tangents,
        sensitivity_options,
    )?;

    let z = solution
        .z
        .iter()
        .zip(&z_dot)
        .map(|(&v, &t)| Dual64::new(v, t))
        .collect();
    Ok(DualSolution {
        z,
        status: solution.status,
        info: solution.info,
    })
}
