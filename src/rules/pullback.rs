//! Reverse-mode rule: solve, then pull cotangents back to `θ`.

use crate::error::McpError;
use crate::problem::ParametricMcp;
use crate::sensitivity::{self, SensitivityOptions};
use crate::solver::{solve, Solution, SolveOptions};

/// Deferred cotangent propagation for one solve.
///
/// Holds the primal point; no sensitivity work happens until [`call`]
/// forces it. The problem handle itself is non-differentiable — there is
/// no cotangent surface for it.
///
/// [`call`]: Pullback::call
#[derive(Debug)]
pub struct Pullback<'a> {
    problem: &'a mut ParametricMcp,
    theta: Vec<f64>,
    z_star: Vec<f64>,
    options: SensitivityOptions,
}

impl Pullback<'_> {
    /// Pull the solution cotangent `z̄` back to `θ̄ = (∂z*/∂θ)ᵀ·z̄`.
    pub fn call(&mut self, z_bar: &[f64]) -> Result<Vec<f64>, McpError> {
        sensitivity::adjoint(self.problem, &self.z_star, &self.theta, z_bar, &self.options)
    }
}

/// Solve at `θ` and return the solution together with its pullback.
///
/// The missing-sensitivities check runs eagerly so a problem compiled
/// without `∂F/∂θ` fails here rather than at the first cotangent.
pub fn solve_with_pullback<'a>(
    problem: &'a mut ParametricMcp,
    theta: &[f64],
    solve_options: &SolveOptions,
    sensitivity_options: &SensitivityOptions,
) -> Result<(Solution, Pullback<'a>), McpError> {
    if !problem.has_sensitivities() {
        return Err(McpError::MissingSensitivities);
    }
    let solution = solve(problem, theta, solve_options)?;
    let pullback = Pullback {
        problem,
        theta: theta.to_vec(),
        z_star: solution.z.clone(),
        options: sensitivity_options.clone(),
    };
    Ok((solution, pullback))
}
