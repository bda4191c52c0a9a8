//! Activity-annotated forward and reverse rules.
//!
//! This surface targets annotation-driven AD pipelines: every argument
//! carries an explicit activity, forward mode accepts a single tangent or
//! a batch, and reverse mode is split into an augmented primal that caches
//! the solve plus a zero-initialized shadow, and a reverse phase that
//! consumes the accumulated seed.

use crate::error::McpError;
use crate::problem::ParametricMcp;
use crate::sensitivity::{self, SensitivityOptions};
use crate::solver::{solve, Solution, SolveOptions};

/// Activity of the problem handle. Only a constant problem is supported:
/// the handle's compiled evaluators and bounds are not differentiation
/// targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemActivity {
    Const,
    Duplicated,
}

/// Activity of a value argument in the reverse rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Const,
    Active,
}

/// Parameter annotation for the forward rule: the primal values plus zero,
/// one, or a batch of tangent directions.
#[derive(Debug, Clone)]
pub enum ThetaActivity<'a> {
    /// No perturbation. Rejected — forward differentiation of a constant
    /// parameter is a no-op.
    Const(&'a [f64]),
    /// One tangent direction.
    Dual(&'a [f64], &'a [f64]),
    /// A batch of tangent directions, producing one `ż` per direction.
    DualBatch(&'a [f64], &'a [Vec<f64>]),
}

/// Tangent output matching the annotation's arity.
#[derive(Debug, Clone)]
pub enum ForwardTangents {
    Single(Vec<f64>),
    Batch(Vec<Vec<f64>>),
}

/// Forward rule: primal solve plus tangents of the solution map.
///
/// A single direction costs one restricted solve; a batch forms
/// `∂z*/∂θ` once and applies it to every direction.
pub fn solve_forward(
    problem: &mut ParametricMcp,
    problem_activity: ProblemActivity,
    theta: ThetaActivity<'_>,
    solve_options: &SolveOptions,
    sensitivity_options: &SensitivityOptions,
) -> Result<(Solution, ForwardTangents), McpError> {
    if problem_activity != ProblemActivity::Const {
        return Err(McpError::InvalidAnnotation(
            "the problem handle must be annotated constant",
        ));
    }
    match theta {
        ThetaActivity::Const(_) => Err(McpError::InvalidAnnotation(
            "theta is annotated constant; forward differentiation would be a no-op",
        )),
        ThetaActivity::Dual(values, tangent) => {
            let solution = solve(problem, values, solve_options)?;
            let z_dot = sensitivity::tangent(
                problem,
                &solution.z,
                values,
                tangent,
                sensitivity_options,
            )?;
            Ok((solution, ForwardTangents::Single(z_dot)))
        }
        ThetaActivity::DualBatch(values, tangents) => {
            let solution = solve(problem, values, solve_options)?;
            let jac = sensitivity::jacobian_wrt_theta(
                problem,
                &solution,
                values,
                sensitivity_options,
            )?;
            let mut batch = Vec::with_capacity(tangents.len());
            for theta_dot in tangents {
                if theta_dot.len() != jac.n {
                    return Err(McpError::DimensionMismatch {
                        what: "theta_dot",
                        expected: jac.n,
                        found: theta_dot.len(),
                    });
                }
                let mut z_dot = vec![0.0; jac.m];
                jac.mul_vec(theta_dot, &mut z_dot);
                batch.push(z_dot);
            }
            Ok((solution, ForwardTangents::Batch(batch)))
        }
    }
}

/// Tape cached between the two reverse phases: the primal point and the
/// shadow accumulator for the solution cotangent.
#[derive(Debug, Clone)]
pub struct ReverseTape {
    theta: Vec<f64>,
    z_star: Vec<f64>,
    /// Cotangent seed `z̄`, zero-initialized; accumulate into it between
    /// the phases.
    pub shadow: Vec<f64>,
}

/// Augmented primal of the reverse rule: run the solve, cache the primal
/// and a zeroed shadow.
pub fn augmented_primal(
    problem: &mut ParametricMcp,
    problem_activity: ProblemActivity,
    theta: &[f64],
    theta_activity: Activity,
    solve_options: &SolveOptions,
) -> Result<(Solution, ReverseTape), McpError> {
    if problem_activity != ProblemActivity::Const {
        return Err(McpError::InvalidAnnotation(
            "the problem handle must be annotated constant",
        ));
    }
    if theta_activity != Activity::Active {
        return Err(McpError::InvalidAnnotation(
            "theta is annotated constant; reverse differentiation would be a no-op",
        ));
    }
    if !problem.has_sensitivities() {
        return Err(McpError::MissingSensitivities);
    }
    let solution = solve(problem, theta, solve_options)?;
    let tape = ReverseTape {
        theta: theta.to_vec(),
        z_star: solution.z.clone(),
        shadow: vec![0.0; solution.z.len()],
    };
    Ok((solution, tape))
}

/// Reverse phase: consume the accumulated shadow and return `θ̄`.
///
/// The seed is zeroed afterwards, so a tape can be reused across multiple
/// backward passes the way shadow buffers usually are.
pub fn reverse(
    problem: &mut ParametricMcp,
    tape: &mut ReverseTape,
    sensitivity_options: &SensitivityOptions,
) -> Result<Vec<f64>, McpError> {
    let theta_bar = sensitivity::adjoint(
        problem,
        &tape.z_star,
        &tape.theta,
        &tape.shadow,
        sensitivity_options,
    )?;
    tape.shadow.fill(0.0);
    Ok(theta_bar)
}
