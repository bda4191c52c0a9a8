//! Solver driver: marshals a compiled problem across the callback wire
//! contract, decodes termination status, and implements the linearized
//! fast path.

pub mod semismooth;

use std::fmt;
use std::time::Duration;

use crate::error::McpError;
use crate::problem::ParametricMcp;
use crate::sparse::{csc_to_coo_contiguous, csc_to_coo_scattered, CscMatrix};

pub use semismooth::{ArmijoParams, EngineOptions};

/// Termination status of a solve, decoded from the engine's raw code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Converged to the requested tolerance.
    Solved,
    /// The merit function stagnated (line-search failure or a stationary
    /// point short of a solution).
    NoProgress,
    /// Major iteration limit reached.
    IterationLimit,
    /// Wall-clock limit reached.
    TimeLimit,
    /// A callback reported a non-finite evaluation.
    DomainError,
    /// Any other engine failure.
    InternalError,
}

impl Status {
    pub fn from_raw(code: i32) -> Status {
        match code {
            semismooth::RAW_SOLVED => Status::Solved,
            semismooth::RAW_NO_PROGRESS => Status::NoProgress,
            semismooth::RAW_ITERATION_LIMIT => Status::IterationLimit,
            semismooth::RAW_TIME_LIMIT => Status::TimeLimit,
            semismooth::RAW_DOMAIN_ERROR => Status::DomainError,
            _ => Status::InternalError,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, Status::Solved)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Solved => write!(f, "solved"),
            Status::NoProgress => write!(f, "no progress"),
            Status::IterationLimit => write!(f, "iteration limit reached"),
            Status::TimeLimit => write!(f, "time limit reached"),
            Status::DomainError => write!(f, "domain error in callback"),
            Status::InternalError => write!(f, "internal solver error"),
        }
    }
}

/// Diagnostics copied from the engine report.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// `‖Φ‖∞` of the complementarity residual at the final iterate.
    pub residual_norm: f64,
    pub iterations: usize,
    pub jacobian_evaluations: usize,
    /// The undecoded engine status.
    pub raw_status: i32,
}

/// Result of a [`solve`] call, owned by the caller.
#[derive(Debug, Clone)]
pub struct Solution {
    pub z: Vec<f64>,
    pub status: Status,
    pub info: SolveInfo,
}

/// Options accepted by [`solve`].
#[derive(Clone, Debug)]
pub struct SolveOptions {
    /// Starting point; the zero vector when absent.
    pub initial_guess: Option<Vec<f64>>,
    /// Emit the engine's per-iteration log.
    pub verbose: bool,
    /// Warn on stderr when the solve does not converge.
    pub warn_on_convergence_failure: bool,
    /// Pass the constant-entry list of `∂F/∂z` to the engine as linear
    /// elements.
    pub enable_presolve: bool,
    /// Fill the Jacobian wire arrays with the contiguous copy (the data
    /// buffer is trusted to be laid out in exact CSC order); the scattered
    /// path recomputes every position from the column pointers.
    pub jacobian_data_contiguous: bool,
    /// Solve the affine model `F(z₀) + ∂F/∂z(z₀)·(z − z₀)` instead of the
    /// full residual.
    pub approximate_linear: bool,
    /// Engine pass-through.
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    pub time_limit: Option<Duration>,
    pub armijo: ArmijoParams,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            initial_guess: None,
            verbose: false,
            warn_on_convergence_failure: true,
            enable_presolve: false,
            jacobian_data_contiguous: true,
            approximate_linear: false,
            max_iterations: 500,
            convergence_tolerance: 1e-10,
            time_limit: None,
            armijo: ArmijoParams::default(),
        }
    }
}

impl SolveOptions {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_iterations: self.max_iterations,
            convergence_tolerance: self.convergence_tolerance,
            time_limit: self.time_limit,
            armijo: self.armijo.clone(),
            silent: !self.verbose,
        }
    }
}

/// Solve the problem at the concrete parameter `θ`.
///
/// Non-convergence is reported through [`Solution::status`], never as an
/// error; the only error paths are dimension mismatches of `θ` or the
/// initial guess.
pub fn solve(
    problem: &mut ParametricMcp,
    theta: &[f64],
    options: &SolveOptions,
) -> Result<Solution, McpError> {
    let n = problem.problem_size();
    let m = problem.parameter_dimension();
    if theta.len() != m {
        return Err(McpError::DimensionMismatch {
            what: "theta",
            expected: m,
            found: theta.len(),
        });
    }
    if let Some(guess) = &options.initial_guess {
        if guess.len() != n {
            return Err(McpError::DimensionMismatch {
                what: "initial_guess",
                expected: n,
                found: guess.len(),
            });
        }
    }
    let z0 = options
        .initial_guess
        .clone()
        .unwrap_or_else(|| vec![0.0; n]);

    let report = if options.approximate_linear {
        solve_linearized(problem, theta, &z0, options)
    } else {
        solve_full(problem, theta, &z0, options)
    };

    let status = Status::from_raw(report.status);
    if !status.is_solved() && options.warn_on_convergence_failure {
        eprintln!(
            "warning: complementarity solve did not converge: {} (residual {:.3e} after {} iterations)",
            status, report.residual_norm, report.iterations
        );
    }

    Ok(Solution {
        z: report.z,
        status,
        info: SolveInfo {
            residual_norm: report.residual_norm,
            iterations: report.iterations,
            jacobian_evaluations: report.jacobian_evaluations,
            raw_status: report.status,
        },
    })
}

fn solve_full(
    problem: &mut ParametricMcp,
    theta: &[f64],
    z0: &[f64],
    options: &SolveOptions,
) -> semismooth::EngineReport {
    let n = problem.problem_size();
    let nnz = problem.jacobian_z.nnz();
    let linear_elements: Vec<usize> = if options.enable_presolve {
        problem
            .jacobian_z
            .constant_entries
            .iter()
            .map(|&k| k + 1)
            .collect()
    } else {
        Vec::new()
    };
    let contiguous = options.jacobian_data_contiguous;

    // Split the handle so the two callbacks borrow disjoint evaluators.
    let ParametricMcp {
        f,
        jacobian_z,
        lower_bounds,
        upper_bounds,
        ..
    } = problem;

    let f_cb = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
        f.call(out, z, theta);
        if out.iter().all(|v| v.is_finite()) {
            0
        } else {
            1
        }
    };
    let j_cb = |_n: usize,
                _nnz: usize,
                z: &[f64],
                col: &mut [i32],
                len: &mut [i32],
                row: &mut [i32],
                data: &mut [f64]|
     -> i32 {
        jacobian_z.evaluate(z, theta);
        if contiguous {
            csc_to_coo_contiguous(&jacobian_z.scratch, col, len, row, data);
        } else {
            csc_to_coo_scattered(&jacobian_z.scratch, col, len, row, data);
        }
        if data.iter().all(|v| v.is_finite()) {
            0
        } else {
            1
        }
    };

    semismooth::solve_mcp(
        n,
        nnz,
        f_cb,
        j_cb,
        lower_bounds,
        upper_bounds,
        z0,
        true,
        &linear_elements,
        &options.engine_options(),
    )
}

/// Linearized fast path: freeze `M = ∂F/∂z` and `q = F` at the initial
/// guess and solve the affine MCP `M·w + q ⟂ lb − z₀ ≤ w ≤ ub − z₀` in the
/// shifted variable `w = z − z₀`, undoing the shift on return. Every
/// non-zero of `M` is a linear element in this mode.
fn solve_linearized(
    problem: &mut ParametricMcp,
    theta: &[f64],
    z0: &[f64],
    options: &SolveOptions,
) -> semismooth::EngineReport {
    let n = problem.problem_size();
    let mut q = vec![0.0; n];
    problem.f.call(&mut q, z0, theta);
    problem.jacobian_z.evaluate(z0, theta);
    let m_csc: CscMatrix = problem.jacobian_z.scratch.clone();
    let nnz = m_csc.nnz();

    let shifted_lb: Vec<f64> = problem
        .lower_bounds
        .iter()
        .zip(z0)
        .map(|(l, z)| l - z)
        .collect();
    let shifted_ub: Vec<f64> = problem
        .upper_bounds
        .iter()
        .zip(z0)
        .map(|(u, z)| u - z)
        .collect();
    let linear_elements: Vec<usize> = (1..=nnz).collect();
    let contiguous = options.jacobian_data_contiguous;

    let mut mw = vec![0.0; n];
    let f_cb = |_n: usize, w: &[f64], out: &mut [f64]| -> i32 {
        m_csc.mul_vec(w, &mut mw);
        for i in 0..out.len() {
            out[i] = mw[i] + q[i];
        }
        if out.iter().all(|v| v.is_finite()) {
            0
        } else {
            1
        }
    };
    let j_cb = |_n: usize,
                _nnz: usize,
                _w: &[f64],
                col: &mut [i32],
                len: &mut [i32],
                row: &mut [i32],
                data: &mut [f64]|
     -> i32 {
        if contiguous {
            csc_to_coo_contiguous(&m_csc, col, len, row, data);
        } else {
            csc_to_coo_scattered(&m_csc, col, len, row, data);
        }
        0
    };

    let mut report = semismooth::solve_mcp(
        n,
        nnz,
        f_cb,
        j_cb,
        &shifted_lb,
        &shifted_ub,
        &vec![0.0; n],
        true,
        &linear_elements,
        &options.engine_options(),
    );
    for (w, z) in report.z.iter_mut().zip(z0) {
        *w += z;
    }
    report
}
