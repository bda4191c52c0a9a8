//! Problem compilation: trace the residual, derive sparse Jacobians, and
//! assemble the reusable [`ParametricMcp`] handle.

use crate::backend::{self, Backend, BackendOptions, Evaluator};
use crate::error::McpError;
use crate::expr::{Sym, SymbolicContext};
use crate::sparse::{constant_entries, SparseFunction};

/// Options accepted by [`compile`].
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Also derive and compile `∂F/∂θ` so the solution map can be
    /// differentiated. Disabling skips that work but makes every
    /// sensitivity operation fail with
    /// [`McpError::MissingSensitivities`].
    pub compute_sensitivities: bool,
    /// Which symbolic engine generates the evaluators.
    pub backend: Backend,
    /// Expected problem size; checked against the bound vectors when set.
    pub problem_size: Option<usize>,
    /// Run every compiled evaluator once on zero inputs so first-call
    /// costs are paid here rather than inside the first solve.
    pub warm_up: bool,
    /// Engine-specific knobs.
    pub backend_options: BackendOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            compute_sensitivities: true,
            backend: Backend::default(),
            problem_size: None,
            warm_up: true,
            backend_options: BackendOptions::default(),
        }
    }
}

/// A compiled parametric mixed complementarity problem.
///
/// Holds the in-place residual evaluator, the sparse Jacobian evaluators
/// with their fixed patterns and scratch matrices, and the box bounds.
/// Created once by [`compile`] and reused across solves; evaluation mutates
/// the internal scratch buffers, so a single instance must not be shared
/// across threads — compile one per worker instead.
#[derive(Debug)]
pub struct ParametricMcp {
    pub(crate) f: Evaluator,
    pub(crate) jacobian_z: SparseFunction,
    pub(crate) jacobian_theta: Option<SparseFunction>,
    pub(crate) lower_bounds: Vec<f64>,
    pub(crate) upper_bounds: Vec<f64>,
    pub(crate) param_dim: usize,
}

impl ParametricMcp {
    /// Number of decision variables `n`.
    pub fn problem_size(&self) -> usize {
        self.lower_bounds.len()
    }

    /// Number of parameters `m`.
    pub fn parameter_dimension(&self) -> usize {
        self.param_dim
    }

    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    /// Whether `∂F/∂θ` was compiled.
    pub fn has_sensitivities(&self) -> bool {
        self.jacobian_theta.is_some()
    }

    /// Structural non-zero count of `∂F/∂z`.
    pub fn jacobian_nnz(&self) -> usize {
        self.jacobian_z.nnz()
    }

    /// Evaluate the residual `F(z, θ)` into `out`.
    pub fn evaluate_residual(&mut self, out: &mut [f64], z: &[f64], theta: &[f64]) {
        self.f.call(out, z, theta);
    }

    /// The `∂F/∂z` sparse function (pattern, scratch, constant entries).
    pub fn jacobian_z(&self) -> &SparseFunction {
        &self.jacobian_z
    }

    /// The `∂F/∂θ` sparse function, absent when compiled without
    /// sensitivities.
    pub fn jacobian_theta(&self) -> Option<&SparseFunction> {
        self.jacobian_theta.as_ref()
    }

    /// Evaluate `∂F/∂z` at `(z, θ)` and expose the scratch matrix.
    pub fn evaluate_jacobian_z(&mut self, z: &[f64], theta: &[f64]) -> &crate::sparse::CscMatrix {
        self.jacobian_z.evaluate(z, theta);
        &self.jacobian_z.scratch
    }

    /// Evaluate `∂F/∂θ` at `(z, θ)` and expose the scratch matrix.
    pub fn evaluate_jacobian_theta(
        &mut self,
        z: &[f64],
        theta: &[f64],
    ) -> Result<&crate::sparse::CscMatrix, McpError> {
        let jt = self
            .jacobian_theta
            .as_mut()
            .ok_or(McpError::MissingSensitivities)?;
        jt.evaluate(z, theta);
        Ok(&jt.scratch)
    }
}

/// Compile a residual map into a [`ParametricMcp`].
///
/// `f` receives symbolic vectors of length `n = |lb|` and `m = param_dim`
/// and must return a symbolic residual of length `n`. Tracing applies `f`
/// exactly once; panics from the closure propagate unchanged.
pub fn compile<Ff>(
    f: Ff,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
    param_dim: usize,
    options: CompileOptions,
) -> Result<ParametricMcp, McpError>
where
    Ff: FnOnce(&[Sym], &[Sym]) -> Vec<Sym>,
{
    if lower_bounds.len() != upper_bounds.len() {
        return Err(McpError::DimensionMismatch {
            what: "upper_bounds",
            expected: lower_bounds.len(),
            found: upper_bounds.len(),
        });
    }
    let n = lower_bounds.len();
    if let Some(expected) = options.problem_size {
        if expected != n {
            return Err(McpError::DimensionMismatch {
                what: "lower_bounds",
                expected,
                found: n,
            });
        }
    }
    debug_assert!(
        lower_bounds
            .iter()
            .zip(&upper_bounds)
            .all(|(lo, hi)| lo <= hi),
        "lower bound exceeds upper bound"
    );

    let mut ctx = SymbolicContext::new();
    let z_sym = ctx.make_variables(n);
    let theta_sym = ctx.make_variables(param_dim);
    let num_inputs = ctx.num_variables();

    let residual = f(&z_sym, &theta_sym);
    if residual.len() != n {
        return Err(McpError::DimensionMismatch {
            what: "residual",
            expected: n,
            found: residual.len(),
        });
    }

    let backend = options.backend;
    let bo = &options.backend_options;

    let f_eval = Evaluator::new(
        backend.build_function(&residual, num_inputs, bo),
        n,
        param_dim,
    );

    let jacobian_z = build_sparse_jacobian(&residual, &z_sym, n, n, param_dim, backend, num_inputs, bo);
    let jacobian_theta = if options.compute_sensitivities {
        Some(build_sparse_jacobian(
            &residual, &theta_sym, n, param_dim, param_dim, backend, num_inputs, bo,
        ))
    } else {
        None
    };

    let mut problem = ParametricMcp {
        f: f_eval,
        jacobian_z,
        jacobian_theta,
        lower_bounds,
        upper_bounds,
        param_dim,
    };

    if options.warm_up {
        warm_up(&mut problem);
    }

    Ok(problem)
}

#[allow(clippy::too_many_arguments)]
fn build_sparse_jacobian(
    residual: &[Sym],
    vars: &[Sym],
    nrows: usize,
    ncols: usize,
    param_dim: usize,
    backend: Backend,
    num_inputs: usize,
    bo: &BackendOptions,
) -> SparseFunction {
    let triplets = backend::sparse_jacobian(residual, vars);
    let constants = constant_entries(&triplets, vars);
    let pattern: Vec<(usize, usize)> = triplets.iter().map(|t| (t.0, t.1)).collect();
    let exprs: Vec<Sym> = triplets.into_iter().map(|t| t.2).collect();
    let state_dim = num_inputs - param_dim;
    let evaluator = Evaluator::new(
        backend.build_function(&exprs, num_inputs, bo),
        state_dim,
        param_dim,
    );
    SparseFunction::new(evaluator, pattern, nrows, ncols, constants)
}

/// One-shot zero-input call of every evaluator, amortizing first-call work
/// (buffer growth, hash-map population in the graph engine) before the
/// first user solve.
fn warm_up(problem: &mut ParametricMcp) {
    let n = problem.problem_size();
    let m = problem.parameter_dimension();
    let z = vec![0.0; n];
    let theta = vec![0.0; m];
    let mut out = vec![0.0; n];
    problem.f.call(&mut out, &z, &theta);
    problem.jacobian_z.evaluate(&z, &theta);
    if let Some(jt) = problem.jacobian_theta.as_mut() {
        jt.evaluate(&z, &theta);
    }
}
