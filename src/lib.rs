//! Differentiable parametric mixed complementarity problems.
//!
//! Compile a residual map `F(z, θ)` with box bounds `lb ≤ z ≤ ub` into a
//! reusable [`ParametricMcp`], solve it for concrete parameter vectors
//! through a callback-driven complementarity engine, and differentiate the
//! solution map `θ ↦ z*(θ)` via the implicit function theorem.
//!
//! ```
//! use paramcp::{compile, solve, CompileOptions, SolveOptions};
//!
//! // Projection of θ onto the nonnegative orthant, phrased as an MCP.
//! let mut problem = compile(
//!     |z, theta| {
//!         vec![
//!             2.0 * &z[0] - &z[2] - 2.0 * &theta[0],
//!             2.0 * &z[1] - &z[3] - 2.0 * &theta[1],
//!             z[0].clone(),
//!             z[1].clone(),
//!         ]
//!     },
//!     vec![f64::NEG_INFINITY, f64::NEG_INFINITY, 0.0, 0.0],
//!     vec![f64::INFINITY; 4],
//!     2,
//!     CompileOptions::default(),
//! )
//! .unwrap();
//!
//! let solution = solve(&mut problem, &[1.0, -0.5], &SolveOptions::default()).unwrap();
//! assert!(solution.status.is_solved());
//! assert!((solution.z[0] - 1.0).abs() < 1e-6);
//! assert!(solution.z[1].abs() < 1e-6);
//! ```

pub mod backend;
pub mod error;
pub mod expr;
pub mod linalg;
pub mod problem;
pub mod rules;
pub mod sensitivity;
pub mod solver;
pub mod sparse;

pub use backend::{Backend, BackendOptions};
pub use error::McpError;
pub use expr::Sym;
pub use problem::{compile, CompileOptions, ParametricMcp};
pub use sensitivity::{jacobian_wrt_theta, SensitivityOptions};
pub use solver::{solve, Solution, SolveInfo, SolveOptions, Status};
pub use sparse::{CscMatrix, SparseFunction};
