use std::fmt;

/// Errors surfaced at the public API boundary.
///
/// Solver non-convergence is deliberately *not* an error — it is reported
/// through [`crate::solver::Status`] so the caller can apply its own retry
/// policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum McpError {
    /// An input vector had the wrong length.
    DimensionMismatch {
        /// Which argument was mis-sized.
        what: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        found: usize,
    },
    /// A sensitivity operation was requested on a problem compiled with
    /// `compute_sensitivities = false` (no `∂F/∂θ` evaluator available).
    MissingSensitivities,
    /// An activity annotation combination that cannot be differentiated:
    /// a constant parameter vector, or a non-constant problem handle.
    InvalidAnnotation(&'static str),
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::DimensionMismatch {
                what,
                expected,
                found,
            } => {
                write!(
                    f,
                    "dimension mismatch: {} has length {}, expected {}",
                    what, found, expected
                )
            }
            McpError::MissingSensitivities => {
                write!(
                    f,
                    "problem was compiled without parameter sensitivities; \
                     recompile with compute_sensitivities = true"
                )
            }
            McpError::InvalidAnnotation(msg) => {
                write!(f, "invalid activity annotation: {}", msg)
            }
        }
    }
}

impl std::error::Error for McpError {}
