//! Automatic-differentiation integrations for the solution map.
//!
//! Three parallel surfaces with identical mathematical content:
//! a lazy reverse-mode pullback, a forward-mode dual-number entry point,
//! and an activity-annotated forward/reverse pair for annotation-driven AD
//! pipelines.

pub mod annotated;
pub mod dual;
pub mod pullback;

pub use annotated::{
    augmented_primal, reverse, solve_forward, Activity, ForwardTangents, ProblemActivity,
    ReverseTape, ThetaActivity,
};
pub use dual::{solve_dual, DualSolution};
pub use pullback::{solve_with_pullback, Pullback};
