//! Model predictive control over a finite horizon
//!
//! `problem` builds the objective and constraints for one horizon,
//! `solver` finds the actuations that minimise it.

pub mod problem;
pub mod solver;

pub use problem::{HorizonProblem, HorizonTrajectory};
pub use solver::{FallbackReason, MpcSolution, MpcSolver, SolveStatus};
