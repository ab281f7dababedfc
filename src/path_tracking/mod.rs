// Path tracking: MPC controller and its pipeline stages

pub mod transform;
pub mod reference;
pub mod kinematic_model;
pub mod latency;
pub mod mpc;
pub mod controller;

pub use transform::{vehicle_to_world, world_to_vehicle};
pub use reference::ReferencePolynomial;
pub use kinematic_model::KinematicBicycle;
pub use latency::LatencyCompensator;
pub use mpc::{MpcSolution, MpcSolver, SolveStatus};
pub use controller::{ControllerState, MpcController};
