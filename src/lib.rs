//! mpc_tracking - Model predictive path tracking for a kinematic bicycle vehicle
//!
//! Each control tick takes world-frame waypoints and the vehicle pose, fits a
//! reference polynomial in the vehicle frame, projects the state over the
//! actuation delay and solves a finite-horizon optimal control problem. The
//! first actuation of the optimal sequence is emitted.

// Core modules
pub mod common;
pub mod config;
pub mod utils;

// Controller
pub mod path_tracking;
pub mod telemetry;

// Re-export common types for convenience
pub use common::{Actuation, Path2D, Point2D, Pose2D, Telemetry, TickOutput, TickStatus, VehicleState};
pub use common::{Controller, MotionModel};
pub use common::{MpcError, MpcResult};
pub use config::MpcConfig;
pub use path_tracking::{ControllerState, MpcController};
