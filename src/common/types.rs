//! Common types used throughout mpc_tracking

use nalgebra::Vector6;
use serde::{Deserialize, Serialize};

/// Number of scalar components in a `VehicleState`
pub const STATE_DIM: usize = 6;
/// Number of scalar components in an `Actuation`
pub const ACTUATION_DIM: usize = 2;

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 2D pose (position + heading) in the world frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0, yaw: 0.0 }
    }
}

/// Path represented as a sequence of 2D points
#[derive(Debug, Clone, PartialEq)]
pub struct Path2D {
    pub points: Vec<Point2D>,
}

impl Path2D {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_xy(x: &[f64], y: &[f64]) -> Self {
        assert_eq!(x.len(), y.len());
        let points = x.iter().zip(y.iter())
            .map(|(&x, &y)| Point2D::new(x, y))
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn x_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    pub fn y_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }
}

impl Default for Path2D {
    fn default() -> Self {
        Self::new()
    }
}

/// Vehicle state as seen by the controller
///
/// Position and heading are expressed in the vehicle frame of the tick that
/// produced the state. `cte` and `epsi` are measured against that tick's
/// reference polynomial.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleState {
    pub x: f64,
    pub y: f64,
    /// heading [rad]
    pub psi: f64,
    /// speed [m/s]
    pub v: f64,
    /// cross-track error [m]
    pub cte: f64,
    /// heading error [rad]
    pub epsi: f64,
}

impl VehicleState {
    pub fn new(x: f64, y: f64, psi: f64, v: f64, cte: f64, epsi: f64) -> Self {
        Self { x, y, psi, v, cte, epsi }
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|c| c.is_finite())
    }

    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(self.x, self.y, self.psi, self.v, self.cte, self.epsi)
    }
}

impl From<Vector6<f64>> for VehicleState {
    fn from(v: Vector6<f64>) -> Self {
        Self { x: v[0], y: v[1], psi: v[2], v: v[3], cte: v[4], epsi: v[5] }
    }
}

/// Steering / throttle pair, both normalised to [-1, 1]
///
/// Inside the optimiser positive steering turns left (heading increases).
/// The actuator convention is mirrored, see `to_command`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Actuation {
    pub steering: f64,
    pub throttle: f64,
}

impl Actuation {
    pub fn new(steering: f64, throttle: f64) -> Self {
        Self { steering, throttle }
    }

    pub fn zero() -> Self {
        Self { steering: 0.0, throttle: 0.0 }
    }

    /// Convert an optimiser actuation into the command sent to the vehicle
    pub fn to_command(&self) -> Actuation {
        Actuation::new(-self.steering, self.throttle)
    }

    /// Convert a command previously sent to the vehicle back into optimiser convention
    pub fn from_command(command: &Actuation) -> Actuation {
        Actuation::new(-command.steering, command.throttle)
    }

    pub fn is_finite(&self) -> bool {
        self.steering.is_finite() && self.throttle.is_finite()
    }
}

/// Raw telemetry received once per control tick
///
/// Field names follow the simulator's telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// waypoint x coordinates, world frame
    pub ptsx: Vec<f64>,
    /// waypoint y coordinates, world frame
    pub ptsy: Vec<f64>,
    pub x: f64,
    pub y: f64,
    /// heading [rad]
    pub psi: f64,
    /// speed [mph]
    pub speed: f64,
    /// last issued steering command, normalised
    pub steering_angle: f64,
    /// last issued throttle command, normalised
    pub throttle: f64,
}

impl Telemetry {
    pub fn pose(&self) -> Pose2D {
        Pose2D::new(self.x, self.y, self.psi)
    }

    /// Command the vehicle reports as currently applied
    pub fn reported_command(&self) -> Actuation {
        Actuation::new(self.steering_angle, self.throttle)
    }
}

/// How a tick's command was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Fresh reference and a feasible optimisation result
    Optimal,
    /// The fit failed and the previous reference polynomial was reused
    ReusedReference,
    /// The solver failed; the configured fallback actuation was emitted
    SolverFallback,
    /// Input was rejected; the previous command is held
    Held,
}

/// Everything the controller emits for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// Command in actuator convention
    pub command: Actuation,
    /// Reference curve samples, vehicle frame, display only
    pub reference: Path2D,
    /// Predicted horizon positions, vehicle frame, display only
    pub predicted: Path2D,
    pub status: TickStatus,
}

impl TickOutput {
    /// Output of a tick that keeps the previous command unchanged
    pub fn held(command: Actuation) -> Self {
        Self {
            command,
            reference: Path2D::new(),
            predicted: Path2D::new(),
            status: TickStatus::Held,
        }
    }
}
