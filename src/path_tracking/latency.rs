//! Forward projection of the vehicle state over the actuation delay
//!
//! Planning starts from where the vehicle will be when the new command takes
//! effect, not where it was when telemetry was sampled.

use crate::common::{Actuation, MotionModel, VehicleState};
use crate::path_tracking::kinematic_model::KinematicBicycle;

/// Projects the vehicle-frame state over a fixed, known delay
#[derive(Debug, Clone, Copy)]
pub struct LatencyCompensator {
    delay: f64,
}

impl LatencyCompensator {
    pub fn new(delay: f64) -> Self {
        LatencyCompensator { delay }
    }

    /// State at the vehicle-frame origin before any projection
    ///
    /// The vehicle always faces along its own x axis, so heading is zero.
    pub fn current_state(model: &KinematicBicycle, speed: f64) -> VehicleState {
        let (cte, epsi) = model.tracking_errors(0.0, 0.0, 0.0);
        VehicleState::new(0.0, 0.0, 0.0, speed, cte, epsi)
    }

    /// Apply one model step of length `delay` under the last issued actuation
    ///
    /// `speed` is in m/s and `last` uses the optimiser's steering convention.
    /// Planning starts facing forward, so the projected heading is reset to
    /// zero; cte and epsi are recomputed for that heading at the projected
    /// position.
    pub fn project(&self, model: &KinematicBicycle, speed: f64, last: &Actuation) -> VehicleState {
        let current = Self::current_state(model, speed);
        if self.delay <= 0.0 {
            return current;
        }

        let projected = model.propagate(&current, last, self.delay);
        let (cte, epsi) = model.tracking_errors(projected.x, projected.y, 0.0);
        VehicleState { psi: 0.0, cte, epsi, ..projected }
    }
}
