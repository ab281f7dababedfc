//! Kinematic bicycle model in the vehicle frame of one tick
//!
//! x'   = x + v cos(psi) dt
//! y'   = y + v sin(psi) dt
//! psi' = psi + v / Lf * delta * dt
//! v'   = v + a dt
//! cte' = cte + v sin(epsi) dt
//! epsi'= epsi + v / Lf * delta * dt
//!
//! `cte` and `epsi` are taken against the tick's reference polynomial at the
//! current position (cte = y - f(x), epsi = psi - atan f'(x)) before they are
//! advanced, so predicted errors follow the curve rather than a straight line.
//!
//! This is a single explicit Euler step, a discrete approximation. Two steps of
//! dt/2 do not in general equal one step of dt, and no such consistency is
//! relied on anywhere. Heading is not wrapped; one horizon is short enough for
//! it to stay small.

use crate::common::{Actuation, MotionModel, VehicleState};
use crate::config::VehicleParams;
use crate::path_tracking::reference::ReferencePolynomial;

/// Bicycle model bound to the reference curve of the current tick
#[derive(Debug, Clone, Copy)]
pub struct KinematicBicycle<'a> {
    lf: f64,
    max_steer: f64,
    reference: &'a ReferencePolynomial,
}

impl<'a> KinematicBicycle<'a> {
    pub fn new(params: &VehicleParams, reference: &'a ReferencePolynomial) -> Self {
        KinematicBicycle {
            lf: params.lf,
            max_steer: params.max_steer(),
            reference,
        }
    }

    /// Normalised steering command to wheel angle [rad]
    pub fn steering_angle(&self, steering: f64) -> f64 {
        steering * self.max_steer
    }

    /// (cte, epsi) of a pose against the reference curve
    pub fn tracking_errors(&self, x: f64, y: f64, psi: f64) -> (f64, f64) {
        let cte = y - self.reference.eval(x);
        let epsi = psi - self.reference.heading(x);
        (cte, epsi)
    }

    /// One Euler step of length `dt`
    pub fn step(&self, state: &VehicleState, actuation: &Actuation, dt: f64) -> VehicleState {
        let delta = self.steering_angle(actuation.steering);
        let yaw_rate = state.v / self.lf * delta;
        let (cte, epsi) = self.tracking_errors(state.x, state.y, state.psi);

        VehicleState {
            x: state.x + state.v * state.psi.cos() * dt,
            y: state.y + state.v * state.psi.sin() * dt,
            psi: state.psi + yaw_rate * dt,
            v: state.v + actuation.throttle * dt,
            cte: cte + state.v * epsi.sin() * dt,
            epsi: epsi + yaw_rate * dt,
        }
    }
}

impl MotionModel for KinematicBicycle<'_> {
    type State = VehicleState;
    type Control = Actuation;

    fn propagate(&self, state: &VehicleState, control: &Actuation, dt: f64) -> VehicleState {
        self.step(state, control, dt)
    }
}
