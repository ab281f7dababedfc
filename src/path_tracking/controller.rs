//! Per-tick MPC path tracking pipeline
//!
//! Transform -> Fit -> Latency-compensate -> Solve -> emit.
//!
//! The only memory between ticks is `ControllerState`, which the caller passes
//! in and gets back. Tick processing never fails: malformed input holds the
//! previous command, a failed fit reuses the previous reference, and a failed
//! solve emits the configured fallback.

use log::{debug, info, warn};

use crate::common::{Actuation, Controller, MpcError, MpcResult, Path2D, Telemetry, TickOutput, TickStatus};
use crate::config::MpcConfig;
use crate::path_tracking::kinematic_model::KinematicBicycle;
use crate::path_tracking::latency::LatencyCompensator;
use crate::path_tracking::mpc::{HorizonTrajectory, MpcSolver};
use crate::path_tracking::reference::ReferencePolynomial;
use crate::path_tracking::transform::world_to_vehicle;

/// Feedback carried from one tick to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    /// Last command sent, actuator convention
    pub last_command: Option<Actuation>,
    /// Last successfully fitted reference, reused when a fit fails
    pub last_reference: Option<ReferencePolynomial>,
    /// Previous optimised horizon, warm start for the next solve
    pub warm_start: Option<HorizonTrajectory>,
}

/// MPC path tracking controller
#[derive(Debug, Clone)]
pub struct MpcController {
    config: MpcConfig,
    solver: MpcSolver,
    latency: LatencyCompensator,
}

impl MpcController {
    /// Create a controller; an invalid configuration is rejected here
    pub fn new(config: MpcConfig) -> MpcResult<Self> {
        config.validate()?;
        info!(
            "MPC controller: N = {}, dt = {} s, latency = {} s, target speed {} m/s",
            config.horizon.steps,
            config.horizon.dt,
            config.latency.delay,
            config.effective_target_speed()
        );
        Ok(MpcController {
            solver: MpcSolver::new(&config),
            latency: LatencyCompensator::new(config.latency.delay),
            config,
        })
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    /// Process one telemetry update
    pub fn tick(&self, telemetry: &Telemetry, state: ControllerState) -> (TickOutput, ControllerState) {
        let held = state.last_command.unwrap_or_else(|| telemetry.reported_command());

        let (xs, ys) = match world_to_vehicle(&telemetry.pose(), &telemetry.ptsx, &telemetry.ptsy) {
            Ok(local) => local,
            Err(e) => {
                warn!("tick rejected: {}", e);
                return (TickOutput::held(held), state);
            }
        };

        let (reference, reused) = match ReferencePolynomial::fit(&xs, &ys, self.config.reference.degree) {
            Ok(reference) => (reference, false),
            Err(MpcError::FitError(msg)) => match state.last_reference.clone() {
                Some(previous) => {
                    warn!("reference fit failed ({}), reusing previous reference", msg);
                    (previous, true)
                }
                None => {
                    warn!("reference fit failed ({}) with no previous reference, holding command", msg);
                    return (TickOutput::held(held), state);
                }
            },
            Err(e) => {
                warn!("tick rejected: {}", e);
                return (TickOutput::held(held), state);
            }
        };

        let speed = telemetry.speed * self.config.vehicle.speed_to_mps;
        let last = Actuation::from_command(&held);
        let model = KinematicBicycle::new(&self.config.vehicle, &reference);
        let start = self.latency.project(&model, speed, &last);
        debug!(
            "projected start: x {:.3} y {:.3} psi {:.4} v {:.2} cte {:.3} epsi {:.4}",
            start.x, start.y, start.psi, start.v, start.cte, start.epsi
        );

        let last_good = state.last_command.map(|c| Actuation::from_command(&c));
        let solution = self.solver.solve(
            &start,
            &reference,
            self.config.speed_limit,
            state.warm_start.as_ref(),
            last_good,
        );

        let command = solution.actuation.to_command();
        let status = if solution.status.is_fallback() {
            TickStatus::SolverFallback
        } else if reused {
            TickStatus::ReusedReference
        } else {
            TickStatus::Optimal
        };

        let output = TickOutput {
            command,
            reference: reference.sample(self.config.reference.sample_step, self.config.reference.sample_extent),
            predicted: Path2D::from_xy(&solution.trajectory.xs(), &solution.trajectory.ys()),
            status,
        };

        let warm_start = if solution.status.is_fallback() {
            None
        } else {
            Some(solution.trajectory)
        };
        let next_state = ControllerState {
            last_command: Some(command),
            last_reference: Some(reference),
            warm_start,
        };

        (output, next_state)
    }
}

impl Controller for MpcController {
    type Input = Telemetry;
    type Output = TickOutput;
    type State = ControllerState;

    fn step(&self, input: &Telemetry, state: ControllerState) -> (TickOutput, ControllerState) {
        self.tick(input, state)
    }
}
