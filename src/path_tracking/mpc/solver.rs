//! Constrained horizon optimisation
//!
//! The dynamics equalities are eliminated by shooting: every iterate is the
//! model rolled out from the start state, so it satisfies them exactly. What
//! remains is a box-constrained nonlinear least-squares problem in the N-1
//! actuations, solved with projected Levenberg-Marquardt steps. Iterates are
//! clipped into the actuator box, so bounds hold exactly.
//!
//! The solve is capped both by iteration count and by wall-clock time. Running
//! out of time, or ending on a point that fails the feasibility check, yields
//! the configured fallback actuation instead of an optimiser result.

use std::time::{Duration, Instant};

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;

use crate::common::{Actuation, VehicleState, ACTUATION_DIM};
use crate::config::{FallbackPolicy, MpcConfig};
use crate::path_tracking::kinematic_model::KinematicBicycle;
use crate::path_tracking::mpc::problem::{HorizonProblem, HorizonTrajectory};
use crate::path_tracking::reference::ReferencePolynomial;

const FD_STEP: f64 = 1e-6;
const MAX_DAMPING: f64 = 1e12;

/// Why a solve gave up on the optimiser result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Wall-clock budget exhausted
    Timeout,
    /// Start state or reference contained NaN / infinity
    NonFiniteInput,
    /// Final point failed the constraint check
    Infeasible,
}

/// Outcome of a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Stationary point found within the budget
    Converged,
    /// Iteration cap hit; best point so far returned
    IterationLimit,
    /// No descent step found even at maximum damping; best point so far returned
    Stalled,
    Fallback(FallbackReason),
}

impl SolveStatus {
    pub fn is_fallback(&self) -> bool {
        matches!(self, SolveStatus::Fallback(_))
    }
}

/// First actuation to apply and the predicted horizon behind it
#[derive(Debug, Clone, PartialEq)]
pub struct MpcSolution {
    /// Optimiser convention (positive steering turns left)
    pub actuation: Actuation,
    /// Empty when the solve fell back
    pub trajectory: HorizonTrajectory,
    pub cost: f64,
    pub iterations: usize,
    pub status: SolveStatus,
}

/// Horizon MPC solver
#[derive(Debug, Clone)]
pub struct MpcSolver {
    config: MpcConfig,
}

impl MpcSolver {
    /// The configuration is expected to be validated already
    pub fn new(config: &MpcConfig) -> Self {
        MpcSolver { config: config.clone() }
    }

    /// Solve one horizon starting from `state`
    ///
    /// `warm_start` is the previous tick's trajectory, reused shifted by one
    /// step when its length matches. `last_good` is the last successfully
    /// computed actuation, used by `FallbackPolicy::HoldLast`.
    pub fn solve(
        &self,
        state: &VehicleState,
        reference: &ReferencePolynomial,
        speed_limit: f64,
        warm_start: Option<&HorizonTrajectory>,
        last_good: Option<Actuation>,
    ) -> MpcSolution {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.solver.max_solve_time_ms);

        if !state.is_finite() || !reference.is_finite() || !speed_limit.is_finite() {
            return self.fallback(FallbackReason::NonFiniteInput, last_good, 0);
        }

        let model = KinematicBicycle::new(&self.config.vehicle, reference);
        let target_speed = self.config.horizon.target_speed.min(speed_limit);
        let problem = HorizonProblem::new(
            model,
            *state,
            self.config.horizon.steps,
            self.config.horizon.dt,
            target_speed,
            &self.config.weights,
            &self.config.bounds,
        );

        let mut actuations = self.initial_guess(&problem, warm_start);
        let mut z = problem.rollout(&actuations);
        let mut residuals = problem.residuals(&z);
        let mut cost = residuals.norm_squared();

        let mut best_cost = OrderedFloat(cost);
        let mut best = actuations.clone();

        let params = &self.config.solver;
        let mut damping = params.initial_damping;
        let mut iterations = 0;
        let mut status = SolveStatus::IterationLimit;

        while iterations < params.max_iterations {
            if Instant::now() >= deadline {
                return self.fallback(FallbackReason::Timeout, last_good, iterations);
            }
            iterations += 1;

            let jacobian = self.jacobian(&problem, &actuations);
            let gradient = jacobian.transpose() * &residuals;

            if projected_gradient_norm(&problem, &actuations, &gradient) < params.tolerance {
                status = SolveStatus::Converged;
                break;
            }

            let mut normal = jacobian.transpose() * &jacobian;
            for i in 0..normal.nrows() {
                let diag = normal[(i, i)];
                normal[(i, i)] = diag + damping * (1.0 + diag);
            }

            let step = match normal.cholesky() {
                Some(chol) => chol.solve(&(-&gradient)),
                None => match increase_damping(damping) {
                    Some(next) => {
                        damping = next;
                        continue;
                    }
                    None => {
                        status = SolveStatus::Stalled;
                        break;
                    }
                },
            };

            let mut candidate = apply_step(&actuations, &step);
            problem.clamp_actuations(&mut candidate);
            let candidate_z = problem.rollout(&candidate);
            let candidate_residuals = problem.residuals(&candidate_z);
            let candidate_cost = candidate_residuals.norm_squared();

            if OrderedFloat(candidate_cost) < OrderedFloat(cost) {
                let decrease = cost - candidate_cost;
                actuations = candidate;
                z = candidate_z;
                residuals = candidate_residuals;
                cost = candidate_cost;
                damping = (damping * 0.1).max(1e-12);

                if OrderedFloat(cost) < best_cost {
                    best_cost = OrderedFloat(cost);
                    best = actuations.clone();
                }
                if decrease <= params.tolerance * (1.0 + cost) {
                    status = SolveStatus::Converged;
                    break;
                }
            } else {
                match increase_damping(damping) {
                    Some(next) => damping = next,
                    None => {
                        status = SolveStatus::Stalled;
                        break;
                    }
                }
            }
        }

        if actuations != best {
            z = problem.rollout(&best);
        }
        let violation = problem.constraint_violation(&z);
        if !(violation <= params.constraint_tolerance) {
            warn!("MPC solution failed constraint check (violation {:e})", violation);
            return self.fallback(FallbackReason::Infeasible, last_good, iterations);
        }

        let trajectory = problem.trajectory(&z);
        let actuation = trajectory.actuations[0];
        debug!(
            "MPC solve: {:?} after {} iterations in {:?}, cost {:.4}, steer {:.4}, throttle {:.4}",
            status,
            iterations,
            started.elapsed(),
            best_cost.into_inner(),
            actuation.steering,
            actuation.throttle
        );

        MpcSolution {
            actuation,
            trajectory,
            cost: best_cost.into_inner(),
            iterations,
            status,
        }
    }

    /// Shifted previous solution if usable, otherwise zero actuation
    fn initial_guess(&self, problem: &HorizonProblem, warm_start: Option<&HorizonTrajectory>) -> Vec<Actuation> {
        let m = problem.num_actuations();
        let mut guess = match warm_start.map(|t| t.shifted_actuations()) {
            Some(shifted) if shifted.len() == m && shifted.iter().all(|a| a.is_finite()) => shifted,
            _ => vec![Actuation::zero(); m],
        };
        problem.clamp_actuations(&mut guess);
        guess
    }

    /// Central-difference Jacobian of the residuals with respect to the actuations
    fn jacobian(&self, problem: &HorizonProblem, actuations: &[Actuation]) -> DMatrix<f64> {
        let n = ACTUATION_DIM * actuations.len();
        let base = problem.residuals(&problem.rollout(actuations));
        let mut jacobian = DMatrix::zeros(base.len(), n);
        let mut perturbed = actuations.to_vec();

        for k in 0..actuations.len() {
            for component in 0..ACTUATION_DIM {
                let original = get_component(&actuations[k], component);

                set_component(&mut perturbed[k], component, original + FD_STEP);
                let plus = problem.residuals(&problem.rollout(&perturbed));
                set_component(&mut perturbed[k], component, original - FD_STEP);
                let minus = problem.residuals(&problem.rollout(&perturbed));
                set_component(&mut perturbed[k], component, original);

                let column = (plus - minus) / (2.0 * FD_STEP);
                jacobian.set_column(k * ACTUATION_DIM + component, &column);
            }
        }
        jacobian
    }

    fn fallback(&self, reason: FallbackReason, last_good: Option<Actuation>, iterations: usize) -> MpcSolution {
        let actuation = match self.config.solver.fallback {
            FallbackPolicy::Zero => Actuation::zero(),
            FallbackPolicy::HoldLast => last_good
                .filter(|a| a.is_finite())
                .map(|a| Actuation::new(
                    self.config.bounds.clamp_steering(a.steering),
                    self.config.bounds.clamp_throttle(a.throttle),
                ))
                .unwrap_or_else(Actuation::zero),
        };
        warn!("MPC solve fell back ({:?}), emitting {:?}", reason, actuation);
        MpcSolution {
            actuation,
            trajectory: HorizonTrajectory::default(),
            cost: f64::INFINITY,
            iterations,
            status: SolveStatus::Fallback(reason),
        }
    }
}

/// Next damping after a rejected step, None once it exceeds `MAX_DAMPING`
fn increase_damping(damping: f64) -> Option<f64> {
    let next = damping * 10.0;
    (next <= MAX_DAMPING).then_some(next)
}

fn get_component(act: &Actuation, component: usize) -> f64 {
    if component == 0 { act.steering } else { act.throttle }
}

fn set_component(act: &mut Actuation, component: usize, value: f64) {
    if component == 0 {
        act.steering = value;
    } else {
        act.throttle = value;
    }
}

fn apply_step(actuations: &[Actuation], step: &DVector<f64>) -> Vec<Actuation> {
    actuations
        .iter()
        .enumerate()
        .map(|(k, a)| Actuation::new(
            a.steering + step[k * ACTUATION_DIM],
            a.throttle + step[k * ACTUATION_DIM + 1],
        ))
        .collect()
}

/// Size of the gradient step that survives projection onto the actuator box
fn projected_gradient_norm(problem: &HorizonProblem, actuations: &[Actuation], gradient: &DVector<f64>) -> f64 {
    let bounds = problem.bounds();
    actuations
        .iter()
        .enumerate()
        .map(|(k, a)| {
            let steer = a.steering - bounds.clamp_steering(a.steering - gradient[k * ACTUATION_DIM]);
            let throttle = a.throttle - bounds.clamp_throttle(a.throttle - gradient[k * ACTUATION_DIM + 1]);
            steer.abs().max(throttle.abs())
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config() -> MpcConfig {
        let mut config = MpcConfig::default();
        config.horizon.target_speed = 10.0;
        config.speed_limit = 10.0;
        config.solver.max_solve_time_ms = 10_000;
        config
    }

    #[test]
    fn test_equilibrium_gives_zero_actuation() {
        let solver = MpcSolver::new(&config());
        let reference = ReferencePolynomial::new(vec![0.0, 0.0, 0.0, 0.0]);
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let solution = solver.solve(&state, &reference, 10.0, None, None);

        assert_eq!(solution.status, SolveStatus::Converged);
        assert!(solution.actuation.steering.abs() < 1e-9);
        assert!(solution.actuation.throttle.abs() < 1e-9);
        assert_eq!(solution.trajectory.len(), 10);
        assert_eq!(solution.trajectory.actuations.len(), 9);
    }

    #[test]
    fn test_left_curve_steers_left() {
        let solver = MpcSolver::new(&config());
        let reference = ReferencePolynomial::new(vec![0.0, 0.0, 0.02, 0.0]);
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let solution = solver.solve(&state, &reference, 10.0, None, None);

        assert!(!solution.status.is_fallback());
        assert!(solution.actuation.steering > 1e-3);
    }

    #[test]
    fn test_slow_vehicle_accelerates() {
        let solver = MpcSolver::new(&config());
        let reference = ReferencePolynomial::new(vec![0.0, 0.0]);
        let state = VehicleState::new(0.0, 0.0, 0.0, 2.0, 0.0, 0.0);
        let solution = solver.solve(&state, &reference, 10.0, None, None);
        assert!(solution.actuation.throttle > 0.1);
    }

    #[test]
    fn test_speed_limit_caps_target() {
        let solver = MpcSolver::new(&config());
        let reference = ReferencePolynomial::new(vec![0.0, 0.0]);
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let solution = solver.solve(&state, &reference, 4.0, None, None);
        assert!(solution.actuation.throttle < -0.1);
    }

    #[test]
    fn test_actuations_within_bounds_for_random_states() {
        let mut cfg = config();
        cfg.horizon.steps = 6;
        cfg.solver.max_iterations = 15;
        let solver = MpcSolver::new(&cfg);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..25 {
            let reference = ReferencePolynomial::new(vec![
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.001..0.001),
            ]);
            let model = KinematicBicycle::new(&cfg.vehicle, &reference);
            let speed = rng.gen_range(0.0..30.0);
            let (cte, epsi) = model.tracking_errors(0.0, 0.0, 0.0);
            let state = VehicleState::new(0.0, 0.0, 0.0, speed, cte, epsi);

            let solution = solver.solve(&state, &reference, 20.0, None, None);
            assert!(cfg.bounds.contains(solution.actuation.steering, solution.actuation.throttle));
            for act in &solution.trajectory.actuations {
                assert!(cfg.bounds.contains(act.steering, act.throttle));
            }
        }
    }

    #[test]
    fn test_solution_satisfies_dynamics() {
        let cfg = config();
        let solver = MpcSolver::new(&cfg);
        let reference = ReferencePolynomial::new(vec![1.0, 0.1, -0.01, 0.0001]);
        let model = KinematicBicycle::new(&cfg.vehicle, &reference);
        let (cte, epsi) = model.tracking_errors(0.0, 0.0, 0.0);
        let state = VehicleState::new(0.0, 0.0, 0.0, 8.0, cte, epsi);
        let solution = solver.solve(&state, &reference, 10.0, None, None);

        let traj = &solution.trajectory;
        assert_eq!(traj.states[0], state);
        for k in 0..traj.actuations.len() {
            let next = model.step(&traj.states[k], &traj.actuations[k], cfg.horizon.dt);
            assert!((next.to_vector() - traj.states[k + 1].to_vector()).amax() < 1e-9);
        }
    }

    #[test]
    fn test_warm_start_does_not_worsen_cost() {
        let solver = MpcSolver::new(&config());
        let reference = ReferencePolynomial::new(vec![0.5, 0.05, 0.005, 0.0]);
        let model = KinematicBicycle::new(&config().vehicle, &reference);
        let (cte, epsi) = model.tracking_errors(0.0, 0.0, 0.0);
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, cte, epsi);

        let cold = solver.solve(&state, &reference, 10.0, None, None);
        let warm = solver.solve(&state, &reference, 10.0, Some(&cold.trajectory), None);
        assert!(!warm.status.is_fallback());
        assert!(warm.cost.is_finite());
    }

    #[test]
    fn test_damping_growth_is_capped() {
        assert_eq!(increase_damping(1e-3), Some(1e-2));
        assert_eq!(increase_damping(MAX_DAMPING / 10.0), Some(MAX_DAMPING));
        assert_eq!(increase_damping(MAX_DAMPING), None);
    }

    #[test]
    fn test_unreachable_tolerance_not_reported_as_converged() {
        let mut cfg = config();
        cfg.solver.tolerance = 1e-300;
        cfg.solver.max_iterations = 2000;
        let solver = MpcSolver::new(&cfg);
        let reference = ReferencePolynomial::new(vec![0.0, 0.0, 0.02, 0.0]);
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let solution = solver.solve(&state, &reference, 10.0, None, None);

        assert!(matches!(solution.status, SolveStatus::Stalled | SolveStatus::IterationLimit));
        assert!(solution.cost.is_finite());
        assert!(cfg.bounds.contains(solution.actuation.steering, solution.actuation.throttle));
    }

    #[test]
    fn test_timeout_falls_back_to_last_actuation() {
        let mut cfg = config();
        cfg.solver.max_solve_time_ms = 0;
        let solver = MpcSolver::new(&cfg);
        let reference = ReferencePolynomial::new(vec![0.0, 0.0, 0.02]);
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let last = Actuation::new(0.25, -0.1);
        let solution = solver.solve(&state, &reference, 10.0, None, Some(last));

        assert_eq!(solution.status, SolveStatus::Fallback(FallbackReason::Timeout));
        assert_eq!(solution.actuation, last);
        assert!(solution.trajectory.is_empty());
    }

    #[test]
    fn test_non_finite_state_falls_back_to_zero() {
        let mut cfg = config();
        cfg.solver.fallback = FallbackPolicy::Zero;
        let solver = MpcSolver::new(&cfg);
        let reference = ReferencePolynomial::new(vec![0.0, 0.0]);
        let state = VehicleState::new(0.0, 0.0, 0.0, f64::NAN, 0.0, 0.0);
        let solution = solver.solve(&state, &reference, 10.0, None, Some(Actuation::new(0.5, 0.5)));

        assert_eq!(solution.status, SolveStatus::Fallback(FallbackReason::NonFiniteInput));
        assert_eq!(solution.actuation, Actuation::zero());
    }

    #[test]
    fn test_hold_last_without_history_is_zero() {
        let mut cfg = config();
        cfg.solver.max_solve_time_ms = 0;
        let solver = MpcSolver::new(&cfg);
        let reference = ReferencePolynomial::new(vec![0.0, 0.0]);
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let solution = solver.solve(&state, &reference, 10.0, None, None);
        assert_eq!(solution.actuation, Actuation::zero());
    }
}
