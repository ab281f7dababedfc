//! Finite-horizon tracking problem
//!
//! Decision vector layout for N states and N-1 actuations:
//!
//! ```text
//! [ x_0..x_{N-1} | y_.. | psi_.. | v_.. | cte_.. | epsi_.. | delta_0..delta_{N-2} | a_.. ]
//! ```
//!
//! Equality constraints: the first state equals the projected start state,
//! and every later state equals the model applied to its predecessor.
//! Actuations are boxed by the actuator bounds. The objective is a weighted sum
//! of squares, so it is exposed both as a scalar and as its residual vector.

use itertools::Itertools;
use nalgebra::DVector;

use crate::common::{Actuation, MotionModel, VehicleState, ACTUATION_DIM, STATE_DIM};
use crate::config::{ActuatorBounds, CostWeights};
use crate::path_tracking::kinematic_model::KinematicBicycle;

/// Decision variables of one solve: N states and N-1 actuations
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HorizonTrajectory {
    pub states: Vec<VehicleState>,
    pub actuations: Vec<Actuation>,
}

impl HorizonTrajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.x).collect()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.y).collect()
    }

    /// Actuations advanced by one step, last one repeated
    pub fn shifted_actuations(&self) -> Vec<Actuation> {
        match self.actuations.split_first() {
            Some((_, rest)) => {
                let mut shifted = rest.to_vec();
                if let Some(last) = self.actuations.last() {
                    shifted.push(*last);
                }
                shifted
            }
            None => Vec::new(),
        }
    }
}

/// Objective and constraints for one horizon
pub struct HorizonProblem<'a> {
    model: KinematicBicycle<'a>,
    initial: VehicleState,
    steps: usize,
    dt: f64,
    target_speed: f64,
    weights: CostWeights,
    bounds: ActuatorBounds,
}

impl<'a> HorizonProblem<'a> {
    pub fn new(
        model: KinematicBicycle<'a>,
        initial: VehicleState,
        steps: usize,
        dt: f64,
        target_speed: f64,
        weights: &CostWeights,
        bounds: &ActuatorBounds,
    ) -> Self {
        HorizonProblem {
            model,
            initial,
            steps,
            dt,
            target_speed,
            weights: weights.clone(),
            bounds: bounds.clone(),
        }
    }

    pub fn num_actuations(&self) -> usize {
        self.steps - 1
    }

    pub fn num_variables(&self) -> usize {
        STATE_DIM * self.steps + ACTUATION_DIM * self.num_actuations()
    }

    pub fn num_constraints(&self) -> usize {
        STATE_DIM * self.steps
    }

    pub fn bounds(&self) -> &ActuatorBounds {
        &self.bounds
    }

    fn state_offset(&self, component: usize) -> usize {
        component * self.steps
    }

    fn actuation_offset(&self, component: usize) -> usize {
        STATE_DIM * self.steps + component * self.num_actuations()
    }

    pub fn state_at(&self, z: &DVector<f64>, k: usize) -> VehicleState {
        VehicleState::new(
            z[self.state_offset(0) + k],
            z[self.state_offset(1) + k],
            z[self.state_offset(2) + k],
            z[self.state_offset(3) + k],
            z[self.state_offset(4) + k],
            z[self.state_offset(5) + k],
        )
    }

    pub fn actuation_at(&self, z: &DVector<f64>, k: usize) -> Actuation {
        Actuation::new(z[self.actuation_offset(0) + k], z[self.actuation_offset(1) + k])
    }

    fn set_state(&self, z: &mut DVector<f64>, k: usize, state: &VehicleState) {
        for (component, value) in state.to_vector().iter().enumerate() {
            z[self.state_offset(component) + k] = *value;
        }
    }

    fn set_actuation(&self, z: &mut DVector<f64>, k: usize, actuation: &Actuation) {
        z[self.actuation_offset(0) + k] = actuation.steering;
        z[self.actuation_offset(1) + k] = actuation.throttle;
    }

    /// Lower and upper bound of every decision variable
    ///
    /// States are free; actuations are boxed.
    pub fn variable_bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let n = self.num_variables();
        let mut lower = DVector::from_element(n, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(n, f64::INFINITY);
        for k in 0..self.num_actuations() {
            lower[self.actuation_offset(0) + k] = self.bounds.steering_min;
            upper[self.actuation_offset(0) + k] = self.bounds.steering_max;
            lower[self.actuation_offset(1) + k] = self.bounds.throttle_min;
            upper[self.actuation_offset(1) + k] = self.bounds.throttle_max;
        }
        (lower, upper)
    }

    /// Clip actuations into the actuator box
    pub fn clamp_actuations(&self, actuations: &mut [Actuation]) {
        for act in actuations.iter_mut() {
            act.steering = self.bounds.clamp_steering(act.steering);
            act.throttle = self.bounds.clamp_throttle(act.throttle);
        }
    }

    /// Decision vector that satisfies every equality constraint by construction
    ///
    /// States are the model rolled out from the initial state under
    /// `actuations` (N-1 entries).
    pub fn rollout(&self, actuations: &[Actuation]) -> DVector<f64> {
        debug_assert_eq!(actuations.len(), self.num_actuations());
        let mut z = DVector::zeros(self.num_variables());
        let mut state = self.initial;
        self.set_state(&mut z, 0, &state);
        for (k, act) in actuations.iter().enumerate() {
            self.set_actuation(&mut z, k, act);
            state = self.model.propagate(&state, act, self.dt);
            self.set_state(&mut z, k + 1, &state);
        }
        z
    }

    /// Equality-constraint residuals g(z), zero when feasible
    pub fn constraints(&self, z: &DVector<f64>) -> DVector<f64> {
        let mut g = DVector::zeros(self.num_constraints());
        let first = self.state_at(z, 0).to_vector() - self.initial.to_vector();
        for (component, value) in first.iter().enumerate() {
            g[self.state_offset(component)] = *value;
        }
        for k in 0..self.num_actuations() {
            let predicted = self.model.propagate(&self.state_at(z, k), &self.actuation_at(z, k), self.dt);
            let gap = self.state_at(z, k + 1).to_vector() - predicted.to_vector();
            for (component, value) in gap.iter().enumerate() {
                g[self.state_offset(component) + k + 1] = *value;
            }
        }
        g
    }

    /// Largest equality residual or bound excess; infinite if anything is non-finite
    pub fn constraint_violation(&self, z: &DVector<f64>) -> f64 {
        if z.iter().any(|v| !v.is_finite()) {
            return f64::INFINITY;
        }
        let (lower, upper) = self.variable_bounds();
        let bound_excess = z
            .iter()
            .zip(lower.iter().zip(upper.iter()))
            .map(|(v, (lo, hi))| (lo - v).max(v - hi).max(0.0))
            .fold(0.0, f64::max);
        let g = self.constraints(z);
        if g.iter().any(|v| !v.is_finite()) {
            return f64::INFINITY;
        }
        bound_excess.max(g.amax())
    }

    /// Weighted residuals r(z) with cost(z) = |r(z)|^2
    pub fn residuals(&self, z: &DVector<f64>) -> DVector<f64> {
        let w = &self.weights;
        let (w_cte, w_epsi, w_v) = (w.cte.sqrt(), w.epsi.sqrt(), w.speed.sqrt());
        let (w_d, w_a) = (w.steering.sqrt(), w.throttle.sqrt());
        let (w_dd, w_da) = (w.steering_rate.sqrt(), w.throttle_rate.sqrt());

        let m = self.num_actuations();
        let mut r = Vec::with_capacity(3 * self.steps + 2 * m + 2 * m.saturating_sub(1));

        for k in 0..self.steps {
            let s = self.state_at(z, k);
            r.push(w_cte * s.cte);
            r.push(w_epsi * s.epsi);
            r.push(w_v * (s.v - self.target_speed));
        }

        let actuations: Vec<Actuation> = (0..m).map(|k| self.actuation_at(z, k)).collect();
        for act in &actuations {
            r.push(w_d * act.steering);
            r.push(w_a * act.throttle);
        }
        for (prev, next) in actuations.iter().tuple_windows() {
            r.push(w_dd * (next.steering - prev.steering));
            r.push(w_da * (next.throttle - prev.throttle));
        }

        DVector::from_vec(r)
    }

    /// Scalar objective
    pub fn cost(&self, z: &DVector<f64>) -> f64 {
        self.residuals(z).norm_squared()
    }

    /// Unpack a decision vector
    pub fn trajectory(&self, z: &DVector<f64>) -> HorizonTrajectory {
        HorizonTrajectory {
            states: (0..self.steps).map(|k| self.state_at(z, k)).collect(),
            actuations: (0..self.num_actuations()).map(|k| self.actuation_at(z, k)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleParams;
    use crate::path_tracking::reference::ReferencePolynomial;

    fn problem<'a>(reference: &'a ReferencePolynomial, initial: VehicleState, steps: usize) -> HorizonProblem<'a> {
        let model = KinematicBicycle::new(&VehicleParams::default(), reference);
        HorizonProblem::new(
            model,
            initial,
            steps,
            0.1,
            10.0,
            &CostWeights::default(),
            &ActuatorBounds::default(),
        )
    }

    #[test]
    fn test_layout_sizes() {
        let reference = ReferencePolynomial::new(vec![0.0]);
        let p = problem(&reference, VehicleState::default(), 10);
        assert_eq!(p.num_variables(), 6 * 10 + 2 * 9);
        assert_eq!(p.num_constraints(), 60);
        let (lower, upper) = p.variable_bounds();
        assert_eq!(lower[0], f64::NEG_INFINITY);
        assert_eq!(lower[60], -1.0);
        assert_eq!(upper[77], 1.0);
    }

    #[test]
    fn test_rollout_is_feasible() {
        let reference = ReferencePolynomial::new(vec![0.2, 0.05, 0.01, -0.0005]);
        let initial = VehicleState::new(1.0, 0.0, 0.0, 12.0, -0.25, -0.05);
        let p = problem(&reference, initial, 8);
        let acts: Vec<Actuation> = (0..7).map(|k| Actuation::new(0.1 * k as f64 - 0.3, 0.2)).collect();
        let z = p.rollout(&acts);

        assert!(p.constraint_violation(&z) < 1e-12);
        assert_eq!(p.state_at(&z, 0), initial);
        assert_eq!(p.actuation_at(&z, 3), acts[3]);
    }

    #[test]
    fn test_perturbed_state_violates_dynamics() {
        let reference = ReferencePolynomial::new(vec![0.0, 0.0]);
        let p = problem(&reference, VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0), 5);
        let mut z = p.rollout(&[Actuation::zero(); 4]);
        z[p.state_offset(1) + 2] += 0.5;
        assert!((p.constraint_violation(&z) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_bounds_actuation_reported() {
        let reference = ReferencePolynomial::new(vec![0.0, 0.0]);
        let p = problem(&reference, VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0), 3);
        let z = p.rollout(&[Actuation::new(1.5, 0.0), Actuation::zero()]);
        assert!((p.constraint_violation(&z) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_equilibrium_has_zero_cost() {
        let reference = ReferencePolynomial::new(vec![0.0, 0.0, 0.0, 0.0]);
        let p = problem(&reference, VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0), 10);
        let z = p.rollout(&[Actuation::zero(); 9]);
        assert!(p.cost(&z).abs() < 1e-20);
    }

    #[test]
    fn test_cost_terms_weighted_individually() {
        let reference = ReferencePolynomial::new(vec![0.0, 0.0]);
        let weights = CostWeights {
            cte: 0.0,
            epsi: 0.0,
            speed: 0.0,
            steering: 0.0,
            throttle: 0.0,
            steering_rate: 3.0,
            throttle_rate: 0.0,
        };
        let model = KinematicBicycle::new(&VehicleParams::default(), &reference);
        let p = HorizonProblem::new(
            model,
            VehicleState::default(),
            3,
            0.1,
            0.0,
            &weights,
            &ActuatorBounds::default(),
        );
        // only the steering change 0.2 -> -0.3 is penalised
        let z = p.rollout(&[Actuation::new(0.2, 0.9), Actuation::new(-0.3, -0.9)]);
        assert!((p.cost(&z) - 3.0 * 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_shifted_actuations() {
        let traj = HorizonTrajectory {
            states: vec![VehicleState::default(); 4],
            actuations: vec![
                Actuation::new(0.1, 0.0),
                Actuation::new(0.2, 0.0),
                Actuation::new(0.3, 0.0),
            ],
        };
        let shifted = traj.shifted_actuations();
        assert_eq!(shifted.len(), 3);
        assert_eq!(shifted[0].steering, 0.2);
        assert_eq!(shifted[2].steering, 0.3);
    }
}
