//! Controller configuration
//!
//! All tuning lives here: vehicle geometry, horizon, cost weights, actuator
//! bounds, solver budget and latency. The defaults match `config/mpc.toml`.
//! A configuration is validated once when the controller is built; nothing
//! is re-checked per tick.

use std::fs::read_to_string;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{MpcError, MpcResult};

/// Upper limit on display samples of the reference curve per tick
pub const MAX_REFERENCE_SAMPLES: usize = 1000;

/// Vehicle geometry and unit conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    /// Distance from centre of mass to front axle [m]
    pub lf: f64,
    /// Physical steering angle reached at a normalised command of 1 [deg]
    pub max_steer_deg: f64,
    /// Factor from the telemetry speed unit to m/s (mph by default)
    pub speed_to_mps: f64,
}

impl VehicleParams {
    /// Maximum steering angle [rad]
    pub fn max_steer(&self) -> f64 {
        self.max_steer_deg.to_radians()
    }
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            lf: 2.67,
            max_steer_deg: 25.0,
            speed_to_mps: 0.44704,
        }
    }
}

/// Prediction horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonParams {
    /// Number of predicted states N
    pub steps: usize,
    /// Time between predicted states [s]
    pub dt: f64,
    /// Reference speed the cost regulates towards [m/s]
    pub target_speed: f64,
}

impl Default for HorizonParams {
    fn default() -> Self {
        Self {
            steps: 10,
            dt: 0.1,
            target_speed: 20.0,
        }
    }
}

/// Cost weights, one per objective term
///
/// Only their ratios matter for the resulting behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub cte: f64,
    pub epsi: f64,
    pub speed: f64,
    pub steering: f64,
    pub throttle: f64,
    pub steering_rate: f64,
    pub throttle_rate: f64,
}

impl CostWeights {
    fn as_array(&self) -> [(&'static str, f64); 7] {
        [
            ("cte", self.cte),
            ("epsi", self.epsi),
            ("speed", self.speed),
            ("steering", self.steering),
            ("throttle", self.throttle),
            ("steering_rate", self.steering_rate),
            ("throttle_rate", self.throttle_rate),
        ]
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 2000.0,
            epsi: 2000.0,
            speed: 1.0,
            steering: 5.0,
            throttle: 5.0,
            steering_rate: 200.0,
            throttle_rate: 10.0,
        }
    }
}

/// Normalised actuator limits, enforced as hard bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorBounds {
    pub steering_min: f64,
    pub steering_max: f64,
    pub throttle_min: f64,
    pub throttle_max: f64,
}

impl ActuatorBounds {
    pub fn clamp_steering(&self, steering: f64) -> f64 {
        steering.clamp(self.steering_min, self.steering_max)
    }

    pub fn clamp_throttle(&self, throttle: f64) -> f64 {
        throttle.clamp(self.throttle_min, self.throttle_max)
    }

    pub fn contains(&self, steering: f64, throttle: f64) -> bool {
        (self.steering_min..=self.steering_max).contains(&steering)
            && (self.throttle_min..=self.throttle_max).contains(&throttle)
    }
}

impl Default for ActuatorBounds {
    fn default() -> Self {
        Self {
            steering_min: -1.0,
            steering_max: 1.0,
            throttle_min: -1.0,
            throttle_max: 1.0,
        }
    }
}

/// What to emit when the solver cannot deliver a feasible point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Zero steering and zero throttle
    Zero,
    /// Last successfully computed actuation (zero if there is none yet)
    HoldLast,
}

/// Solver budget and tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub max_iterations: usize,
    /// Wall-clock budget per solve [ms]
    pub max_solve_time_ms: u64,
    /// Relative cost decrease / projected gradient below which the solve stops
    pub tolerance: f64,
    /// Largest accepted equality-constraint residual
    pub constraint_tolerance: f64,
    /// Initial Levenberg-Marquardt damping
    pub initial_damping: f64,
    pub fallback: FallbackPolicy,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_solve_time_ms: 50,
            tolerance: 1e-8,
            constraint_tolerance: 1e-6,
            initial_damping: 1e-3,
            fallback: FallbackPolicy::HoldLast,
        }
    }
}

/// Reference curve fit and display sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceParams {
    pub degree: usize,
    /// Spacing of display samples [m]
    pub sample_step: f64,
    /// Furthest display sample ahead of the vehicle [m]
    pub sample_extent: f64,
}

impl Default for ReferenceParams {
    fn default() -> Self {
        Self {
            degree: 3,
            sample_step: 10.0,
            sample_extent: 100.0,
        }
    }
}

/// Actuation delay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyParams {
    /// Time between computing a command and it taking effect [s]
    pub delay: f64,
}

impl Default for LatencyParams {
    fn default() -> Self {
        Self { delay: 0.1 }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    pub vehicle: VehicleParams,
    pub horizon: HorizonParams,
    pub weights: CostWeights,
    pub bounds: ActuatorBounds,
    pub solver: SolverParams,
    pub reference: ReferenceParams,
    pub latency: LatencyParams,
    /// Upper cap on the regulated speed [m/s]
    pub speed_limit: f64,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            vehicle: VehicleParams::default(),
            horizon: HorizonParams::default(),
            weights: CostWeights::default(),
            bounds: ActuatorBounds::default(),
            solver: SolverParams::default(),
            reference: ReferenceParams::default(),
            latency: LatencyParams::default(),
            speed_limit: 20.0,
        }
    }
}

impl MpcConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml_str(s: &str) -> MpcResult<Self> {
        let config: MpcConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> MpcResult<Self> {
        let contents = read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Regulated speed: the target speed capped by the speed limit
    pub fn effective_target_speed(&self) -> f64 {
        self.horizon.target_speed.min(self.speed_limit)
    }

    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> MpcResult<()> {
        if self.horizon.steps < 2 {
            return Err(invalid(format!(
                "horizon length must be at least 2, got {}",
                self.horizon.steps
            )));
        }
        if !(self.horizon.dt > 0.0 && self.horizon.dt.is_finite()) {
            return Err(invalid(format!("horizon dt must be positive, got {}", self.horizon.dt)));
        }
        if !self.horizon.target_speed.is_finite() {
            return Err(invalid("target speed must be finite".to_string()));
        }
        if !(self.speed_limit >= 0.0 && self.speed_limit.is_finite()) {
            return Err(invalid(format!("speed limit must be non-negative, got {}", self.speed_limit)));
        }
        if !(self.vehicle.lf > 0.0 && self.vehicle.lf.is_finite()) {
            return Err(invalid(format!("lf must be positive, got {}", self.vehicle.lf)));
        }
        if !(self.vehicle.max_steer_deg > 0.0 && self.vehicle.max_steer_deg < 90.0) {
            return Err(invalid(format!(
                "max steering angle must be in (0, 90) degrees, got {}",
                self.vehicle.max_steer_deg
            )));
        }
        if !(self.vehicle.speed_to_mps > 0.0 && self.vehicle.speed_to_mps.is_finite()) {
            return Err(invalid("speed conversion factor must be positive".to_string()));
        }
        let b = &self.bounds;
        if !(b.steering_min < b.steering_max) || !b.steering_min.is_finite() || !b.steering_max.is_finite() {
            return Err(invalid(format!(
                "steering bounds [{}, {}] are inverted or degenerate",
                b.steering_min, b.steering_max
            )));
        }
        if !(b.throttle_min < b.throttle_max) || !b.throttle_min.is_finite() || !b.throttle_max.is_finite() {
            return Err(invalid(format!(
                "throttle bounds [{}, {}] are inverted or degenerate",
                b.throttle_min, b.throttle_max
            )));
        }
        for (name, w) in self.weights.as_array() {
            if !(w >= 0.0 && w.is_finite()) {
                return Err(invalid(format!("weight {} must be non-negative, got {}", name, w)));
            }
        }
        if self.solver.max_iterations == 0 {
            return Err(invalid("solver needs at least one iteration".to_string()));
        }
        if !(self.solver.tolerance > 0.0) || !(self.solver.constraint_tolerance > 0.0) {
            return Err(invalid("solver tolerances must be positive".to_string()));
        }
        if !(self.solver.initial_damping > 0.0) {
            return Err(invalid("initial damping must be positive".to_string()));
        }
        if self.reference.degree == 0 {
            return Err(invalid("reference polynomial degree must be at least 1".to_string()));
        }
        if !(self.reference.sample_step > 0.0) || !(self.reference.sample_extent >= 0.0) {
            return Err(invalid("reference sampling must use a positive step".to_string()));
        }
        let samples = self.reference.sample_extent / self.reference.sample_step;
        if !(samples < MAX_REFERENCE_SAMPLES as f64) {
            return Err(invalid(format!(
                "reference sampling yields {:.0} points per tick, limit is {}",
                samples.floor() + 1.0,
                MAX_REFERENCE_SAMPLES
            )));
        }
        if !(self.latency.delay >= 0.0 && self.latency.delay.is_finite()) {
            return Err(invalid(format!("latency must be non-negative, got {}", self.latency.delay)));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> MpcError {
    MpcError::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MpcConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.vehicle.max_steer() - 25.0_f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let mut config = MpcConfig::default();
        config.horizon.steps = 0;
        assert!(matches!(config.validate(), Err(MpcError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_positive_dt_rejected() {
        let mut config = MpcConfig::default();
        config.horizon.dt = 0.0;
        assert!(config.validate().is_err());
        config.horizon.dt = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = MpcConfig::default();
        config.bounds.steering_min = 1.0;
        config.bounds.steering_max = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = MpcConfig::default();
        config.weights.steering_rate = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbounded_reference_sampling_rejected() {
        let mut config = MpcConfig::default();
        config.reference.sample_extent = 1e12;
        assert!(matches!(config.validate(), Err(MpcError::InvalidConfig(_))));

        config.reference.sample_extent = 100.0;
        config.reference.sample_step = 1e-9;
        assert!(config.validate().is_err());

        config.reference.sample_step = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = MpcConfig::from_toml_str(
            r#"
            speed_limit = 15.0

            [horizon]
            steps = 8

            [solver]
            fallback = "zero"
            "#,
        )
        .unwrap();
        assert_eq!(config.horizon.steps, 8);
        assert!((config.horizon.dt - 0.1).abs() < 1e-12);
        assert_eq!(config.solver.fallback, FallbackPolicy::Zero);
        assert!((config.effective_target_speed() - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = MpcConfig::from_toml_str("[horizon]\nsteps = 1\n");
        assert!(matches!(result, Err(MpcError::InvalidConfig(_))));
        let result = MpcConfig::from_toml_str("horizon = ");
        assert!(matches!(result, Err(MpcError::InvalidConfig(_))));
    }

    #[test]
    fn test_bundled_config_file_matches_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/mpc.toml");
        let config = MpcConfig::load(path).unwrap();
        assert_eq!(config, MpcConfig::default());
    }
}
