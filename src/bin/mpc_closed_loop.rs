// Closed-loop MPC path tracking around an oval track.
//
// A simulated vehicle applies each command one tick late. Telemetry and
// replies go through the simulator frame codec, so the loop exercises the
// same path a live simulator bridge would.
//
// usage: mpc_closed_loop [config.toml]
use std::collections::VecDeque;
use std::f64::consts::PI;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use mpc_tracking::common::{Actuation, MpcError, MpcResult, Pose2D, Telemetry, TickStatus};
use mpc_tracking::config::MpcConfig;
use mpc_tracking::path_tracking::{ControllerState, MpcController};
use mpc_tracking::telemetry::{manual_frame, parse_frame, steer_frame, SimEvent};
use mpc_tracking::utils::visualization::{colors, PathStyle, PointStyle, Visualizer};

const TRACK_A: f64 = 120.0; // [m] semi-axis along x
const TRACK_B: f64 = 60.0; // [m] semi-axis along y
const TRACK_POINTS: usize = 120;
const WAYPOINT_NOISE: f64 = 0.2; // [m] std dev of surveyed waypoints
const WAYPOINTS_AHEAD: usize = 6;
const TICK: f64 = 0.1; // [s]
const COMMAND_DELAY_TICKS: usize = 1;
const SIM_TICKS: usize = 600;

struct SimulatedVehicle {
    x: f64,
    y: f64,
    yaw: f64,
    v: f64, // [m/s]
    lf: f64,
    max_steer: f64,
    pending: VecDeque<Actuation>,
    applied: Actuation,
}

impl SimulatedVehicle {
    fn new(pose: Pose2D, v: f64, config: &MpcConfig) -> Self {
        SimulatedVehicle {
            x: pose.x,
            y: pose.y,
            yaw: pose.yaw,
            v,
            lf: config.vehicle.lf,
            max_steer: config.vehicle.max_steer(),
            pending: VecDeque::new(),
            applied: Actuation::zero(),
        }
    }

    /// Queue a command and advance one tick with whatever is due now
    fn update(&mut self, command: Actuation, dt: f64) {
        self.pending.push_back(command);
        if self.pending.len() > COMMAND_DELAY_TICKS {
            if let Some(due) = self.pending.pop_front() {
                self.applied = due;
            }
        }
        // actuator convention: positive steering turns right
        let delta = -self.applied.steering * self.max_steer;
        self.x += self.v * self.yaw.cos() * dt;
        self.y += self.v * self.yaw.sin() * dt;
        self.yaw += self.v / self.lf * delta * dt;
        self.v = (self.v + self.applied.throttle * dt).max(0.0);
    }
}

fn oval_track() -> (Vec<f64>, Vec<f64>) {
    (0..TRACK_POINTS)
        .map(|i| {
            let t = 2.0 * PI * i as f64 / TRACK_POINTS as f64;
            (TRACK_A * t.cos(), TRACK_B * t.sin())
        })
        .unzip()
}

fn nearest_index(xs: &[f64], ys: &[f64], x: f64, y: f64) -> usize {
    let mut best = 0;
    let mut d_min = f64::MAX;
    for (i, (px, py)) in xs.iter().zip(ys.iter()).enumerate() {
        let d = (px - x).hypot(py - y);
        if d < d_min {
            d_min = d;
            best = i;
        }
    }
    best
}

/// Waypoints starting at the nearest one in front of the vehicle
fn waypoints_ahead(xs: &[f64], ys: &[f64], vehicle: &SimulatedVehicle) -> (Vec<f64>, Vec<f64>) {
    let mut start = nearest_index(xs, ys, vehicle.x, vehicle.y);
    let ahead = (xs[start] - vehicle.x) * vehicle.yaw.cos() + (ys[start] - vehicle.y) * vehicle.yaw.sin();
    if ahead < 0.0 {
        start = (start + 1) % xs.len();
    }
    (0..WAYPOINTS_AHEAD)
        .map(|k| {
            let i = (start + k) % xs.len();
            (xs[i], ys[i])
        })
        .unzip()
}

/// Distance from the vehicle to the closest point of the true track
fn track_error(x: f64, y: f64) -> f64 {
    let samples = 3600;
    (0..samples)
        .map(|i| {
            let t = 2.0 * PI * i as f64 / samples as f64;
            (TRACK_A * t.cos() - x).hypot(TRACK_B * t.sin() - y)
        })
        .fold(f64::MAX, f64::min)
}

fn telemetry_frame(telemetry: &Telemetry) -> MpcResult<String> {
    Ok(format!("42{}", serde_json::to_string(&("telemetry", telemetry))?))
}

fn run(config: MpcConfig) -> MpcResult<()> {
    let controller = MpcController::new(config)?;
    let config = controller.config();

    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0, WAYPOINT_NOISE).map_err(|e| MpcError::InvalidInput(e.to_string()))?;
    let (track_x, track_y) = oval_track();
    let way_x: Vec<f64> = track_x.iter().map(|x| x + noise.sample(&mut rng)).collect();
    let way_y: Vec<f64> = track_y.iter().map(|y| y + noise.sample(&mut rng)).collect();

    let mut vehicle = SimulatedVehicle::new(Pose2D::new(TRACK_A + 1.0, 0.0, PI / 2.0), 5.0, config);
    let mut state = ControllerState::default();
    let mut driven_x = vec![vehicle.x];
    let mut driven_y = vec![vehicle.y];
    let mut errors = Vec::with_capacity(SIM_TICKS);
    let mut last_tick = None;
    let mut degraded = 0;

    for tick in 0..SIM_TICKS {
        let (ptsx, ptsy) = waypoints_ahead(&way_x, &way_y, &vehicle);
        let telemetry = Telemetry {
            ptsx,
            ptsy,
            x: vehicle.x,
            y: vehicle.y,
            psi: vehicle.yaw,
            speed: vehicle.v / config.vehicle.speed_to_mps,
            steering_angle: vehicle.applied.steering,
            throttle: vehicle.applied.throttle,
        };

        let command = match parse_frame(&telemetry_frame(&telemetry)?)? {
            Some(SimEvent::Telemetry(received)) => {
                let pose = received.pose();
                let (output, next) = controller.tick(&received, state);
                state = next;
                if output.status != TickStatus::Optimal {
                    degraded += 1;
                    warn!("tick {}: {:?}", tick, output.status);
                }
                let reply = steer_frame(&output)?;
                debug!("tick {}: reply {} bytes", tick, reply.len());
                let command = output.command;
                last_tick = Some((output, pose));
                command
            }
            _ => {
                debug!("tick {}: {}", tick, manual_frame());
                Actuation::zero()
            }
        };

        vehicle.update(command, TICK);
        driven_x.push(vehicle.x);
        driven_y.push(vehicle.y);
        errors.push(track_error(vehicle.x, vehicle.y));

        if tick % 50 == 0 {
            info!(
                "tick {:4}: x {:7.2} y {:7.2} v {:5.2} m/s steer {:+.3} throttle {:+.3}",
                tick, vehicle.x, vehicle.y, vehicle.v, command.steering, command.throttle
            );
        }
    }

    let mean_error = errors.iter().sum::<f64>() / errors.len() as f64;
    let max_error = errors.iter().cloned().fold(0.0, f64::max);
    println!(
        "{} ticks, mean |cte| {:.3} m, max |cte| {:.3} m, degraded ticks {}",
        SIM_TICKS, mean_error, max_error, degraded
    );

    let mut closed_x = track_x.clone();
    let mut closed_y = track_y.clone();
    closed_x.push(track_x[0]);
    closed_y.push(track_y[0]);

    let mut vis = Visualizer::new();
    vis.set_title("MPC path tracking");
    vis.plot_path_xy(&closed_x, &closed_y, &PathStyle::new(colors::TRACK, "Track").with_line_width(1.0));
    vis.plot_points_xy(&way_x, &way_y, &PointStyle::new(colors::WAYPOINT, "Waypoints").with_size(0.5));
    vis.plot_path_xy(&driven_x, &driven_y, &PathStyle::new(colors::DRIVEN, "Driven"));
    if let Some((output, pose)) = &last_tick {
        vis.plot_tick(output, pose)?;
    }

    std::fs::create_dir_all("img/path_tracking")?;
    vis.save_svg("img/path_tracking/mpc_closed_loop.svg", 1000, 600)?;
    println!("Plot saved to img/path_tracking/mpc_closed_loop.svg");
    Ok(())
}

fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => MpcConfig::load(&path),
        None => Ok(MpcConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        error!("{}", e);
        std::process::exit(1);
    }
}
