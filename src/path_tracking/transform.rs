//! World frame <-> vehicle frame conversion for waypoints
//!
//! In the vehicle frame the vehicle sits at the origin with its heading along
//! +x and +y to its left.

use nalgebra::{Isometry2, Point2, Vector2};

use crate::common::{MpcError, MpcResult, Pose2D};

fn check_lengths(xs: &[f64], ys: &[f64]) -> MpcResult<()> {
    if xs.len() != ys.len() {
        return Err(MpcError::InvalidInput(format!(
            "waypoint coordinate count mismatch: {} x values, {} y values",
            xs.len(),
            ys.len()
        )));
    }
    if xs.is_empty() {
        return Err(MpcError::InvalidInput("no waypoints given".to_string()));
    }
    Ok(())
}

fn pose_isometry(pose: &Pose2D) -> Isometry2<f64> {
    Isometry2::new(Vector2::new(pose.x, pose.y), pose.yaw)
}

/// Express world-frame waypoints in the body frame of a vehicle at `pose`
///
/// Translates by the vehicle position then rotates by the negative heading.
pub fn world_to_vehicle(pose: &Pose2D, xs: &[f64], ys: &[f64]) -> MpcResult<(Vec<f64>, Vec<f64>)> {
    check_lengths(xs, ys)?;
    let iso = pose_isometry(pose);
    Ok(xs.iter().zip(ys.iter())
        .map(|(&x, &y)| {
            let p = iso.inverse_transform_point(&Point2::new(x, y));
            (p.x, p.y)
        })
        .unzip())
}

/// Inverse of `world_to_vehicle`
pub fn vehicle_to_world(pose: &Pose2D, xs: &[f64], ys: &[f64]) -> MpcResult<(Vec<f64>, Vec<f64>)> {
    check_lengths(xs, ys)?;
    let iso = pose_isometry(pose);
    Ok(xs.iter().zip(ys.iter())
        .map(|(&x, &y)| {
            let p = iso.transform_point(&Point2::new(x, y));
            (p.x, p.y)
        })
        .unzip())
}
