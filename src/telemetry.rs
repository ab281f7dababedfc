//! Simulator message framing
//!
//! The simulator exchanges Socket.IO text frames of the form
//! `42["event",{...}]`. Only the `telemetry` event carries data the controller
//! uses; a frame with no payload means the simulator is in manual mode.

use serde::Serialize;
use serde_json::Value;

use crate::common::{MpcError, MpcResult, Telemetry, TickOutput};

const EVENT_PREFIX: &str = "42";

/// Decoded simulator event
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Telemetry(Telemetry),
    /// No payload; the simulator expects a manual-mode reply
    Manual,
    /// Event the controller does not handle
    Other(String),
}

/// Message sent back to the simulator for each telemetry event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SteerMessage {
    pub steering_angle: f64,
    pub throttle: f64,
    pub mpc_x: Vec<f64>,
    pub mpc_y: Vec<f64>,
    pub next_x: Vec<f64>,
    pub next_y: Vec<f64>,
}

impl From<&TickOutput> for SteerMessage {
    fn from(output: &TickOutput) -> Self {
        SteerMessage {
            steering_angle: output.command.steering,
            throttle: output.command.throttle,
            mpc_x: output.predicted.x_coords(),
            mpc_y: output.predicted.y_coords(),
            next_x: output.reference.x_coords(),
            next_y: output.reference.y_coords(),
        }
    }
}

/// Parse one text frame
///
/// Returns `Ok(None)` for frames that are not event messages (pings, handshakes).
pub fn parse_frame(frame: &str) -> MpcResult<Option<SimEvent>> {
    let frame = frame.trim();
    if frame.len() <= EVENT_PREFIX.len() || !frame.starts_with(EVENT_PREFIX) {
        return Ok(None);
    }

    let body = match extract_payload(frame) {
        Some(body) => body,
        None => return Ok(Some(SimEvent::Manual)),
    };

    let value: Value = serde_json::from_str(body)?;
    let event = value
        .get(0)
        .and_then(Value::as_str)
        .ok_or_else(|| MpcError::ParseError("event name missing".to_string()))?;

    if event != "telemetry" {
        return Ok(Some(SimEvent::Other(event.to_string())));
    }

    match value.get(1) {
        Some(data) if !data.is_null() => {
            let telemetry: Telemetry = serde_json::from_value(data.clone())?;
            Ok(Some(SimEvent::Telemetry(telemetry)))
        }
        _ => Ok(Some(SimEvent::Manual)),
    }
}

/// `[ ... }]` slice of the frame, or None when it carries no object payload
fn extract_payload(frame: &str) -> Option<&str> {
    if frame.contains("null") {
        return None;
    }
    let start = frame.find('[')?;
    let end = frame.rfind("}]")?;
    if end < start {
        return None;
    }
    Some(&frame[start..end + 2])
}

/// Encode the reply to a telemetry event
pub fn steer_frame(output: &TickOutput) -> MpcResult<String> {
    let body = serde_json::to_string(&("steer", SteerMessage::from(output)))?;
    Ok(format!("{}{}", EVENT_PREFIX, body))
}

/// Reply telling the simulator to stay in manual mode
pub fn manual_frame() -> String {
    format!("{}[\"manual\",{{}}]", EVENT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Actuation, Path2D, TickStatus};

    const FRAME: &str = r#"42["telemetry",{"ptsx":[-32.16173,-43.49173,-61.09,-78.29172,-93.05002,-107.7717],"ptsy":[113.361,105.941,92.88499,78.73102,65.34102,50.57938],"psi":3.733651,"psi_unity":4.12033,"speed":0.4380091,"steering_angle":0,"throttle":0,"x":-40.62,"y":108.73}]"#;

    #[test]
    fn test_parse_telemetry() {
        let event = parse_frame(FRAME).unwrap();
        match event {
            Some(SimEvent::Telemetry(t)) => {
                assert_eq!(t.ptsx.len(), 6);
                assert_eq!(t.ptsy.len(), 6);
                assert!((t.x + 40.62).abs() < 1e-12);
                assert!((t.psi - 3.733651).abs() < 1e-12);
                assert!((t.speed - 0.4380091).abs() < 1e-12);
                assert_eq!(t.reported_command(), Actuation::zero());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_manual_frame() {
        assert_eq!(parse_frame("42[\"telemetry\",null]").unwrap(), Some(SimEvent::Manual));
        assert_eq!(parse_frame("42").unwrap(), None);
        assert_eq!(parse_frame("2").unwrap(), None);
    }

    #[test]
    fn test_other_event() {
        let event = parse_frame(r#"42["reset",{"a":1}]"#).unwrap();
        assert_eq!(event, Some(SimEvent::Other("reset".to_string())));
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        let missing_field = r#"42["telemetry",{"ptsx":[1.0],"ptsy":[1.0],"x":0}]"#;
        assert!(matches!(parse_frame(missing_field), Err(MpcError::ParseError(_))));
        assert!(matches!(parse_frame("42[{\"a\":1}]"), Err(MpcError::ParseError(_))));
    }

    #[test]
    fn test_steer_frame() {
        let output = TickOutput {
            command: Actuation::new(-0.25, 0.5),
            reference: Path2D::from_xy(&[0.0, 10.0], &[0.0, 1.0]),
            predicted: Path2D::from_xy(&[1.0], &[0.5]),
            status: TickStatus::Optimal,
        };
        let frame = steer_frame(&output).unwrap();
        assert!(frame.starts_with("42[\"steer\","));

        let value: Value = serde_json::from_str(&frame[2..]).unwrap();
        assert_eq!(value[1]["steering_angle"], -0.25);
        assert_eq!(value[1]["throttle"], 0.5);
        assert_eq!(value[1]["next_x"][1], 10.0);
        assert_eq!(value[1]["mpc_y"][0], 0.5);
    }

    #[test]
    fn test_manual_reply() {
        assert_eq!(manual_frame(), "42[\"manual\",{}]");
    }
}
