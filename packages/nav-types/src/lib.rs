//! # nav-types
//!
//! Shared wire-protocol and geometry types for the StereoNav suite.
//!
//! These types are used by:
//! - `nav-core`: the viewer-embedded navigation core (protocol client)
//! - `tracking-sim`: the standalone position-source simulator (protocol server)
//!
//! ## Coordinate Conventions
//!
//! - **Patient frame**: the anatomical world frame shared by all viewports of
//!   one study; right-handed Cartesian, millimeters.
//! - Positions travel on the wire as plain `[x, y, z]` arrays, matching the
//!   tracking server's JSON.
//!
//! ## Wire Protocol
//!
//! JSON text frames over one persistent WebSocket:
//!
//! | Direction | Message |
//! |-----------|---------|
//! | client → server | `{"command":"start","mode":"circular"}` |
//! | client → server | `{"command":"stop"}` |
//! | client → server | `{"command":"set_center","position":[x,y,z]}` |
//! | client → server | `{"command":"ping"}` |
//! | server → client | `{"type":"update","position":[x,y,z],"timestamp":t}` |
//! | server → client | `{"type":"response","command":...,...}` |
//! | server → client | `{"type":"connection","status":"connected",...}` |
//! | server → client | `{"type":"pong","timestamp":t}` |

use serde::{Deserialize, Serialize};

// ── 3D Vector ─────────────────────────────────────────────────────────────────

/// 3D vector in the patient frame, millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self { Self { x, y, z } }
    pub fn zero() -> Self { Self { x: 0.0, y: 0.0, z: 0.0 } }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
    pub fn scale(&self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
    pub fn dist(&self, other: &Vec3) -> f64 {
        self.sub(other).norm()
    }

    /// Unit vector in the same direction, or `None` for the zero vector.
    pub fn normalized(&self) -> Option<Vec3> {
        let n = self.norm();
        if n > 0.0 { Some(self.scale(1.0 / n)) } else { None }
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(a: [f64; 3]) -> Self { Self { x: a[0], y: a[1], z: a[2] } }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self { [v.x, v.y, v.z] }
}

// ── Tracking Mode ─────────────────────────────────────────────────────────────

/// Motion pattern the position source generates while tracking is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Orbit around the configured center in the axial plane
    #[default]
    Circular,
    /// Oscillation along one anatomical axis
    Linear,
    /// Bounded random walk (jittery hand motion)
    Random,
}

// ── Client → Server Commands ──────────────────────────────────────────────────

/// Commands the navigation core sends to the position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TrackerCommand {
    /// Begin streaming position updates in the given mode
    Start { mode: TrackingMode },
    /// Halt the update stream (connection stays open)
    Stop,
    /// Move the source's path center to a new patient-frame point
    SetCenter { position: Vec3 },
    /// Liveness probe; the source answers with `pong`
    Ping,
}

// ── Server → Client Messages ──────────────────────────────────────────────────

/// Messages the position source sends to the navigation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerMessage {
    /// One streamed position sample, emitted at the source's update rate.
    /// `timestamp` is the source wall clock in seconds.
    Update { position: Vec3, timestamp: f64 },
    /// Acknowledgement of a client command
    Response {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<TrackingMode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        center: Option<Vec3>,
    },
    /// Hello sent once per connection, immediately after accept.
    /// Receiving it completes the client-side handshake.
    Connection {
        status: String,
        server: String,
        update_rate_hz: f64,
        timestamp: f64,
    },
    /// Answer to `ping`
    Pong { timestamp: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_command_matches_wire_shape() {
        let cmd = TrackerCommand::Start { mode: TrackingMode::Circular };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"command":"start","mode":"circular"}"#);
    }

    #[test]
    fn set_center_position_is_an_array() {
        let cmd = TrackerCommand::SetCenter { position: Vec3::new(102.4, 102.4, 70.0) };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"command":"set_center","position":[102.4,102.4,70.0]}"#);
    }

    #[test]
    fn update_message_parses() {
        let raw = r#"{"type":"update","position":[128.0,128.0,64.0],"timestamp":1723456789.25}"#;
        let msg: TrackerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            TrackerMessage::Update { position, timestamp } => {
                assert_eq!(position, Vec3::new(128.0, 128.0, 64.0));
                assert_eq!(timestamp, 1723456789.25);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn set_center_response_round_trips_center() {
        let raw = r#"{"type":"response","command":"set_center","center":[10.0,20.0,30.0]}"#;
        let msg: TrackerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            TrackerMessage::Response { command, center, .. } => {
                assert_eq!(command, "set_center");
                assert_eq!(center, Some(Vec3::new(10.0, 20.0, 30.0)));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn cross_product_follows_right_hand_rule() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(&y), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(y.cross(&x), Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn normalized_rejects_zero_vector() {
        assert!(Vec3::zero().normalized().is_none());
        let v = Vec3::new(3.0, 0.0, 4.0).normalized().unwrap();
        assert!((v.norm() - 1.0).abs() < 1e-12);
    }
}
