use std::fmt;
use std::ops::Mul;
use std::time::Instant;

use nalgebra::Vector3;

/// Rotation quaternion in Hamilton convention, stored as (w, x, y, z).
///
/// Unit norm is expected but never enforced; consumers must tolerate
/// near-unit values coming off the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion::new(1.0, 0.0, 0.0, 0.0);

    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// (w, -x, -y, -z). Equals the inverse for unit quaternions.
    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Hamilton product `self ⊗ rhs`.
    pub fn hamilton(&self, rhs: &Quaternion) -> Quaternion {
        let (a, b) = (self, rhs);
        Quaternion {
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
            x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        }
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Component-wise comparison within `eps`.
    pub fn approx_eq(&self, other: &Quaternion, eps: f64) -> bool {
        (self.w - other.w).abs() <= eps
            && (self.x - other.x).abs() <= eps
            && (self.y - other.y).abs() <= eps
            && (self.z - other.z).abs() <= eps
    }

    /// Euler angles [roll, pitch, yaw] in degrees.
    ///
    ///   roll  = atan2(2(wx + yz), 1 - 2(x² + y²))
    ///   pitch = asin(2(wy - zx))
    ///   yaw   = atan2(2(wz + xy), 1 - 2(y² + z²))
    pub fn to_euler_deg(&self) -> [f64; 3] {
        let Quaternion { w, x, y, z } = *self;
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, rhs: Quaternion) -> Quaternion {
        self.hamilton(&rhs)
    }
}

/// One parsed sample from a transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Absent for orientation-only sources (serial IMU).
    pub position: Option<Vector3<f64>>,
    pub orientation: Quaternion,
    /// Host monotonic time at which the frame was parsed.
    pub timestamp: Instant,
}

impl Reading {
    pub fn orientation_only(orientation: Quaternion) -> Self {
        Self {
            position: None,
            orientation,
            timestamp: Instant::now(),
        }
    }

    pub fn with_position(position: Vector3<f64>, orientation: Quaternion) -> Self {
        Self {
            position: Some(position),
            orientation,
            timestamp: Instant::now(),
        }
    }
}

/// The published output unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: Quaternion,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: Quaternion::IDENTITY,
        }
    }
}

/// Lifecycle of a tracking session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle = 0,
    Connecting = 1,
    Streaming = 2,
    Disconnected = 3,
    Stopping = 4,
    Stopped = 5,
}

impl SessionState {
    /// Transitions only move forward, except `Disconnected -> Connecting`
    /// (retry). Any live state may enter `Stopping`; `Stopped` is only
    /// reachable from `Stopping`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Stopped, _) => false,
            (Stopping, Stopped) => true,
            (Stopping, _) => false,
            (_, Stopping) => true,
            (Idle, Connecting) => true,
            (Connecting, Streaming) | (Connecting, Disconnected) => true,
            (Streaming, Disconnected) => true,
            (Disconnected, Connecting) => true,
            _ => false,
        }
    }

    pub(crate) fn from_u8(value: u8) -> SessionState {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Connecting,
            2 => SessionState::Streaming,
            3 => SessionState::Disconnected,
            4 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }
}

/// Which transport feeds a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Serial,
    Udp,
    Vio,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Serial => "serial",
            SourceKind::Udp => "udp",
            SourceKind::Vio => "vio",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a non-pose line sent by the serial IMU firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMessageKind {
    /// `C` lines: acknowledgement/progress of on-device calibration.
    Calibration,
    /// `D` lines: free-form diagnostics.
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    pub kind: DeviceMessageKind,
    pub text: String,
}

impl fmt::Display for DeviceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceMessageKind::Calibration => write!(f, "Calibration: {}", self.text),
            DeviceMessageKind::Info => write!(f, "Info: {}", self.text),
        }
    }
}

/// Commands an operator can send to the active source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Ask the device firmware to run its own sensor calibration.
    Calibrate,
}

/// 6-DoF tracking status reported by a VIO backend.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Tracker still initialising.
    Init = 0,
    Tracking = 1,
    /// Tracking failed; outputs resume once the backend recovers.
    LostTracking = 2,
}

/// One already-fused output of a VIO session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VioOutput {
    pub status: TrackingStatus,
    /// Backend timestamp in seconds.
    pub time: f64,
    pub position: Vector3<f64>,
    pub orientation: Quaternion,
}

bitflags::bitflags! {
    /// Feature bitmap reported by the XR50 VIO sensor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct VioFeatures: u32 {
        const EDGE_MODE    = 1 << 0;
        const MIXED_MODE   = 1 << 1;
        const STEREO       = 1 << 2;
        const RGB          = 1 << 3;
        const TOF          = 1 << 4;
        const IA           = 1 << 5;
        const SGBM         = 1 << 6;
        const EYE_TRACKING = 1 << 10;
        const FACE_ID      = 1 << 12;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamilton_matches_reference_formula() {
        let a = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        let b = Quaternion::new(5.0, 6.0, 7.0, 8.0);
        // (1 + 2i + 3j + 4k)(5 + 6i + 7j + 8k) = -60 + 12i + 30j + 24k
        assert_eq!(a * b, Quaternion::new(-60.0, 12.0, 30.0, 24.0));
        assert_ne!(a * b, b * a);
    }

    #[test]
    fn test_conjugate_product_is_identity() {
        let half = std::f64::consts::FRAC_1_SQRT_2;
        let q = Quaternion::new(half, 0.0, half, 0.0);
        assert!((q.conjugate() * q).approx_eq(&Quaternion::IDENTITY, 1e-12));
    }

    #[test]
    fn test_euler_identity() {
        let euler = Quaternion::IDENTITY.to_euler_deg();
        assert!(euler.iter().all(|a| a.abs() < 1e-10));
    }

    #[test]
    fn test_euler_yaw_quarter_turn() {
        let half = std::f64::consts::FRAC_1_SQRT_2;
        let euler = Quaternion::new(half, 0.0, 0.0, half).to_euler_deg();
        assert!((euler[2] - 90.0).abs() < 1e-9);
        assert!(euler[0].abs() < 1e-9);
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Streaming.can_transition_to(Stopping));
        assert!(Idle.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));

        assert!(!Streaming.can_transition_to(Connecting));
        assert!(!Streaming.can_transition_to(Stopped));
        assert!(!Stopping.can_transition_to(Streaming));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Disconnected.can_transition_to(Streaming));
    }
}
