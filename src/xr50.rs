//! XVisio XR50 edge-SLAM sensor as a VIO backend.
//!
//! The XR50 runs SLAM on-device and streams fused 6-DoF poses as HID
//! interrupt reports at ~950 Hz. Control happens over HID feature reports:
//! `[0x02, cmd...]` out, `[0x01, cmd echo..., payload...]` back.

use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use nalgebra::Vector3;

use crate::types::{Quaternion, TrackingStatus, VioFeatures, VioOutput};
use crate::vio::{VioPipeline, VioSession};
use crate::{PosefeedError, Result};

// -- USB identifiers --
pub const VID: u16 = 0x040E;
pub const PID: u16 = 0xF408;

pub const REPORT_SIZE: usize = 63;

/// Fixed-point scale of positions and quaternion components: 2^-14.
pub const SCALE: f64 = 1.0 / 16384.0;

pub const PREFIX_HOST_TO_DEVICE: u8 = 0x02;
pub const PREFIX_DEVICE_TO_HOST: u8 = 0x01;

pub const CMD_FEATURES: &[u8] = &[0xDE, 0x62, 0x01];
pub const CMD_CONFIGURE: &[u8] = &[0x19, 0x95];
pub const CMD_EDGE_STREAM: &[u8] = &[0xA2, 0x33];

/// First bytes of every SLAM report (prefix + edge-stream echo).
pub const SLAM_HEADER: [u8; 3] = [0x01, 0xA2, 0x33];

/// Settling time between a command and reading its response.
const COMMAND_DELAY: Duration = Duration::from_millis(20);
/// The sensor re-initialises its cameras after a configure command.
const CONFIGURE_SETTLE: Duration = Duration::from_secs(1);

/// Interface 3 on Windows/Linux, -1 on macOS IOKit.
fn is_xr50_hid(d: &hidapi::DeviceInfo) -> bool {
    d.vendor_id() == VID
        && d.product_id() == PID
        && (d.interface_number() == 3 || d.interface_number() == -1)
}

/// `[0x02, cmd..., 0...]`, one full report.
pub fn build_command(cmd: &[u8]) -> [u8; REPORT_SIZE] {
    let mut buf = [0u8; REPORT_SIZE];
    buf[0] = PREFIX_HOST_TO_DEVICE;
    let len = cmd.len().min(REPORT_SIZE - 1);
    buf[1..1 + len].copy_from_slice(&cmd[..len]);
    buf
}

/// Edge mode: on-device SLAM, no host algorithm, uvc mode 0.
pub fn build_configure_cmd() -> [u8; REPORT_SIZE] {
    build_command(&[CMD_CONFIGURE[0], CMD_CONFIGURE[1], 1, 0, 0])
}

/// Start: `[0xA2, 0x33, 1, 1, 0]` (rotation enabled). Stop: all flags zero.
pub fn build_edge_stream_cmd(start: bool) -> [u8; REPORT_SIZE] {
    let flag = u8::from(start);
    build_command(&[CMD_EDGE_STREAM[0], CMD_EDGE_STREAM[1], flag, flag, 0])
}

/// Check prefix and command echo; returns the payload offset.
pub fn validate_response(response: &[u8], expected_cmd: &[u8]) -> Result<usize> {
    match response.first() {
        Some(&PREFIX_DEVICE_TO_HOST) => {}
        other => return Err(PosefeedError::InvalidResponse(other.copied().unwrap_or(0))),
    }
    let end = 1 + expected_cmd.len();
    if response.len() < end || &response[1..end] != expected_cmd {
        return Err(PosefeedError::CommandMismatch);
    }
    Ok(end)
}

/// Little-endian u32 feature bitmap.
pub fn parse_features(payload: &[u8]) -> VioFeatures {
    match payload.get(..4) {
        Some(b) => VioFeatures::from_bits_truncate(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => VioFeatures::empty(),
    }
}

/// Parse a SLAM interrupt report.
///
/// Layout:
/// - `[0..3]`: header `01 A2 33`
/// - `[3..7]`: u32 LE edge timestamp (µs)
/// - `[7..19]`: 3x i32 LE translation, scaled
/// - `[19..27]`: quaternion w, x, y, z as 4x i16 LE, scaled
///
/// A tracker that has not initialised reports an all-zero quaternion.
pub fn parse_slam_report(data: &[u8]) -> Option<VioOutput> {
    if data.len() < REPORT_SIZE || data[..3] != SLAM_HEADER {
        return None;
    }

    let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
    let i32_at = |i: usize| i32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]) as f64 * SCALE;
    let i16_at = |i: usize| i16::from_le_bytes([data[i], data[i + 1]]) as f64 * SCALE;

    let orientation = Quaternion::new(i16_at(19), i16_at(21), i16_at(23), i16_at(25));
    let status = if orientation.norm() < 0.5 {
        TrackingStatus::Init
    } else {
        TrackingStatus::Tracking
    };

    Some(VioOutput {
        status,
        time: u32_at(3) as f64 * 1e-6,
        position: Vector3::new(i32_at(7), i32_at(11), i32_at(15)),
        orientation,
    })
}

/// Write a command and read back the input report.
fn transaction(device: &HidDevice, cmd: &[u8]) -> Result<Vec<u8>> {
    device
        .write(&build_command(cmd))
        .map_err(|e| PosefeedError::HidCommand(format!("write failed: {}", e)))?;
    std::thread::sleep(COMMAND_DELAY);

    let mut recv_buf = [0u8; REPORT_SIZE + 1];
    recv_buf[0] = PREFIX_DEVICE_TO_HOST;
    let len = device
        .get_input_report(&mut recv_buf)
        .map_err(|e| PosefeedError::HidCommand(format!("get_input_report failed: {}", e)))?;
    Ok(recv_buf[..len].to_vec())
}

/// Write a prebuilt command whose response carries nothing of interest.
fn send_command(device: &HidDevice, buf: &[u8; REPORT_SIZE], what: &str) -> Result<()> {
    device
        .write(buf)
        .map_err(|e| PosefeedError::HidCommand(format!("{} write failed: {}", what, e)))?;
    std::thread::sleep(COMMAND_DELAY);

    // Response may be all zeros.
    let mut recv_buf = [0u8; REPORT_SIZE + 1];
    recv_buf[0] = PREFIX_DEVICE_TO_HOST;
    let _ = device.get_input_report(&mut recv_buf);
    Ok(())
}

/// VIO pipeline for a single attached XR50.
#[derive(Default)]
pub struct Xr50Pipeline {
    device: Option<HidDevice>,
    features: Option<VioFeatures>,
}

impl Xr50Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feature bitmap of the configured device.
    pub fn features(&self) -> Option<VioFeatures> {
        self.features
    }

    fn open_single_device() -> Result<HidDevice> {
        let api = HidApi::new()?;
        #[cfg(target_os = "macos")]
        {
            // Keep HID opens shared on macOS to avoid seizing the interface.
            api.set_open_exclusive(false);
        }

        let matches: Vec<&hidapi::DeviceInfo> = api.device_list().filter(|d| is_xr50_hid(d)).collect();
        if matches.len() != 1 {
            return Err(PosefeedError::DeviceCount(matches.len()));
        }
        Ok(api.open_path(matches[0].path())?)
    }
}

impl VioPipeline for Xr50Pipeline {
    fn configure_device(&mut self) -> Result<()> {
        let device = Self::open_single_device()?;

        let response = transaction(&device, CMD_FEATURES)?;
        let offset = validate_response(&response, CMD_FEATURES)?;
        let features = parse_features(&response[offset..]);
        log::info!("XR50 features: {:?}", features);
        if !features.contains(VioFeatures::EDGE_MODE) {
            return Err(PosefeedError::Unsupported("edge SLAM".into()));
        }

        send_command(&device, &build_configure_cmd(), "configure")?;
        std::thread::sleep(CONFIGURE_SETTLE);

        self.features = Some(features);
        self.device = Some(device);
        Ok(())
    }

    fn start_session(&mut self) -> Result<Box<dyn VioSession>> {
        let device = self
            .device
            .take()
            .ok_or_else(|| PosefeedError::HidCommand("device not configured".into()))?;

        send_command(&device, &build_edge_stream_cmd(true), "edge stream start")?;
        log::info!("XR50 edge stream started");
        Ok(Box::new(Xr50Session {
            device,
            buf: [0u8; 64],
        }))
    }
}

/// Streaming XR50. Stops the edge stream when dropped.
pub struct Xr50Session {
    device: HidDevice,
    buf: [u8; 64],
}

impl VioSession for Xr50Session {
    fn wait_for_output(&mut self, timeout: Duration) -> Result<Option<VioOutput>> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let len = self.device.read_timeout(&mut self.buf, timeout_ms)?;
        if len == 0 {
            return Ok(None);
        }
        match parse_slam_report(&self.buf[..len]) {
            Some(output) => Ok(Some(output)),
            None => {
                // control response or short report
                log::trace!("Skipping non-SLAM report ({} bytes)", len);
                Ok(None)
            }
        }
    }
}

impl Drop for Xr50Session {
    fn drop(&mut self) {
        match send_command(&self.device, &build_edge_stream_cmd(false), "edge stream stop") {
            Ok(()) => log::info!("XR50 edge stream stopped"),
            Err(e) => log::warn!("Failed to stop XR50 edge stream: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REPORT: [u8; 63] = [
        0x01, 0xa2, 0x33, 0x6b, 0xd1, 0x25, 0x5f, 0x58, 0x01, 0x00, 0x00, 0x1e, 0x00, 0x00,
        0x00, 0xc3, 0x01, 0x00, 0x00, 0x62, 0xc0, 0x3a, 0x03, 0x2d, 0x06, 0x5a, 0xfd, 0x56,
        0xc0, 0xf3, 0x05, 0x72, 0x06, 0xa9, 0x05, 0x6c, 0x3f, 0xa0, 0x56, 0x7d, 0x00, 0xf3,
        0xff, 0xf2, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x09, 0x00, 0x07,
        0x00, 0x2b, 0x41, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_build_commands() {
        let buf = build_edge_stream_cmd(true);
        assert_eq!(&buf[..6], &[0x02, 0xA2, 0x33, 0x01, 0x01, 0x00]);
        let buf = build_edge_stream_cmd(false);
        assert_eq!(&buf[..6], &[0x02, 0xA2, 0x33, 0x00, 0x00, 0x00]);
        let buf = build_configure_cmd();
        assert_eq!(&buf[..6], &[0x02, 0x19, 0x95, 0x01, 0x00, 0x00]);
        assert!(buf[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_validate_response() {
        let mut resp = [0u8; 63];
        resp[0] = 0x01;
        resp[1..4].copy_from_slice(CMD_FEATURES);
        resp[4] = 0x07;
        let offset = validate_response(&resp, CMD_FEATURES).unwrap();
        assert_eq!(offset, 4);
        let features = parse_features(&resp[offset..]);
        assert!(features.contains(VioFeatures::EDGE_MODE | VioFeatures::MIXED_MODE | VioFeatures::STEREO));

        resp[2] = 0x00;
        assert!(matches!(
            validate_response(&resp, CMD_FEATURES),
            Err(PosefeedError::CommandMismatch)
        ));
        assert!(matches!(
            validate_response(&[0x05, 0xDE], CMD_FEATURES),
            Err(PosefeedError::InvalidResponse(0x05))
        ));
    }

    #[test]
    fn test_parse_slam_report() {
        let output = parse_slam_report(&SAMPLE_REPORT).unwrap();

        // 1596313963 µs
        assert!((output.time - 1596.313963).abs() < 1e-9);
        assert!((output.position.x - 0.0210).abs() < 0.001);
        assert!((output.position.y - 0.0018).abs() < 0.001);
        assert!((output.position.z - 0.0275).abs() < 0.001);

        // w=-0.994, x=0.050, y=0.097, z=-0.041
        assert!((output.orientation.w - (-0.994)).abs() < 0.001);
        assert!((output.orientation.x - 0.050).abs() < 0.001);
        assert!((output.orientation.y - 0.097).abs() < 0.001);
        assert!((output.orientation.z - (-0.041)).abs() < 0.001);
        assert_eq!(output.status, TrackingStatus::Tracking);
    }

    #[test]
    fn test_uninitialised_tracker() {
        let mut report = SAMPLE_REPORT;
        report[19..27].fill(0);
        assert_eq!(parse_slam_report(&report).unwrap().status, TrackingStatus::Init);
    }

    #[test]
    fn test_rejects_foreign_reports() {
        let mut report = SAMPLE_REPORT;
        report[1] = 0xDE;
        assert!(parse_slam_report(&report).is_none());
        assert!(parse_slam_report(&SAMPLE_REPORT[..40]).is_none());
    }
}
