//! Wire formats of the three transports.
//!
//! Every parser is stateless: one raw frame in, one [`Reading`] or a
//! [`ParseError`] out. A parse error never ends a source loop.

use nalgebra::Vector3;

use crate::error::ParseError;
use crate::types::{DeviceMessage, DeviceMessageKind, Quaternion, Reading, TrackingStatus, VioOutput};

// -- Serial transport --
pub const SERIAL_BAUD_RATE: u32 = 115_200;

/// Marker byte of on-device calibration acknowledgements.
pub const MARKER_CALIBRATION: u8 = b'C';
/// Marker byte of diagnostic info lines.
pub const MARKER_INFO: u8 = b'D';

/// Sent to the IMU firmware to request an on-device calibration run.
pub const CMD_DEVICE_CALIBRATE: &[u8] = b"C\n";

// -- UDP transport --
pub const UDP_PORT: u16 = 50000;
pub const UDP_BUFFER_LEN: usize = 512;
pub const UDP_MIN_TOKENS: usize = 7;

/// Shared contract of the frame parsers.
pub trait FrameParser {
    fn parse(&self, raw: &[u8]) -> Result<Reading, ParseError>;
}

/// Parser for `qw,qx,qy,qz` lines from the serial IMU.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialLineParser;

impl FrameParser for SerialLineParser {
    fn parse(&self, raw: &[u8]) -> Result<Reading, ParseError> {
        parse_serial_line(raw)
    }
}

/// Parser for space-delimited datagrams from the companion tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpDatagramParser;

impl FrameParser for UdpDatagramParser {
    fn parse(&self, raw: &[u8]) -> Result<Reading, ParseError> {
        parse_udp_datagram(raw)
    }
}

/// Parse one serial line into an orientation-only reading.
///
/// Line terminators are stripped first. Lines starting with `C` or `D`
/// are device messages, not pose data.
pub fn parse_serial_line(raw: &[u8]) -> Result<Reading, ParseError> {
    let line = strip_line_terminator(raw);

    match line.first() {
        None | Some(0) => return Err(ParseError::Empty),
        Some(&MARKER_CALIBRATION) => {
            return Err(ParseError::DeviceMessage(device_message(
                DeviceMessageKind::Calibration,
                &line[1..],
            )))
        }
        Some(&MARKER_INFO) => {
            return Err(ParseError::DeviceMessage(device_message(
                DeviceMessageKind::Info,
                &line[1..],
            )))
        }
        Some(_) => {}
    }

    let text = std::str::from_utf8(line)
        .map_err(|_| ParseError::Malformed("line is not valid UTF-8".into()))?;

    let tokens: Vec<&str> = text.split(',').collect();
    if tokens.len() != 4 {
        return Err(ParseError::Malformed(format!(
            "expected 4 comma-separated values, got {}",
            tokens.len()
        )));
    }

    let mut q = [0.0f64; 4];
    for (slot, token) in q.iter_mut().zip(&tokens) {
        *slot = parse_number(token)?;
    }

    Ok(Reading::orientation_only(Quaternion::new(q[0], q[1], q[2], q[3])))
}

/// Parse one UDP payload into a position + orientation reading.
///
/// The sender permutes axes, so the token mapping is fixed:
/// position = (t1, t2, t0), orientation (w, x, y, z) = (t3, t5, t6, t4).
pub fn parse_udp_datagram(raw: &[u8]) -> Result<Reading, ParseError> {
    // Payloads are C strings on the sender side.
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|_| ParseError::Malformed("datagram is not valid UTF-8".into()))?;

    let text = match text.chars().next() {
        Some(c) if c.is_whitespace() => &text[c.len_utf8()..],
        _ => text,
    };
    let text = text.trim_end();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let tokens: Vec<&str> = text.split(' ').collect();
    if tokens.len() < UDP_MIN_TOKENS {
        return Err(ParseError::Malformed(format!(
            "expected at least {} tokens, got {}",
            UDP_MIN_TOKENS,
            tokens.len()
        )));
    }

    let mut t = [0.0f64; UDP_MIN_TOKENS];
    for (slot, token) in t.iter_mut().zip(&tokens) {
        *slot = parse_number(token)?;
    }

    Ok(Reading::with_position(
        Vector3::new(t[1], t[2], t[0]),
        Quaternion::new(t[3], t[5], t[6], t[4]),
    ))
}

/// Map a VIO output straight to a reading.
///
/// Only outputs with `Tracking` status carry a usable pose; the rest are
/// dropped like malformed frames.
pub fn adapt_vio_output(output: &VioOutput) -> Result<Reading, ParseError> {
    match output.status {
        TrackingStatus::Tracking => Ok(Reading::with_position(output.position, output.orientation)),
        status => Err(ParseError::Malformed(format!("VIO status {:?}", status))),
    }
}

fn strip_line_terminator(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    &raw[..end]
}

fn device_message(kind: DeviceMessageKind, rest: &[u8]) -> DeviceMessage {
    let rest = rest.strip_prefix(b":").unwrap_or(rest);
    DeviceMessage {
        kind,
        text: String::from_utf8_lossy(rest).trim().to_string(),
    }
}

fn parse_number(token: &str) -> Result<f64, ParseError> {
    let value: f64 = token
        .trim()
        .parse()
        .map_err(|_| ParseError::Malformed(format!("non-numeric token {:?}", token)))?;
    if !value.is_finite() {
        return Err(ParseError::Malformed(format!("non-finite token {:?}", token)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_valid_line() {
        let reading = parse_serial_line(b"0.7071,0.0,-0.7071,0.25\r\n").unwrap();
        assert_eq!(reading.orientation, Quaternion::new(0.7071, 0.0, -0.7071, 0.25));
        assert!(reading.position.is_none());
    }

    #[test]
    fn test_serial_various_numeric_forms() {
        for (line, expected) in [
            ("1,0,0,0", Quaternion::new(1.0, 0.0, 0.0, 0.0)),
            ("-1e-3, 2.5 ,3,4", Quaternion::new(-0.001, 2.5, 3.0, 4.0)),
            ("+0.5,-.5,0.5,-0.5\n", Quaternion::new(0.5, -0.5, 0.5, -0.5)),
        ] {
            let reading = SerialLineParser.parse(line.as_bytes()).unwrap();
            assert_eq!(reading.orientation, expected, "line {:?}", line);
        }
    }

    #[test]
    fn test_serial_empty_and_nul() {
        assert_eq!(parse_serial_line(b"").unwrap_err(), ParseError::Empty);
        assert_eq!(parse_serial_line(b"\r\n").unwrap_err(), ParseError::Empty);
        assert_eq!(parse_serial_line(b"\0garbage").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn test_serial_malformed() {
        for line in ["1,0,0", "1,0,0,0,0", "1,a,0,0", "1,,0,0", "nan,0,0,0", "1;0;0;0"] {
            assert!(
                matches!(parse_serial_line(line.as_bytes()), Err(ParseError::Malformed(_))),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_serial_device_messages() {
        match parse_serial_line(b"C:gyro offsets stored\n") {
            Err(ParseError::DeviceMessage(msg)) => {
                assert_eq!(msg.kind, DeviceMessageKind::Calibration);
                assert_eq!(msg.text, "gyro offsets stored");
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_serial_line(b"D:MPU6050 ready") {
            Err(ParseError::DeviceMessage(msg)) => {
                assert_eq!(msg.kind, DeviceMessageKind::Info);
                assert_eq!(msg.to_string(), "Info: MPU6050 ready");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_udp_axis_permutation() {
        let reading = parse_udp_datagram(b"1 2 3 4 5 6 7").unwrap();
        assert_eq!(reading.position, Some(Vector3::new(2.0, 3.0, 1.0)));
        assert_eq!(reading.orientation, Quaternion::new(4.0, 6.0, 7.0, 5.0));
    }

    #[test]
    fn test_udp_leading_space_and_trailer() {
        let reading = UdpDatagramParser.parse(b" 1 2 3 4 5 6 7 \n\0\0junk").unwrap();
        assert_eq!(reading.position, Some(Vector3::new(2.0, 3.0, 1.0)));

        // extra tokens are ignored
        let reading = parse_udp_datagram(b"0.1 0.2 0.3 1 0 0 0 99").unwrap();
        assert_eq!(reading.position, Some(Vector3::new(0.2, 0.3, 0.1)));
        assert_eq!(reading.orientation, Quaternion::IDENTITY);
    }

    #[test]
    fn test_udp_too_few_tokens() {
        for payload in ["1 2 3 4 5 6", "1", " 1 2 3"] {
            assert!(
                matches!(parse_udp_datagram(payload.as_bytes()), Err(ParseError::Malformed(_))),
                "payload {:?}",
                payload
            );
        }
        assert_eq!(parse_udp_datagram(b"").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn test_udp_non_numeric() {
        assert!(matches!(
            parse_udp_datagram(b"1 2 x 4 5 6 7"),
            Err(ParseError::Malformed(_))
        ));
        // double space yields an empty token
        assert!(matches!(
            parse_udp_datagram(b"1  2 3 4 5 6 7"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_vio_adapter() {
        let output = VioOutput {
            status: TrackingStatus::Tracking,
            time: 12.5,
            position: Vector3::new(0.1, 0.2, 0.3),
            orientation: Quaternion::new(0.0, 1.0, 0.0, 0.0),
        };
        let reading = adapt_vio_output(&output).unwrap();
        assert_eq!(reading.position, Some(output.position));
        assert_eq!(reading.orientation, output.orientation);

        let lost = VioOutput {
            status: TrackingStatus::LostTracking,
            ..output
        };
        assert!(adapt_vio_output(&lost).is_err());
    }
}
