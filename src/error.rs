use std::fmt;
use std::net::SocketAddr;

use crate::types::DeviceMessage;

/// Errors raised while starting or running a tracking session.
#[derive(Debug, thiserror::Error)]
pub enum PosefeedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open serial port {path}: {source}")]
    PortOpen {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Expected exactly one tracking device, found {0}")]
    DeviceCount(usize),

    #[error("Device does not support {0}")]
    Unsupported(String),

    #[error("HID command failed: {0}")]
    HidCommand(String),

    #[error("Invalid response: expected prefix 0x01, got 0x{0:02x}")]
    InvalidResponse(u8),

    #[error("Command echo mismatch")]
    CommandMismatch,

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("Pose stream stopped")]
    StreamStopped,

    #[error("Timeout waiting for pose")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to spawn session worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why a single raw frame did not produce a reading.
///
/// None of these are fatal to the source loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// Empty frame or a frame starting with a NUL byte.
    #[error("empty frame")]
    Empty,

    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame is a device message rather than pose data.
    #[error("device message: {0}")]
    DeviceMessage(DeviceMessage),
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &PosefeedError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
