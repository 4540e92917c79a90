//! Session configuration.
//!
//! Defaults match the stock tracker setup (UDP on port 50000, 115200 baud
//! serial). Every field can be overridden from `POSEFEED_*` environment
//! variables so a host driver can be reconfigured without a rebuild.

use std::time::Duration;

use crate::protocol::{SERIAL_BAUD_RATE, UDP_PORT};
use crate::types::SourceKind;
use crate::{PosefeedError, Result};

pub const ENV_SOURCE: &str = "POSEFEED_SOURCE";
pub const ENV_SERIAL_PORT: &str = "POSEFEED_SERIAL_PORT";
pub const ENV_BAUD_RATE: &str = "POSEFEED_BAUD_RATE";
pub const ENV_UDP_PORT: &str = "POSEFEED_UDP_PORT";
pub const ENV_UDP_ECHO: &str = "POSEFEED_UDP_ECHO";
pub const ENV_READ_TIMEOUT_MS: &str = "POSEFEED_READ_TIMEOUT_MS";
pub const ENV_RECENTER_VIO: &str = "POSEFEED_RECENTER_VIO";

#[cfg(windows)]
const DEFAULT_SERIAL_PORT: &str = "COM3";
#[cfg(not(windows))]
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Everything needed to start one tracking session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub source: SourceKind,
    pub serial_port: String,
    pub baud_rate: u32,
    pub udp_port: u16,
    /// Send every datagram back to its sender.
    pub udp_echo: bool,
    /// Upper bound on any single blocking read; also bounds stop latency.
    pub read_timeout: Duration,
    /// Apply the calibrator to VIO poses. VIO output is already globally
    /// referenced, so this is off by default.
    pub recenter_vio: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Udp,
            serial_port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: SERIAL_BAUD_RATE,
            udp_port: UDP_PORT,
            udp_echo: false,
            read_timeout: Duration::from_millis(100),
            recenter_vio: false,
        }
    }
}

impl SessionConfig {
    pub fn udp(port: u16) -> Self {
        Self {
            source: SourceKind::Udp,
            udp_port: port,
            ..Self::default()
        }
    }

    pub fn serial(port: impl Into<String>) -> Self {
        Self {
            source: SourceKind::Serial,
            serial_port: port.into(),
            ..Self::default()
        }
    }

    pub fn vio() -> Self {
        Self {
            source: SourceKind::Vio,
            ..Self::default()
        }
    }

    /// Defaults overridden by any `POSEFEED_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable values are errors,
    /// not silently replaced by defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get(ENV_SOURCE) {
            config.source = parse_source(&v)?;
        }
        if let Some(v) = get(ENV_SERIAL_PORT) {
            config.serial_port = v;
        }
        if let Some(v) = get(ENV_BAUD_RATE) {
            config.baud_rate = parse_value(ENV_BAUD_RATE, &v)?;
        }
        if let Some(v) = get(ENV_UDP_PORT) {
            config.udp_port = parse_value(ENV_UDP_PORT, &v)?;
        }
        if let Some(v) = get(ENV_UDP_ECHO) {
            config.udp_echo = parse_bool(ENV_UDP_ECHO, &v)?;
        }
        if let Some(v) = get(ENV_READ_TIMEOUT_MS) {
            config.read_timeout = Duration::from_millis(parse_value(ENV_READ_TIMEOUT_MS, &v)?);
        }
        if let Some(v) = get(ENV_RECENTER_VIO) {
            config.recenter_vio = parse_bool(ENV_RECENTER_VIO, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_timeout.is_zero() {
            return Err(PosefeedError::Config(
                "read timeout must be non-zero, reads would never time out".into(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(PosefeedError::Config("baud rate must be non-zero".into()));
        }
        if self.source == SourceKind::Serial && self.serial_port.is_empty() {
            return Err(PosefeedError::Config("serial port name is empty".into()));
        }
        Ok(())
    }
}

fn parse_source(value: &str) -> Result<SourceKind> {
    match value.to_ascii_lowercase().as_str() {
        "serial" => Ok(SourceKind::Serial),
        "udp" => Ok(SourceKind::Udp),
        "vio" => Ok(SourceKind::Vio),
        other => Err(PosefeedError::Config(format!(
            "{}='{}' (supported: serial|udp|vio)",
            ENV_SOURCE, other
        ))),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PosefeedError::Config(format!("{}='{}' is not a boolean", name, other))),
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PosefeedError::Config(format!("{}='{}' is not a valid number", name, value)))
}
