use std::net::SocketAddr;

use crate::error::ParseError;
use crate::types::{DeviceCommand, Reading, SourceKind};
use crate::Result;

/// Outcome of one bounded blocking read on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A frame parsed into a reading.
    Reading(Reading),
    /// A frame arrived but carried no usable pose. Never fatal.
    Rejected(ParseError),
    /// The read timed out without a complete frame.
    Idle,
}

/// A transport that produces readings for the session worker.
///
/// Implementations own their transport handle and are moved onto the
/// worker thread. `recv` must return within the configured read timeout so
/// cancellation is observed; an `Err` ends the session as `Disconnected`.
pub trait Source: Send {
    fn kind(&self) -> SourceKind;

    /// Whether the calibrator applies to this source's orientations.
    fn recenters(&self) -> bool {
        true
    }

    /// Local endpoint of network transports.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn recv(&mut self) -> Result<Received>;

    /// Forward an operator command to the device, if the transport has a
    /// return channel.
    fn device_command(&mut self, cmd: DeviceCommand) -> Result<()> {
        log::warn!("{} source ignores device command {:?}", self.kind(), cmd);
        Ok(())
    }

    /// Release transport resources. Called once on the worker thread before
    /// it exits.
    fn shutdown(&mut self) {}
}
