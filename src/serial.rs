use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::ParseError;
use crate::protocol::{self, FrameParser, SerialLineParser};
use crate::source::{Received, Source};
use crate::types::{DeviceCommand, SourceKind};
use crate::{PosefeedError, Result};

/// Longest line accepted before the buffer is discarded. Pose lines are
/// four short floats; anything this long is line noise.
const MAX_LINE_LEN: usize = 256;

/// Byte stream a serial source can read lines from and write commands to.
pub trait SerialIo: Read + Write + Send {}

impl<T: Read + Write + Send> SerialIo for T {}

/// Orientation-only IMU on a serial line.
///
/// The port is opened with a read timeout so `recv` returns periodically;
/// a line split across a timeout is kept and completed on the next call.
pub struct SerialSource {
    name: String,
    reader: BufReader<Box<dyn SerialIo>>,
    line: Vec<u8>,
    parser: SerialLineParser,
}

impl SerialSource {
    /// Open `path` at `baud_rate`. Failure is a startup error.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<SerialSource> {
        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| PosefeedError::PortOpen {
                path: path.to_string(),
                source,
            })?;

        log::info!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self::from_port(path, port))
    }

    /// Wrap an already-open byte stream.
    pub fn from_port(name: impl Into<String>, port: impl SerialIo + 'static) -> SerialSource {
        let port: Box<dyn SerialIo> = Box::new(port);
        SerialSource {
            name: name.into(),
            reader: BufReader::new(port),
            line: Vec::with_capacity(64),
            parser: SerialLineParser,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Source for SerialSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Serial
    }

    fn recv(&mut self) -> Result<Received> {
        // One port read per call; cancellation is checked between calls.
        let available = match self.reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if matches!(
                e.kind(),
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
            ) =>
            {
                return Ok(Received::Idle)
            }
            Err(e) => return Err(PosefeedError::Io(e)),
        };
        if available.is_empty() {
            return Err(PosefeedError::TransportClosed(format!(
                "serial port {} reached end of stream",
                self.name
            )));
        }

        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        self.line.extend_from_slice(&available[..used]);
        self.reader.consume(used);

        if complete {
            let line = std::mem::take(&mut self.line);
            return Ok(match self.parser.parse(&line) {
                Ok(reading) => Received::Reading(reading),
                Err(e) => Received::Rejected(e),
            });
        }
        if self.line.len() > MAX_LINE_LEN {
            let len = self.line.len();
            self.line.clear();
            return Ok(Received::Rejected(ParseError::Malformed(format!(
                "unterminated line of {} bytes",
                len
            ))));
        }
        Ok(Received::Idle)
    }

    fn device_command(&mut self, cmd: DeviceCommand) -> Result<()> {
        match cmd {
            DeviceCommand::Calibrate => {
                let port = self.reader.get_mut();
                port.write_all(protocol::CMD_DEVICE_CALIBRATE)?;
                port.flush()?;
                log::info!("Requested on-device calibration on {}", self.name);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        log::info!("Closing serial port {}", self.name);
    }
}
