//! # MRF Link Layer
//!
//! Collaborator abstractions the runtime talks to: the microcontroller serial
//! link, the operator TCP link, the camera and the actuator sink.
//!
//! Every blocking call takes an explicit timeout so that I/O workers can poll
//! the shutdown flag between calls.

use bytes::Bytes;
use mrf_protocol::{MotorCommand, ProtocolError, RobotState};
use std::time::Duration;
use thiserror::Error;

pub mod actuator;
pub mod camera;
pub mod serial;
pub mod tcp;

#[cfg(feature = "mock")]
pub mod mock;

pub use actuator::{LogSink, NullSink};
pub use camera::{ImageBuffer, PixelFormat, SyntheticCamera};
pub use serial::{SerialPortConnector, SerialPortLink};
pub use tcp::{TcpCommandConnector, TcpCommandLink};

/// Link layer error type
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Connection refused: {0}")]
    Refused(String),
    #[error("Framing error: {0}")]
    Framing(#[from] ProtocolError),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Link closed by peer")]
    Closed,
    #[error("Device error: {0}")]
    Device(String),
}

impl LinkError {
    /// Nothing arrived within the timeout; the link itself is still healthy
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout)
    }

    /// The handle is unusable and must be reopened
    ///
    /// Framing and decode errors leave the handle readable; the runtime still
    /// treats framing violations as link faults.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Io(_)
                | LinkError::Serial(_)
                | LinkError::Refused(_)
                | LinkError::Closed
                | LinkError::Device(_)
        )
    }

    /// Map IO errors, turning read timeouts into `LinkError::Timeout`
    pub fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => LinkError::Timeout,
            std::io::ErrorKind::ConnectionRefused => LinkError::Refused(e.to_string()),
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => LinkError::Closed,
            _ => LinkError::Io(e),
        }
    }
}

// ============================================================================
// Serial
// ============================================================================

/// Opens the microcontroller serial link
pub trait SerialConnector: Send {
    type Link: SerialLink;

    fn open(&mut self, port: &str, baud_rate: u32) -> Result<Self::Link, LinkError>;
}

/// An open serial link carrying telemetry frames in and motor frames out
pub trait SerialLink: Send {
    /// Read one complete telemetry frame
    ///
    /// Returns `LinkError::Timeout` if no frame completed within `timeout` and
    /// `LinkError::Framing` for header, length or checksum violations.
    fn read_frame(&mut self, timeout: Duration) -> Result<Bytes, LinkError>;

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    fn close(&mut self) {}
}

// ============================================================================
// Operator link (TCP)
// ============================================================================

/// Connects to the operator endpoint
pub trait TcpConnector: Send {
    type Link: CommandLink;

    fn connect(&mut self, host: &str, port: u16, timeout: Duration)
    -> Result<Self::Link, LinkError>;
}

/// An open operator link: LF-delimited command lines in, reply lines out
pub trait CommandLink: Send {
    /// Send raw bytes (a reply line including its terminator)
    fn send_command(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Receive one command line without its terminator
    ///
    /// Returns `LinkError::Timeout` if no complete line arrived within `timeout`.
    fn recv(&mut self, timeout: Duration) -> Result<Bytes, LinkError>;

    fn close(&mut self) {}
}

// ============================================================================
// Camera
// ============================================================================

/// Frame source
///
/// `Ok` is a decoded frame. `Err(LinkError::Timeout)` means no frame was ready
/// yet. Any other error means a capture or decode failure; the runtime publishes
/// it as an invalid image.
pub trait CameraBackend: Send {
    fn grab_frame(&mut self, timeout: Duration) -> Result<ImageBuffer, LinkError>;
}

// ============================================================================
// Actuators
// ============================================================================

/// Output of one control tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorDecision {
    /// Control tick counter
    pub tick: u64,
    /// Robot state the decision was taken in
    pub state: RobotState,
    pub motor: MotorCommand,
}

impl ActuatorDecision {
    pub fn stop(tick: u64, state: RobotState) -> Self {
        Self {
            tick,
            state,
            motor: MotorCommand::STOP,
        }
    }
}

/// Receives actuator decisions from the control loop
///
/// Called once per tick from the control thread; implementations must not block.
pub trait ActuatorSink: Send {
    fn apply(&mut self, decision: &ActuatorDecision);
}

impl<S: ActuatorSink + ?Sized> ActuatorSink for Box<S> {
    fn apply(&mut self, decision: &ActuatorDecision) {
        (**self).apply(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "t");
        assert!(LinkError::from_io(timeout).is_timeout());

        let would_block = std::io::Error::new(std::io::ErrorKind::WouldBlock, "w");
        assert!(LinkError::from_io(would_block).is_timeout());

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(LinkError::from_io(eof), LinkError::Closed));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no");
        assert!(matches!(LinkError::from_io(refused), LinkError::Refused(_)));

        let other = std::io::Error::other("boom");
        assert!(matches!(LinkError::from_io(other), LinkError::Io(_)));
    }

    #[test]
    fn test_framing_error_from_protocol() {
        let err: LinkError = ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, LinkError::Framing(_)));
        assert!(!err.is_timeout());
        assert!(!err.is_fatal());
        assert!(LinkError::Closed.is_fatal());
    }
}
