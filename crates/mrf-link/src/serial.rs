//! Serial link to the microcontroller
//!
//! 8N1, no flow control. Telemetry frames are reassembled with [`FrameSync`];
//! motor commands are written as-is.

use crate::{LinkError, SerialConnector, SerialLink};
use bytes::Bytes;
use mrf_protocol::FrameSync;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Upper bound on a single blocking read; `read_frame` loops until its own deadline
const READ_SLICE: Duration = Duration::from_millis(10);

/// Opens real serial ports through the `serialport` crate
#[derive(Debug, Default, Clone)]
pub struct SerialPortConnector;

impl SerialConnector for SerialPortConnector {
    type Link = SerialPortLink;

    fn open(&mut self, port: &str, baud_rate: u32) -> Result<Self::Link, LinkError> {
        SerialPortLink::open(port, baud_rate)
    }
}

pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    path: String,
    sync: FrameSync,
    read_buf: [u8; 256],
}

impl SerialPortLink {
    /// Open a serial port
    ///
    /// # Parameters
    /// - `path`: device path (e.g. "/dev/ttyUSB0")
    /// - `baud_rate`: e.g. 115200
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_SLICE)
            .open()?;

        info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(Self {
            port,
            path: path.to_string(),
            sync: FrameSync::new(),
            read_buf: [0u8; 256],
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SerialLink for SerialPortLink {
    fn read_frame(&mut self, timeout: Duration) -> Result<Bytes, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.sync.next_frame() {
                Some(Ok(frame)) => return Ok(Bytes::copy_from_slice(&frame)),
                Some(Err(e)) => {
                    trace!("Serial framing error on {}: {}", self.path, e);
                    return Err(LinkError::Framing(e));
                },
                None => {},
            }

            if Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }

            match self.port.read(&mut self.read_buf) {
                Ok(0) => {},
                Ok(n) => self.sync.push(&self.read_buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                Err(e) => return Err(LinkError::from_io(e)),
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.port.write_all(frame).map_err(LinkError::from_io)?;
        self.port.flush().map_err(LinkError::from_io)?;
        Ok(())
    }

    fn close(&mut self) {
        debug!(
            "Closing serial port {} ({} buffered bytes dropped)",
            self.path,
            self.sync.pending()
        );
        self.sync.clear();
    }
}
