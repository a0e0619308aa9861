//! Operator link over TCP
//!
//! The runtime connects out to the operator endpoint. Commands arrive as
//! LF-terminated lines; replies are written back on the same stream.

use crate::{CommandLink, LinkError, TcpConnector};
use bytes::Bytes;
use mrf_protocol::LineBuffer;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Smallest socket timeout handed to std (zero means "block forever" there)
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Default, Clone)]
pub struct TcpCommandConnector;

impl TcpConnector for TcpCommandConnector {
    type Link = TcpCommandLink;

    fn connect(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self::Link, LinkError> {
        TcpCommandLink::connect(host, port, timeout)
    }
}

pub struct TcpCommandLink {
    stream: TcpStream,
    peer: SocketAddr,
    lines: LineBuffer,
    read_buf: [u8; 512],
}

impl TcpCommandLink {
    /// Connect with a bounded timeout, trying each resolved address in turn
    ///
    /// `timeout` also bounds every reply write, so a peer that stops reading
    /// cannot stall the caller.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, LinkError> {
        let addrs = (host, port).to_socket_addrs().map_err(LinkError::from_io)?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
                    info!("Connected to operator endpoint {}", addr);
                    return Ok(Self {
                        stream,
                        peer: addr,
                        lines: LineBuffer::default(),
                        read_buf: [0u8; 512],
                    });
                },
                Err(e) => {
                    trace!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                },
            }
        }

        Err(match last_err {
            Some(e) => LinkError::from_io(e),
            None => LinkError::Refused(format!("no address resolved for {}:{}", host, port)),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl CommandLink for TcpCommandLink {
    fn send_command(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(bytes).map_err(LinkError::from_io)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Bytes, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(Bytes::from(line?));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout);
            }

            self.stream
                .set_read_timeout(Some(remaining.max(MIN_READ_TIMEOUT)))?;
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => self.lines.push(&self.read_buf[..n]),
                Err(e) => match LinkError::from_io(e) {
                    LinkError::Timeout => {},
                    other => return Err(other),
                },
            }
        }
    }

    fn close(&mut self) {
        debug!("Closing operator link to {}", self.peer);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
