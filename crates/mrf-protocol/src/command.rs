//! Operator command protocol (TCP)
//!
//! One command per LF-terminated line, case-insensitive:
//!
//! ```text
//! START | PAUSE | RESUME | ACK | SHUTDOWN | STOP | STATUS | MOVE <speed> <angle>
//! ```
//!
//! Replies are single lines: `OK <CMD>`, `ERR <reason>`, or a JSON status report.

use crate::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Commands accepted from the operator link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// IDLE -> RUNNING
    Start,
    /// RUNNING -> PAUSED
    Pause,
    /// PAUSED -> RUNNING
    Resume,
    /// Recovery acknowledged: ERROR -> IDLE
    Ack,
    /// Any -> SHUTDOWN
    Shutdown,
    /// Set the drive setpoint (speed and steering, -100..=100)
    Move { speed: i16, angle: i16 },
    /// Zero the drive setpoint
    Stop,
    /// Request a status report (answered by the link worker, never queued)
    Status,
}

impl OperatorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::Start => "START",
            OperatorCommand::Pause => "PAUSE",
            OperatorCommand::Resume => "RESUME",
            OperatorCommand::Ack => "ACK",
            OperatorCommand::Shutdown => "SHUTDOWN",
            OperatorCommand::Move { .. } => "MOVE",
            OperatorCommand::Stop => "STOP",
            OperatorCommand::Status => "STATUS",
        }
    }

    /// Parse one line (with or without the trailing newline)
    pub fn parse_line(line: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(line)
            .map_err(|e| ProtocolError::ParseError(format!("non-UTF-8 command: {}", e)))?;
        text.parse()
    }
}

impl FromStr for OperatorCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err(ProtocolError::ParseError("empty command".to_string()));
        };

        let cmd = match verb.to_ascii_uppercase().as_str() {
            "START" => OperatorCommand::Start,
            "PAUSE" => OperatorCommand::Pause,
            "RESUME" => OperatorCommand::Resume,
            "ACK" => OperatorCommand::Ack,
            "SHUTDOWN" => OperatorCommand::Shutdown,
            "STOP" => OperatorCommand::Stop,
            "STATUS" => OperatorCommand::Status,
            "MOVE" => {
                let speed = parse_setpoint(parts.next(), "speed")?;
                let angle = parse_setpoint(parts.next(), "angle")?;
                OperatorCommand::Move { speed, angle }
            },
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };

        if let Some(extra) = parts.next() {
            return Err(ProtocolError::ParseError(format!(
                "unexpected argument '{}' for {}",
                extra,
                cmd.name()
            )));
        }

        Ok(cmd)
    }
}

fn parse_setpoint(token: Option<&str>, field: &str) -> Result<i16, ProtocolError> {
    let token =
        token.ok_or_else(|| ProtocolError::ParseError(format!("MOVE requires <{}>", field)))?;
    let value: i64 = token
        .parse()
        .map_err(|_| ProtocolError::ParseError(format!("invalid {} '{}'", field, token)))?;
    if !(-100..=100).contains(&value) {
        return Err(ProtocolError::InvalidValue {
            field: field.to_string(),
            value,
        });
    }
    Ok(value as i16)
}

/// Reply line sent back to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(&'static str),
    Err(String),
    Status(String),
}

impl Reply {
    /// Encode as a LF-terminated line
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = self.to_string().into_bytes();
        line.push(b'\n');
        line
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok(name) => write!(f, "OK {}", name),
            Reply::Err(reason) => write!(f, "ERR {}", reason),
            Reply::Status(json) => f.write_str(json),
        }
    }
}

/// LF line splitter with a length limit
///
/// A line longer than `max_line` is a framing violation; the partial line is discarded.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    max_line: usize,
}

impl LineBuffer {
    pub const DEFAULT_MAX_LINE: usize = 256;

    pub fn new(max_line: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_line),
            max_line,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line without the terminator (`\r\n` tolerated)
    pub fn next_line(&mut self) -> Option<Result<Vec<u8>, ProtocolError>> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > self.max_line {
                    return Some(Err(ProtocolError::InvalidLength {
                        expected: self.max_line,
                        actual: line.len(),
                    }));
                }
                Some(Ok(line))
            },
            None if self.buffer.len() > self.max_line => {
                let actual = self.buffer.len();
                self.buffer.clear();
                Some(Err(ProtocolError::InvalidLength {
                    expected: self.max_line,
                    actual,
                }))
            },
            None => None,
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_LINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("start".parse::<OperatorCommand>().unwrap(), OperatorCommand::Start);
        assert_eq!("  PAUSE ".parse::<OperatorCommand>().unwrap(), OperatorCommand::Pause);
        assert_eq!("Resume".parse::<OperatorCommand>().unwrap(), OperatorCommand::Resume);
        assert_eq!("ack".parse::<OperatorCommand>().unwrap(), OperatorCommand::Ack);
        assert_eq!(
            "shutdown".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Shutdown
        );
        assert_eq!("STATUS".parse::<OperatorCommand>().unwrap(), OperatorCommand::Status);
    }

    #[test]
    fn test_parse_move() {
        assert_eq!(
            "MOVE 60 -20".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Move {
                speed: 60,
                angle: -20
            }
        );
        assert!(matches!(
            "MOVE 150 0".parse::<OperatorCommand>(),
            Err(ProtocolError::InvalidValue { .. })
        ));
        assert!(matches!(
            "MOVE 10".parse::<OperatorCommand>(),
            Err(ProtocolError::ParseError(_))
        ));
        assert!(matches!(
            "MOVE fast 0".parse::<OperatorCommand>(),
            Err(ProtocolError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_and_extra_tokens() {
        assert!(matches!(
            "JUMP".parse::<OperatorCommand>(),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            "START now".parse::<OperatorCommand>(),
            Err(ProtocolError::ParseError(_))
        ));
        assert!("".parse::<OperatorCommand>().is_err());
        assert!(OperatorCommand::parse_line(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_reply_lines() {
        assert_eq!(Reply::Ok("START").to_line(), b"OK START\n".to_vec());
        assert_eq!(
            Reply::Err("bad".to_string()).to_string(),
            "ERR bad".to_string()
        );
    }

    #[test]
    fn test_line_buffer_splits_and_limits() {
        let mut lines = LineBuffer::new(16);
        lines.push(b"START\r\nMOV");
        assert_eq!(lines.next_line().unwrap().unwrap(), b"START".to_vec());
        assert!(lines.next_line().is_none());
        lines.push(b"E 1 2\n");
        assert_eq!(lines.next_line().unwrap().unwrap(), b"MOVE 1 2".to_vec());

        lines.push(&[b'x'; 40]);
        assert!(matches!(
            lines.next_line(),
            Some(Err(ProtocolError::InvalidLength { actual: 40, .. }))
        ));
        assert!(lines.next_line().is_none());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Arbitrary input lines parse or fail, never panic
            #[test]
            fn prop_parse_line_total(line in proptest::collection::vec(any::<u8>(), 0..64)) {
                let _ = OperatorCommand::parse_line(&line);
            }

            /// Case does not matter for command words
            #[test]
            fn prop_move_parses_any_case(speed in -100i16..=100, angle in -100i16..=100, upper in any::<bool>()) {
                let word = if upper { "MOVE" } else { "move" };
                let line = format!("{} {} {}", word, speed, angle);
                prop_assert_eq!(
                    OperatorCommand::parse_line(line.as_bytes()).unwrap(),
                    OperatorCommand::Move { speed, angle }
                );
            }
        }
    }
}
