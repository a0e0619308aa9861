//! # MRF Protocol
//!
//! Wire formats of the micro robot framework (no hardware dependency).
//!
//! ## Modules
//!
//! - `telemetry`: serial telemetry frame (IMU + encoders + environment + battery)
//! - `motor`: differential motor command frame
//! - `command`: line-based operator command protocol (TCP)
//! - `state`: `RobotState` / `CommStatus` enums shared by every layer
//! - `status`: JSON status report sent in reply to `STATUS`
//!
//! ## Byte order
//!
//! The serial link is little-endian (the microcontroller packs `<h` values).

pub mod command;
pub mod motor;
pub mod state;
pub mod status;
pub mod telemetry;

pub use command::{LineBuffer, OperatorCommand, Reply};
pub use motor::{MOTOR_HEADER, MotorCommand};
pub use state::{Channel, CommStatus, RobotState};
pub use status::StatusReport;
pub use telemetry::{
    FrameSync, ImuRaw, TELEMETRY_FRAME_LEN, TELEMETRY_HEADER, TELEMETRY_PAYLOAD_LEN,
    TelemetryPacket,
};

use thiserror::Error;

/// Protocol parse error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid header: expected 0x{expected:02X}, got 0x{actual:02X}")]
    InvalidHeader { expected: u8, actual: u8 },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: i64 },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ProtocolError {
    /// Framing violations (header/length/checksum) are link-level faults;
    /// everything else is a payload decode problem.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidLength { .. }
                | ProtocolError::InvalidHeader { .. }
                | ProtocolError::ChecksumMismatch { .. }
        )
    }
}

/// XOR checksum over a byte slice
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Little-endian bytes to i16
pub fn bytes_to_i16_le(bytes: [u8; 2]) -> i16 {
    i16::from_le_bytes(bytes)
}

/// Little-endian bytes to u16
pub fn bytes_to_u16_le(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_i16_le() {
        assert_eq!(bytes_to_i16_le([0x34, 0x12]), 0x1234);
        assert_eq!(bytes_to_i16_le([0xFF, 0xFF]), -1);
    }

    #[test]
    fn test_bytes_to_u16_le() {
        assert_eq!(bytes_to_u16_le([0xFF, 0xFF]), u16::MAX);
        assert_eq!(bytes_to_u16_le([0x01, 0x00]), 1);
    }

    #[test]
    fn test_xor_checksum() {
        assert_eq!(xor_checksum(&[]), 0);
        assert_eq!(xor_checksum(&[0x0F, 0xF0]), 0xFF);
        assert_eq!(xor_checksum(&[0xAA, 0xAA]), 0);
    }

    #[test]
    fn test_framing_classification() {
        assert!(
            ProtocolError::ChecksumMismatch {
                expected: 1,
                actual: 2
            }
            .is_framing()
        );
        assert!(
            ProtocolError::InvalidHeader {
                expected: 0xF5,
                actual: 0
            }
            .is_framing()
        );
        assert!(
            !ProtocolError::InvalidValue {
                field: "humidity".to_string(),
                value: 20000
            }
            .is_framing()
        );
        assert!(!ProtocolError::UnknownCommand("JUMP".to_string()).is_framing());
    }
}
