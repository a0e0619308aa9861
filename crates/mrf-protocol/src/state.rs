//! State enums shared by the driver, the link layer and the status report
//!
//! All enums are `#[repr(u8)]` so the driver can hold them in single-word atomics.

use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supervisory robot state
///
/// `Shutdown` is terminal: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RobotState {
    #[default]
    Idle = 0,
    Running = 1,
    Paused = 2,
    Error = 3,
    Shutdown = 4,
}

impl RobotState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RobotState::Idle => "IDLE",
            RobotState::Running => "RUNNING",
            RobotState::Paused => "PAUSED",
            RobotState::Error => "ERROR",
            RobotState::Shutdown => "SHUTDOWN",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == RobotState::Shutdown
    }
}

impl TryFrom<u8> for RobotState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(RobotState::Idle),
            1 => Ok(RobotState::Running),
            2 => Ok(RobotState::Paused),
            3 => Ok(RobotState::Error),
            4 => Ok(RobotState::Shutdown),
            _ => Err(ProtocolError::InvalidValue {
                field: "RobotState".to_string(),
                value: value as i64,
            }),
        }
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel communication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CommStatus {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Error = 3,
}

impl CommStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommStatus::Disconnected => "DISCONNECTED",
            CommStatus::Connecting => "CONNECTING",
            CommStatus::Connected => "CONNECTED",
            CommStatus::Error => "ERROR",
        }
    }

    pub fn is_connected(self) -> bool {
        self == CommStatus::Connected
    }
}

impl TryFrom<u8> for CommStatus {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(CommStatus::Disconnected),
            1 => Ok(CommStatus::Connecting),
            2 => Ok(CommStatus::Connected),
            3 => Ok(CommStatus::Error),
            _ => Err(ProtocolError::InvalidValue {
                field: "CommStatus".to_string(),
                value: value as i64,
            }),
        }
    }
}

impl fmt::Display for CommStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Communication channels that carry a `CommStatus`
///
/// The camera has no link state of its own; its health is judged by image staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Serial,
    Tcp,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Serial, Channel::Tcp];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Serial => "serial",
            Channel::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robot_state_conversions() {
        for state in [
            RobotState::Idle,
            RobotState::Running,
            RobotState::Paused,
            RobotState::Error,
            RobotState::Shutdown,
        ] {
            assert_eq!(RobotState::try_from(state.as_u8()).unwrap(), state);
        }
        assert!(RobotState::try_from(5).is_err());
        assert_eq!(RobotState::default(), RobotState::Idle);
        assert!(RobotState::Shutdown.is_terminal());
        assert!(!RobotState::Error.is_terminal());
    }

    #[test]
    fn test_comm_status_conversions() {
        assert_eq!(CommStatus::try_from(2).unwrap(), CommStatus::Connected);
        assert!(CommStatus::try_from(9).is_err());
        assert_eq!(CommStatus::default(), CommStatus::Disconnected);
        assert!(CommStatus::Connected.is_connected());
        assert!(!CommStatus::Connecting.is_connected());
    }

    #[test]
    fn test_display_and_serde_names_agree() {
        let json = serde_json::to_string(&RobotState::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
        assert_eq!(RobotState::Running.to_string(), "RUNNING");

        let json = serde_json::to_string(&CommStatus::Disconnected).unwrap();
        assert_eq!(json, "\"DISCONNECTED\"");

        let json = serde_json::to_string(&Channel::Tcp).unwrap();
        assert_eq!(json, "\"tcp\"");
    }
}
