//! Driver error types

use crate::comm::CommTransitionError;
use crate::robot_state::RobotTransitionError;
use mrf_link::LinkError;
use mrf_protocol::ProtocolError;
use thiserror::Error;

/// Driver error type
#[derive(Error, Debug)]
pub enum DriverError {
    /// Collaborator link error
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Wire format error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration rejected by `validate()` or unparsable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Communication status transition outside the allowed table
    #[error("{0}")]
    CommTransition(#[from] CommTransitionError),

    /// Robot command that does not match the transition table
    #[error("{0}")]
    InvalidTransition(#[from] RobotTransitionError),

    /// Command channel closed (control thread exited)
    #[error("Command channel closed")]
    ChannelClosed,

    /// Command channel full
    #[error("Command channel full")]
    ChannelFull,

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Worker or control thread failure
    #[error("IO thread error: {0}")]
    IoThread(String),
}
