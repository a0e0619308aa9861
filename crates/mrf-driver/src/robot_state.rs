//! Robot state machine
//!
//! | From | Event | To |
//! |---|---|---|
//! | IDLE | `Start` + required comms CONNECTED | RUNNING |
//! | RUNNING | `Pause` | PAUSED |
//! | PAUSED | `Resume` + required comms CONNECTED | RUNNING |
//! | RUNNING / PAUSED | `Fault` | ERROR |
//! | ERROR | `Ack` + required comms CONNECTED | IDLE |
//! | any | `Shutdown` | SHUTDOWN |
//!
//! [`transition`] is a pure function; only the control loop commits its
//! result to the shared [`AtomicRobotState`].

use mrf_protocol::{OperatorCommand, RobotState};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Inputs to the robot state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotEvent {
    Start,
    Pause,
    Resume,
    /// Recovery acknowledged
    Ack,
    Shutdown,
    /// Comm error, stale data or a worker fault
    Fault,
}

impl RobotEvent {
    /// State-changing operator commands; `None` for setpoint and query commands
    pub fn from_command(command: &OperatorCommand) -> Option<Self> {
        match command {
            OperatorCommand::Start => Some(RobotEvent::Start),
            OperatorCommand::Pause => Some(RobotEvent::Pause),
            OperatorCommand::Resume => Some(RobotEvent::Resume),
            OperatorCommand::Ack => Some(RobotEvent::Ack),
            OperatorCommand::Shutdown => Some(RobotEvent::Shutdown),
            OperatorCommand::Move { .. } | OperatorCommand::Stop | OperatorCommand::Status => {
                None
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RobotEvent::Start => "START",
            RobotEvent::Pause => "PAUSE",
            RobotEvent::Resume => "RESUME",
            RobotEvent::Ack => "ACK",
            RobotEvent::Shutdown => "SHUTDOWN",
            RobotEvent::Fault => "FAULT",
        }
    }
}

impl fmt::Display for RobotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event that does not match a row of the table; the state is unchanged
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{event} rejected in {from}: {reason}")]
pub struct RobotTransitionError {
    pub from: RobotState,
    pub event: RobotEvent,
    pub reason: &'static str,
}

/// Evaluate one event against the transition table
///
/// # Parameters
/// - `from`: current state
/// - `event`: incoming event
/// - `comms_ready`: every required channel is CONNECTED right now
///
/// # Returns
/// The next state (which may equal `from` for absorbed events such as a fault
/// while already in ERROR), or the reason the event was rejected.
pub fn transition(
    from: RobotState,
    event: RobotEvent,
    comms_ready: bool,
) -> Result<RobotState, RobotTransitionError> {
    let reject = |reason| RobotTransitionError {
        from,
        event,
        reason,
    };

    if from == RobotState::Shutdown {
        return match event {
            RobotEvent::Shutdown | RobotEvent::Fault => Ok(RobotState::Shutdown),
            _ => Err(reject("robot is shut down")),
        };
    }

    match (from, event) {
        (_, RobotEvent::Shutdown) => Ok(RobotState::Shutdown),

        (RobotState::Running | RobotState::Paused, RobotEvent::Fault) => Ok(RobotState::Error),
        // Nothing is moving outside RUNNING/PAUSED; START and ACK stay gated on comms
        (_, RobotEvent::Fault) => Ok(from),

        (RobotState::Idle, RobotEvent::Start) if comms_ready => Ok(RobotState::Running),
        (RobotState::Idle, RobotEvent::Start) => Err(reject("required channels not connected")),

        (RobotState::Running, RobotEvent::Pause) => Ok(RobotState::Paused),

        (RobotState::Paused, RobotEvent::Resume) if comms_ready => Ok(RobotState::Running),
        (RobotState::Paused, RobotEvent::Resume) => {
            Err(reject("required channels not connected"))
        },

        (RobotState::Error, RobotEvent::Ack) if comms_ready => Ok(RobotState::Idle),
        (RobotState::Error, RobotEvent::Ack) => Err(reject("required channels not connected")),

        (_, RobotEvent::Start) => Err(reject("robot is not idle")),
        (_, RobotEvent::Pause) => Err(reject("robot is not running")),
        (_, RobotEvent::Resume) => Err(reject("robot is not paused")),
        (_, RobotEvent::Ack) => Err(reject("robot is not in error")),
    }
}

/// Robot state shared between the control loop (writer) and everyone else
#[derive(Debug)]
pub struct AtomicRobotState {
    inner: AtomicU8,
}

impl AtomicRobotState {
    pub fn new(state: RobotState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> RobotState {
        RobotState::try_from(self.inner.load(Ordering::Acquire)).unwrap_or(RobotState::Error)
    }

    /// Store a new state (control loop only)
    pub(crate) fn set(&self, state: RobotState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }
}

impl Default for AtomicRobotState {
    fn default() -> Self {
        Self::new(RobotState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STATES: [RobotState; 5] = [
        RobotState::Idle,
        RobotState::Running,
        RobotState::Paused,
        RobotState::Error,
        RobotState::Shutdown,
    ];

    const EVENTS: [RobotEvent; 6] = [
        RobotEvent::Start,
        RobotEvent::Pause,
        RobotEvent::Resume,
        RobotEvent::Ack,
        RobotEvent::Shutdown,
        RobotEvent::Fault,
    ];

    #[test]
    fn test_table_rows() {
        assert_eq!(
            transition(RobotState::Idle, RobotEvent::Start, true),
            Ok(RobotState::Running)
        );
        assert_eq!(
            transition(RobotState::Running, RobotEvent::Pause, true),
            Ok(RobotState::Paused)
        );
        assert_eq!(
            transition(RobotState::Paused, RobotEvent::Resume, true),
            Ok(RobotState::Running)
        );
        assert_eq!(
            transition(RobotState::Running, RobotEvent::Fault, true),
            Ok(RobotState::Error)
        );
        assert_eq!(
            transition(RobotState::Paused, RobotEvent::Fault, true),
            Ok(RobotState::Error)
        );
        assert_eq!(
            transition(RobotState::Error, RobotEvent::Ack, true),
            Ok(RobotState::Idle)
        );
        for state in STATES {
            assert_eq!(
                transition(state, RobotEvent::Shutdown, false),
                Ok(RobotState::Shutdown)
            );
        }
    }

    #[test]
    fn test_comms_gate() {
        let err = transition(RobotState::Idle, RobotEvent::Start, false).unwrap_err();
        assert_eq!(err.from, RobotState::Idle);
        assert!(transition(RobotState::Paused, RobotEvent::Resume, false).is_err());
        assert!(transition(RobotState::Error, RobotEvent::Ack, false).is_err());
    }

    #[test]
    fn test_rejections() {
        assert!(transition(RobotState::Idle, RobotEvent::Pause, true).is_err());
        assert!(transition(RobotState::Running, RobotEvent::Start, true).is_err());
        assert!(transition(RobotState::Idle, RobotEvent::Ack, true).is_err());
        assert!(transition(RobotState::Shutdown, RobotEvent::Start, true).is_err());
        let err = transition(RobotState::Running, RobotEvent::Resume, true).unwrap_err();
        assert_eq!(err.to_string(), "RESUME rejected in RUNNING: robot is not paused");
    }

    #[test]
    fn test_fault_absorbed_outside_motion() {
        assert_eq!(
            transition(RobotState::Idle, RobotEvent::Fault, false),
            Ok(RobotState::Idle)
        );
        assert_eq!(
            transition(RobotState::Error, RobotEvent::Fault, false),
            Ok(RobotState::Error)
        );
    }

    #[test]
    fn test_from_command() {
        assert_eq!(
            RobotEvent::from_command(&OperatorCommand::Start),
            Some(RobotEvent::Start)
        );
        assert_eq!(
            RobotEvent::from_command(&OperatorCommand::Move { speed: 1, angle: 2 }),
            None
        );
        assert_eq!(RobotEvent::from_command(&OperatorCommand::Status), None);
    }

    #[test]
    fn test_atomic_robot_state() {
        let state = AtomicRobotState::default();
        assert_eq!(state.get(), RobotState::Idle);
        state.set(RobotState::Running);
        assert_eq!(state.get(), RobotState::Running);
    }

    proptest! {
        /// RUNNING is only ever entered with comms ready, and SHUTDOWN is never left
        #[test]
        fn prop_safety(steps in proptest::collection::vec((0usize..6, any::<bool>()), 0..100)) {
            let mut state = RobotState::Idle;
            for (event_index, comms_ready) in steps {
                let event = EVENTS[event_index];
                match transition(state, event, comms_ready) {
                    Ok(next) => {
                        if next == RobotState::Running && state != RobotState::Running {
                            prop_assert!(comms_ready);
                        }
                        if state == RobotState::Shutdown {
                            prop_assert_eq!(next, RobotState::Shutdown);
                        }
                        state = next;
                    },
                    Err(e) => prop_assert_eq!(e.from, state),
                }
            }
        }
    }
}
