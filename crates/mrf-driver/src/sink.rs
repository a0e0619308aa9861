//! Motor mailbox
//!
//! The control loop runs at its own rate while motor frames go out on the
//! serial port owned by the serial worker. They meet in a single-entry
//! mailbox: the control loop overwrites, the serial worker takes. Only the
//! newest command matters, so an untaken command is simply replaced.

use crate::context::RobotContext;
use mrf_link::{ActuatorDecision, ActuatorSink};
use mrf_protocol::MotorCommand;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::trace;

/// Single-entry, overwrite-on-write motor command slot
pub type MotorMailbox = Arc<Mutex<Option<MotorCommand>>>;

pub fn motor_mailbox() -> MotorMailbox {
    Arc::new(Mutex::new(None))
}

/// Take the pending motor command, if any
pub fn take_motor_command(mailbox: &MotorMailbox) -> Option<MotorCommand> {
    mailbox.lock().take()
}

/// Put back a command that could not be written
///
/// A newer command queued meanwhile wins.
pub fn requeue_motor_command(mailbox: &MotorMailbox, command: MotorCommand) {
    mailbox.lock().get_or_insert(command);
}

/// Default actuator sink: forwards motor commands to the serial worker
pub struct SerialMotorSink {
    mailbox: MotorMailbox,
    ctx: Arc<RobotContext>,
    last: Option<MotorCommand>,
}

impl SerialMotorSink {
    pub fn new(mailbox: MotorMailbox, ctx: Arc<RobotContext>) -> Self {
        Self {
            mailbox,
            ctx,
            last: None,
        }
    }
}

impl ActuatorSink for SerialMotorSink {
    fn apply(&mut self, decision: &ActuatorDecision) {
        // Repeating an unchanged command is pointless once it has been delivered
        if self.last == Some(decision.motor) && self.mailbox.lock().is_none() {
            return;
        }
        let replaced = self.mailbox.lock().replace(decision.motor);
        if replaced.is_some() {
            self.ctx
                .metrics
                .motor_overwrites
                .fetch_add(1, Ordering::Relaxed);
        }
        trace!(
            "Motor mailbox: left={} right={} (tick {})",
            decision.motor.left, decision.motor.right, decision.tick
        );
        self.last = Some(decision.motor);
    }
}
