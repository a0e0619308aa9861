//! Basic actuator sinks

use crate::{ActuatorDecision, ActuatorSink};
use mrf_protocol::MotorCommand;
use tracing::info;

/// Discards every decision
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActuatorSink for NullSink {
    fn apply(&mut self, _decision: &ActuatorDecision) {}
}

/// Logs decisions whenever the motor command changes
#[derive(Debug, Default)]
pub struct LogSink {
    last: Option<MotorCommand>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActuatorSink for LogSink {
    fn apply(&mut self, decision: &ActuatorDecision) {
        if self.last != Some(decision.motor) {
            info!(
                "Actuator: tick={} state={} left={} right={}",
                decision.tick, decision.state, decision.motor.left, decision.motor.right
            );
            self.last = Some(decision.motor);
        }
    }
}
