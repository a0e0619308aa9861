//! Hook system
//!
//! Observers are notified of every committed comm and robot transition.
//!
//! Callbacks run on the thread that made the transition (a worker or the
//! control loop) and must not block; forward to a channel with `try_send`
//! for anything heavier. See [`crate::recording::TransitionRecorder`].
//!
//! # Example
//!
//! ```rust
//! use mrf_driver::hooks::{HookManager, StateObserver};
//! use mrf_driver::recording::TransitionRecorder;
//! use mrf_protocol::RobotState;
//! use std::sync::Arc;
//!
//! let mut hooks = HookManager::new();
//! let (recorder, rx) = TransitionRecorder::new(16);
//! hooks.add_observer(Arc::new(recorder));
//!
//! hooks.trigger_robot(RobotState::Idle, RobotState::Running);
//! assert!(rx.try_recv().is_ok());
//! ```

use mrf_link::ActuatorDecision;
use mrf_protocol::{Channel, CommStatus, RobotState};
use std::sync::Arc;

/// Transition observer
///
/// All methods have empty defaults; implement the ones you need.
pub trait StateObserver: Send + Sync {
    /// A channel's comm status changed
    fn on_comm_transition(&self, channel: Channel, from: CommStatus, to: CommStatus) {
        let _ = (channel, from, to);
    }

    /// The robot state changed
    fn on_robot_transition(&self, from: RobotState, to: RobotState) {
        let _ = (from, to);
    }

    /// The control loop forwarded a decision to the actuator sink
    fn on_actuator_decision(&self, decision: &ActuatorDecision) {
        let _ = decision;
    }
}

/// Runtime observer list
///
/// Not synchronized itself; the context keeps it behind a `RwLock`.
#[derive(Default)]
pub struct HookManager {
    observers: Vec<Arc<dyn StateObserver>>,
}

impl HookManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn StateObserver>) {
        self.observers.push(observer);
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    pub fn trigger_comm(&self, channel: Channel, from: CommStatus, to: CommStatus) {
        for observer in self.observers.iter() {
            observer.on_comm_transition(channel, from, to);
        }
    }

    pub fn trigger_robot(&self, from: RobotState, to: RobotState) {
        for observer in self.observers.iter() {
            observer.on_robot_transition(from, to);
        }
    }

    pub fn trigger_actuator(&self, decision: &ActuatorDecision) {
        for observer in self.observers.iter() {
            observer.on_actuator_decision(decision);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    struct CountingObserver {
        comm: AtomicU64,
        robot: AtomicU64,
    }

    impl StateObserver for CountingObserver {
        fn on_comm_transition(&self, _channel: Channel, _from: CommStatus, _to: CommStatus) {
            self.comm.fetch_add(1, Ordering::Relaxed);
        }

        fn on_robot_transition(&self, _from: RobotState, _to: RobotState) {
            self.robot.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_hook_manager_add_and_clear() {
        let mut hooks = HookManager::new();
        assert!(hooks.is_empty());
        hooks.add_observer(Arc::new(CountingObserver::default()));
        assert_eq!(hooks.len(), 1);
        hooks.clear();
        assert!(hooks.is_empty());
    }

    #[test]
    fn test_hook_manager_triggers() {
        let mut hooks = HookManager::new();
        let observer = Arc::new(CountingObserver::default());
        hooks.add_observer(observer.clone());

        hooks.trigger_comm(Channel::Serial, CommStatus::Disconnected, CommStatus::Connecting);
        hooks.trigger_robot(RobotState::Idle, RobotState::Running);
        hooks.trigger_robot(RobotState::Running, RobotState::Paused);
        // Default method is a no-op
        hooks.trigger_actuator(&ActuatorDecision::stop(0, RobotState::Idle));

        assert_eq!(observer.comm.load(Ordering::Relaxed), 1);
        assert_eq!(observer.robot.load(Ordering::Relaxed), 2);
    }
}
