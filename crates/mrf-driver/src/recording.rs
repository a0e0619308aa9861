//! Transition recorder
//!
//! A [`StateObserver`] that forwards every transition into a bounded channel.
//! When the queue is full the new event is dropped and counted; the observing
//! thread never blocks.
//!
//! # Example
//!
//! ```rust
//! use mrf_driver::recording::{TransitionEvent, TransitionRecorder};
//! use mrf_driver::hooks::StateObserver;
//! use mrf_protocol::RobotState;
//!
//! let (recorder, rx) = TransitionRecorder::new(1024);
//! let dropped = recorder.dropped_events().clone();
//!
//! recorder.on_robot_transition(RobotState::Idle, RobotState::Running);
//! match rx.try_recv().unwrap() {
//!     TransitionEvent::Robot { to, .. } => assert_eq!(to, RobotState::Running),
//!     _ => unreachable!(),
//! }
//! assert_eq!(dropped.load(std::sync::atomic::Ordering::Relaxed), 0);
//! ```

use crate::clock;
use crate::hooks::StateObserver;
use crossbeam_channel::{Receiver, Sender, bounded};
use mrf_protocol::{Channel, CommStatus, RobotState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A recorded transition, stamped with monotonic micros
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEvent {
    Comm {
        timestamp_us: u64,
        channel: Channel,
        from: CommStatus,
        to: CommStatus,
    },
    Robot {
        timestamp_us: u64,
        from: RobotState,
        to: RobotState,
    },
}

impl TransitionEvent {
    pub fn timestamp_us(&self) -> u64 {
        match self {
            TransitionEvent::Comm { timestamp_us, .. }
            | TransitionEvent::Robot { timestamp_us, .. } => *timestamp_us,
        }
    }
}

pub struct TransitionRecorder {
    tx: Sender<TransitionEvent>,
    dropped_events: Arc<AtomicU64>,
    event_counter: Arc<AtomicU64>,
}

impl TransitionRecorder {
    /// # Returns
    /// The recorder and the receiving end of its queue
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<TransitionEvent>) {
        let (tx, rx) = bounded(capacity);
        let recorder = Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
            event_counter: Arc::new(AtomicU64::new(0)),
        };
        (recorder, rx)
    }

    /// Counter of events lost to a full or closed queue
    #[must_use]
    pub fn dropped_events(&self) -> &Arc<AtomicU64> {
        &self.dropped_events
    }

    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }

    fn record(&self, event: TransitionEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        } else {
            self.event_counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl StateObserver for TransitionRecorder {
    #[inline]
    fn on_comm_transition(&self, channel: Channel, from: CommStatus, to: CommStatus) {
        self.record(TransitionEvent::Comm {
            timestamp_us: clock::monotonic_micros(),
            channel,
            from,
            to,
        });
    }

    #[inline]
    fn on_robot_transition(&self, from: RobotState, to: RobotState) {
        self.record(TransitionEvent::Robot {
            timestamp_us: clock::monotonic_micros(),
            from,
            to,
        });
    }
}
