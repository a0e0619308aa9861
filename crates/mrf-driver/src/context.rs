//! Shared runtime context
//!
//! One `Arc<RobotContext>` is handed to every worker and to the control loop.
//! It owns the telemetry store, both comm state machines, the robot state,
//! metrics, the published odometry and the observer list. Nothing in here is
//! a global; tests build as many contexts as they like.

use crate::comm::{CommChannel, CommTransitionError};
use crate::config::{RobotConfig, RuntimeConfig};
use crate::hooks::HookManager;
use crate::metrics::RuntimeMetrics;
use crate::odometry::OdometrySnapshot;
use crate::robot_state::AtomicRobotState;
use crate::store::TelemetryStore;
use arc_swap::ArcSwap;
use mrf_protocol::{Channel, CommStatus, RobotState, StatusReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Readers get everything; comm status is written only inside the runtime
/// by the worker owning the channel:
///
/// ```compile_fail
/// use mrf_driver::{RobotConfig, RobotContext, RuntimeConfig};
/// use mrf_protocol::{Channel, CommStatus};
/// use std::sync::Arc;
///
/// let ctx = RobotContext::new(Arc::new(RobotConfig::default()), RuntimeConfig::default());
/// let _ = ctx.set_comm(Channel::Serial, CommStatus::Connecting);
/// ```
pub struct RobotContext {
    /// Hardware configuration, never mutated after start
    pub config: Arc<RobotConfig>,
    pub runtime: RuntimeConfig,
    pub store: TelemetryStore,
    pub serial: CommChannel,
    pub tcp: CommChannel,
    /// Written only by the control loop
    pub robot_state: AtomicRobotState,
    pub metrics: RuntimeMetrics,
    /// Published by the control loop after every odometry update
    pub odometry: ArcSwap<OdometrySnapshot>,
    /// Set by any thread, consumed by the control loop
    pub odometry_reset_requested: AtomicBool,
    pub hooks: RwLock<HookManager>,
}

impl RobotContext {
    pub fn new(config: Arc<RobotConfig>, runtime: RuntimeConfig) -> Self {
        Self {
            config,
            runtime,
            store: TelemetryStore::new(),
            serial: CommChannel::new(Channel::Serial),
            tcp: CommChannel::new(Channel::Tcp),
            robot_state: AtomicRobotState::default(),
            metrics: RuntimeMetrics::new(),
            odometry: ArcSwap::from_pointee(OdometrySnapshot::default()),
            odometry_reset_requested: AtomicBool::new(false),
            hooks: RwLock::new(HookManager::new()),
        }
    }

    pub fn comm(&self, channel: Channel) -> &CommChannel {
        match channel {
            Channel::Serial => &self.serial,
            Channel::Tcp => &self.tcp,
        }
    }

    pub fn comm_status(&self, channel: Channel) -> CommStatus {
        self.comm(channel).status()
    }

    /// Transition a channel, log it and notify observers
    ///
    /// Only the worker owning `channel` calls this.
    pub(crate) fn set_comm(
        &self,
        channel: Channel,
        to: CommStatus,
    ) -> Result<CommStatus, CommTransitionError> {
        let comm = self.comm(channel);
        let held = comm.time_in_status();
        match comm.transition(to) {
            Ok(from) => {
                info!("{} link: {} -> {} (after {:.1?})", channel, from, to, held);
                if let Ok(hooks) = self.hooks.read() {
                    hooks.trigger_comm(channel, from, to);
                }
                Ok(from)
            },
            Err(e) => {
                warn!("{}", e);
                Err(e)
            },
        }
    }

    /// Every required channel is CONNECTED right now
    pub fn comms_ready(&self) -> bool {
        self.runtime
            .required_channels
            .iter()
            .all(|&channel| self.comm(channel).is_connected())
    }

    /// Required channels that are not CONNECTED
    pub fn unready_channels(&self) -> Vec<(Channel, CommStatus)> {
        self.runtime
            .required_channels
            .iter()
            .map(|&channel| (channel, self.comm_status(channel)))
            .filter(|(_, status)| !status.is_connected())
            .collect()
    }

    pub fn robot_state(&self) -> RobotState {
        self.robot_state.get()
    }

    /// Commit a robot state computed by the transition table
    ///
    /// Control loop only. A no-op when `to` equals the current state.
    pub(crate) fn commit_robot_state(&self, to: RobotState) -> RobotState {
        let from = self.robot_state.get();
        if from != to {
            self.robot_state.set(to);
            info!("Robot state: {} -> {}", from, to);
            if let Ok(hooks) = self.hooks.read() {
                hooks.trigger_robot(from, to);
            }
        }
        from
    }

    pub fn odometry(&self) -> OdometrySnapshot {
        **self.odometry.load()
    }

    /// Ask the control loop to zero the pose on its next tick
    pub fn request_odometry_reset(&self) {
        self.odometry_reset_requested.store(true, Ordering::Release);
    }

    pub fn status_report(&self) -> StatusReport {
        let (sensor, sensor_version) = self.store.read_sensor();
        let pose = self.odometry().pose;
        StatusReport {
            robot_state: self.robot_state(),
            serial: self.serial.status(),
            tcp: self.tcp.status(),
            sensor_version,
            image_version: self.store.image_version(),
            battery_voltage: sensor.battery_voltage,
            pose: [pose.x, pose.y, pose.theta],
        }
    }
}
