//! Control loop
//!
//! The single consumer of the telemetry store and the only writer of the
//! robot state. Each tick, in order:
//!
//! 1. integrate odometry from a new sensor version, note new images
//! 2. collect fault events, comm health and (when RUNNING) data staleness
//! 3. commit a FAULT transition if anything went wrong
//! 4. process queued operator commands
//! 5. when RUNNING, forward the current setpoint to the actuator sink; on
//!    leaving RUNNING, forward one STOP
//!
//! [`ControlLoop::tick`] takes the current time explicitly so the whole
//! sequence can be driven deterministically in tests.

use crate::clock;
use crate::context::RobotContext;
use crate::error::DriverError;
use crate::metrics::RuntimeMetrics;
use crate::odometry::Odometry;
use crate::pipeline::raise_thread_priority;
use crate::robot_state::{RobotEvent, RobotTransitionError, transition};
use crate::store::is_stale;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use mrf_link::{ActuatorDecision, ActuatorSink, LinkError};
use mrf_protocol::{Channel, MotorCommand, OperatorCommand, Reply, RobotState};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

// ============================================================================
// Commands and faults
// ============================================================================

/// Operator command queued for the control loop
#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: OperatorCommand,
    /// Where the reply goes; `None` for fire-and-forget
    pub reply_tx: Option<Sender<Reply>>,
}

/// Queue a command and wait for the control loop's reply
///
/// # Errors
/// - `DriverError::ChannelFull`: command queue is full
/// - `DriverError::ChannelClosed`: control loop has exited
/// - `DriverError::Timeout`: no reply within `timeout`
pub fn dispatch_command(
    command_tx: &Sender<CommandEnvelope>,
    command: OperatorCommand,
    timeout: Duration,
) -> Result<Reply, DriverError> {
    let (reply_tx, reply_rx) = bounded(1);
    command_tx
        .try_send(CommandEnvelope {
            command,
            reply_tx: Some(reply_tx),
        })
        .map_err(|e| match e {
            TrySendError::Full(_) => DriverError::ChannelFull,
            TrySendError::Disconnected(_) => DriverError::ChannelClosed,
        })?;

    reply_rx.recv_timeout(timeout).map_err(|e| match e {
        RecvTimeoutError::Timeout => DriverError::Timeout,
        RecvTimeoutError::Disconnected => DriverError::ChannelClosed,
    })
}

/// `STATUS` reply built from the current context
pub fn status_reply(ctx: &RobotContext) -> Reply {
    match ctx.status_report().to_json() {
        Ok(json) => Reply::Status(json),
        Err(e) => Reply::Err(format!("status unavailable: {}", e)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSource {
    Link(Channel),
    /// Raised through [`crate::Robot::report_fault`]
    External,
}

impl fmt::Display for FaultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultSource::Link(channel) => write!(f, "{} link", channel),
            FaultSource::External => f.write_str("external"),
        }
    }
}

/// Asynchronous fault signal from a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultEvent {
    pub source: FaultSource,
    pub reason: String,
}

impl FaultEvent {
    pub fn link(channel: Channel, error: &LinkError) -> Self {
        Self {
            source: FaultSource::Link(channel),
            reason: error.to_string(),
        }
    }

    pub fn external(reason: impl Into<String>) -> Self {
        Self {
            source: FaultSource::External,
            reason: reason.into(),
        }
    }
}

/// Fire-and-forget fault signal; a full queue drops the event
pub fn signal_fault(fault_tx: &Sender<FaultEvent>, metrics: &RuntimeMetrics, event: FaultEvent) {
    match fault_tx.try_send(event) {
        Ok(()) => {},
        Err(TrySendError::Full(event)) => {
            metrics.faults_dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Fault queue full, dropped fault from {}", event.source);
        },
        Err(TrySendError::Disconnected(_)) => {
            trace!("Fault queue closed (control loop exited)");
        },
    }
}

// ============================================================================
// Control loop
// ============================================================================

pub struct ControlLoop<A: ActuatorSink> {
    ctx: Arc<RobotContext>,
    sink: A,
    command_rx: Receiver<CommandEnvelope>,
    fault_rx: Receiver<FaultEvent>,
    odometry: Odometry,
    /// Motor command applied every tick while RUNNING
    setpoint: MotorCommand,
    tick: u64,
    last_sensor_version: u64,
    last_image_version: u64,
    /// Capture time of the newest valid image
    last_valid_image_ts: Option<f64>,
    /// A non-STOP decision may still be in effect
    motors_engaged: bool,
}

impl<A: ActuatorSink> ControlLoop<A> {
    pub fn new(
        ctx: Arc<RobotContext>,
        sink: A,
        command_rx: Receiver<CommandEnvelope>,
        fault_rx: Receiver<FaultEvent>,
        odometry: Odometry,
    ) -> Self {
        Self {
            ctx,
            sink,
            command_rx,
            fault_rx,
            odometry,
            setpoint: MotorCommand::STOP,
            tick: 0,
            last_sensor_version: 0,
            last_image_version: 0,
            last_valid_image_ts: None,
            motors_engaged: false,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn setpoint(&self) -> MotorCommand {
        self.setpoint
    }

    /// Run until the shutdown flag is cleared or SHUTDOWN is committed
    pub fn run(mut self, is_running: Arc<AtomicBool>) {
        raise_thread_priority("Control");

        let period = self.ctx.runtime.control_period(&self.ctx.config);
        info!("Control loop: started, period {:?}", period);
        let mut next_tick = Instant::now();

        loop {
            // Acquire: If we see false, we must see all cleanup writes from other threads
            if !is_running.load(Ordering::Acquire) {
                trace!("Control loop: is_running flag is false, shutting down");
                self.shutdown();
                break;
            }

            if !self.tick(clock::monotonic_secs()) {
                // Release: workers that see false also see the SHUTDOWN state
                is_running.store(false, Ordering::Release);
                break;
            }

            next_tick += period;
            let now = Instant::now();
            if now > next_tick {
                self.ctx
                    .metrics
                    .control_overruns
                    .fetch_add(1, Ordering::Relaxed);
                next_tick = now;
            } else {
                spin_sleep::sleep(next_tick - now);
            }
        }

        info!("Control loop: exited after {} ticks", self.tick);
    }

    /// Commit SHUTDOWN and stop the motors
    pub fn shutdown(&mut self) {
        if let Err(e) = self.apply_event(RobotEvent::Shutdown) {
            warn!("Control loop: {}", e);
        }
        self.actuate();
    }

    /// One control cycle at time `now` (monotonic seconds)
    ///
    /// # Returns
    /// `false` once SHUTDOWN has been committed
    pub fn tick(&mut self, now: f64) -> bool {
        self.tick += 1;
        self.ctx.metrics.control_ticks.fetch_add(1, Ordering::Relaxed);

        if self
            .ctx
            .odometry_reset_requested
            .swap(false, Ordering::AcqRel)
        {
            self.odometry.reset();
            self.ctx.odometry.store(Arc::new(self.odometry.snapshot()));
            info!("Odometry reset");
        }
        self.sample();

        if let Some(reason) = self.detect_fault(now) {
            let from = self.ctx.robot_state();
            match self.apply_event(RobotEvent::Fault) {
                Ok(to) if to != from => warn!("Fault in {}: {}", from, reason),
                _ => debug!("Fault absorbed in {}: {}", from, reason),
            }
        }

        while let Ok(envelope) = self.command_rx.try_recv() {
            let reply = self.handle_command(envelope.command, now);
            if let Some(reply_tx) = envelope.reply_tx {
                let _ = reply_tx.try_send(reply);
            }
        }

        self.actuate();

        self.ctx.robot_state() != RobotState::Shutdown
    }

    /// Pull new data out of the store
    fn sample(&mut self) {
        let store = &self.ctx.store;

        let (sensor, version) = store.read_sensor();
        if version != self.last_sensor_version {
            self.last_sensor_version = version;
            if self
                .odometry
                .update(sensor.encoder_left, sensor.encoder_right, sensor.timestamp)
            {
                self.ctx.odometry.store(Arc::new(self.odometry.snapshot()));
            }
        }

        if store.image_version() != self.last_image_version {
            let (image, version) = store.read_image();
            self.last_image_version = version;
            if image.is_valid() {
                self.last_valid_image_ts = Some(image.timestamp);
            }
        }
    }

    /// First reason to fault this tick, if any
    fn detect_fault(&self, now: f64) -> Option<String> {
        let mut reason = None;

        for fault in self.fault_rx.try_iter() {
            let relevant = match fault.source {
                FaultSource::Link(channel) => self.ctx.runtime.is_required(channel),
                FaultSource::External => true,
            };
            if relevant {
                reason.get_or_insert_with(|| format!("{}: {}", fault.source, fault.reason));
            } else {
                debug!("Ignoring fault from optional {}: {}", fault.source, fault.reason);
            }
        }

        let state = self.ctx.robot_state();
        if !matches!(state, RobotState::Running | RobotState::Paused) {
            return reason;
        }

        if let Some((channel, status)) = self.ctx.unready_channels().first() {
            reason.get_or_insert_with(|| format!("{} link is {}", channel, status));
        }

        if state == RobotState::Running
            && let Some(stale) = self.stale_reason(now)
        {
            self.ctx.metrics.stale_faults.fetch_add(1, Ordering::Relaxed);
            reason.get_or_insert(stale);
        }

        reason
    }

    /// Whether a consumed slot is older than its threshold
    ///
    /// The sensor slot is consumed when the serial channel is required; the
    /// image slot when an image threshold is configured. Invalid images do
    /// not refresh the image slot's age.
    fn stale_reason(&self, now: f64) -> Option<String> {
        let runtime = &self.ctx.runtime;

        if runtime.is_required(Channel::Serial) {
            let (sensor, version) = self.ctx.store.read_sensor();
            if is_stale(version, sensor.timestamp, now, runtime.sensor_stale()) {
                return Some(if version == 0 {
                    "no sensor data yet".to_string()
                } else {
                    format!(
                        "sensor data stale ({:.0} ms old)",
                        (now - sensor.timestamp) * 1000.0
                    )
                });
            }
        }

        if let Some(threshold) = runtime.image_stale() {
            match self.last_valid_image_ts {
                Some(ts) if !is_stale(1, ts, now, threshold) => {},
                Some(ts) => {
                    return Some(format!("image data stale ({:.0} ms old)", (now - ts) * 1000.0));
                },
                None => return Some("no valid image yet".to_string()),
            }
        }

        None
    }

    /// Evaluate and commit one event
    fn apply_event(&mut self, event: RobotEvent) -> Result<RobotState, RobotTransitionError> {
        let from = self.ctx.robot_state();
        let to = transition(from, event, self.ctx.comms_ready())?;
        self.commit(from, to);
        Ok(to)
    }

    fn commit(&mut self, from: RobotState, to: RobotState) {
        self.ctx.commit_robot_state(to);
        if from == RobotState::Running && to != RobotState::Running {
            self.setpoint = MotorCommand::STOP;
        }
    }

    fn reject(&self, reason: String) -> Reply {
        self.ctx
            .metrics
            .commands_rejected
            .fetch_add(1, Ordering::Relaxed);
        warn!("Command rejected: {}", reason);
        Reply::Err(reason)
    }

    fn handle_command(&mut self, command: OperatorCommand, now: f64) -> Reply {
        let state = self.ctx.robot_state();
        match command {
            OperatorCommand::Move { speed, angle } => {
                if state != RobotState::Running {
                    return self.reject(format!("MOVE requires RUNNING (state {})", state));
                }
                self.setpoint = MotorCommand::from_speed_angle(speed, angle);
                debug!(
                    "Setpoint: speed={} angle={} -> left={} right={}",
                    speed, angle, self.setpoint.left, self.setpoint.right
                );
                Reply::Ok(command.name())
            },
            OperatorCommand::Stop => {
                self.setpoint = MotorCommand::STOP;
                Reply::Ok(command.name())
            },
            OperatorCommand::Status => status_reply(&self.ctx),
            OperatorCommand::Start
            | OperatorCommand::Pause
            | OperatorCommand::Resume
            | OperatorCommand::Ack
            | OperatorCommand::Shutdown => self.handle_event_command(command, now),
        }
    }

    fn handle_event_command(&mut self, command: OperatorCommand, now: f64) -> Reply {
        let Some(event) = RobotEvent::from_command(&command) else {
            return self.reject(format!("{} is not a state command", command.name()));
        };

        let from = self.ctx.robot_state();
        let result = transition(from, event, self.ctx.comms_ready()).and_then(|to| {
            // Never start moving on data the loop would immediately fault on
            if to == RobotState::Running
                && from != RobotState::Running
                && self.stale_reason(now).is_some()
            {
                Err(RobotTransitionError {
                    from,
                    event,
                    reason: "consumed data is stale",
                })
            } else {
                Ok(to)
            }
        });

        match result {
            Ok(to) => {
                self.commit(from, to);
                Reply::Ok(command.name())
            },
            Err(e) => self.reject(e.to_string()),
        }
    }

    fn actuate(&mut self) {
        let state = self.ctx.robot_state();
        if state == RobotState::Running {
            self.emit(self.setpoint, state);
            self.motors_engaged = true;
        } else if self.motors_engaged {
            self.emit(MotorCommand::STOP, state);
            self.motors_engaged = false;
        }
    }

    fn emit(&mut self, motor: MotorCommand, state: RobotState) {
        let decision = ActuatorDecision {
            tick: self.tick,
            state,
            motor,
        };
        self.sink.apply(&decision);
        if let Ok(hooks) = self.ctx.hooks.read() {
            hooks.trigger_actuator(&decision);
        }
        self.ctx
            .metrics
            .actuator_decisions
            .fetch_add(1, Ordering::Relaxed);
    }
}
