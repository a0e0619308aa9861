//! Robot handle
//!
//! [`Robot`] owns the worker and control threads and is the public face of
//! the runtime: state queries, operator commands, fault injection and
//! shutdown. Build one with [`crate::RobotBuilder`].

use crate::config::OdometryConfig;
use crate::context::RobotContext;
use crate::control::{
    CommandEnvelope, ControlLoop, FaultEvent, dispatch_command, signal_fault,
};
use crate::error::DriverError;
use crate::hooks::StateObserver;
use crate::metrics::MetricsSnapshot;
use crate::odometry::{Odometry, OdometrySnapshot, PathHistory, Pose};
use crate::pipeline::{camera_loop, serial_loop, tcp_loop};
use crate::sink::{SerialMotorSink, motor_mailbox};
use crate::store::{ImageData, SensorData};
use crossbeam_channel::{Sender, bounded};
use mrf_link::{ActuatorSink, CameraBackend, SerialConnector, TcpConnector};
use mrf_protocol::{Channel, CommStatus, OperatorCommand, Reply, RobotState, StatusReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // Watchdog joins the target; it outlives us if the target never exits
        thread::spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>, DriverError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("mrf-{}", name))
        .spawn(f)
        .map_err(|e| DriverError::IoThread(format!("failed to spawn {} thread: {}", name, e)))
}

/// Running robot runtime
pub struct Robot {
    ctx: Arc<RobotContext>,
    command_tx: Sender<CommandEnvelope>,
    fault_tx: Sender<FaultEvent>,
    /// Process-wide shutdown flag shared with every thread
    is_running: Arc<AtomicBool>,
    path: PathHistory,
    control_thread: Option<JoinHandle<()>>,
    serial_thread: Option<JoinHandle<()>>,
    tcp_thread: Option<JoinHandle<()>>,
    camera_thread: Option<JoinHandle<()>>,
}

impl Robot {
    /// Spawn the control loop and the three workers
    ///
    /// `actuator` replaces the default [`SerialMotorSink`].
    pub(crate) fn spawn<S, T, B>(
        ctx: Arc<RobotContext>,
        odometry: &OdometryConfig,
        serial: S,
        tcp: T,
        camera: B,
        actuator: Option<Box<dyn ActuatorSink>>,
    ) -> Result<Self, DriverError>
    where
        S: SerialConnector + 'static,
        T: TcpConnector + 'static,
        B: CameraBackend + 'static,
    {
        let runtime = &ctx.runtime;
        let (command_tx, command_rx) = bounded(runtime.command_queue_capacity);
        let (fault_tx, fault_rx) = bounded(runtime.fault_queue_capacity);
        let mailbox = motor_mailbox();
        let is_running = Arc::new(AtomicBool::new(true));

        let sink: Box<dyn ActuatorSink> = match actuator {
            Some(sink) => sink,
            None => Box::new(SerialMotorSink::new(mailbox.clone(), ctx.clone())),
        };
        let odometry = Odometry::new(odometry);
        let path = odometry.path();
        let control = ControlLoop::new(ctx.clone(), sink, command_rx, fault_rx, odometry);

        let mut robot = Self {
            ctx: ctx.clone(),
            command_tx: command_tx.clone(),
            fault_tx: fault_tx.clone(),
            is_running: is_running.clone(),
            path,
            control_thread: None,
            serial_thread: None,
            tcp_thread: None,
            camera_thread: None,
        };

        // On a spawn failure `robot` is dropped, which stops what already runs
        let flag = is_running.clone();
        robot.control_thread = Some(spawn_named("control", move || control.run(flag))?);

        let (ctx_serial, fault_serial, flag) = (ctx.clone(), fault_tx.clone(), is_running.clone());
        robot.serial_thread = Some(spawn_named("serial", move || {
            serial_loop(serial, ctx_serial, mailbox, fault_serial, flag)
        })?);

        let (ctx_tcp, flag) = (ctx.clone(), is_running.clone());
        robot.tcp_thread = Some(spawn_named("tcp", move || {
            tcp_loop(tcp, ctx_tcp, command_tx, fault_tx, flag)
        })?);

        let (ctx_camera, flag) = (ctx.clone(), is_running);
        robot.camera_thread = Some(spawn_named("camera", move || {
            camera_loop(camera, ctx_camera, flag)
        })?);

        info!(
            "Robot runtime started (serial {} @ {}, operator {}:{})",
            ctx.config.serial_port, ctx.config.baud_rate, ctx.config.tcp_host, ctx.config.tcp_port
        );
        Ok(robot)
    }

    pub fn context(&self) -> &Arc<RobotContext> {
        &self.ctx
    }

    pub fn state(&self) -> RobotState {
        self.ctx.robot_state()
    }

    pub fn comm_status(&self, channel: Channel) -> CommStatus {
        self.ctx.comm_status(channel)
    }

    /// Latest sensor reading and its version (0 = nothing yet)
    pub fn read_sensor(&self) -> (SensorData, u64) {
        self.ctx.store.read_sensor()
    }

    /// Latest image and its version (0 = nothing yet)
    pub fn read_image(&self) -> (ImageData, u64) {
        self.ctx.store.read_image()
    }

    pub fn odometry(&self) -> OdometrySnapshot {
        self.ctx.odometry()
    }

    pub fn pose(&self) -> Pose {
        self.ctx.odometry().pose
    }

    /// Recent poses, oldest first (bounded by `path_history_len`)
    pub fn path(&self) -> Vec<Pose> {
        self.path.to_vec()
    }

    /// Zero the pose estimate on the next control tick
    pub fn reset_odometry(&self) {
        self.ctx.request_odometry_reset();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn status(&self) -> StatusReport {
        self.ctx.status_report()
    }

    /// Submit an operator command and wait for the control loop's reply
    ///
    /// # Errors
    /// - `DriverError::ChannelFull`: command queue is full
    /// - `DriverError::ChannelClosed`: the control loop has exited
    /// - `DriverError::Timeout`: no reply within `command_reply_timeout_ms`
    pub fn send_command(&self, command: OperatorCommand) -> Result<Reply, DriverError> {
        dispatch_command(
            &self.command_tx,
            command,
            self.ctx.runtime.command_reply_timeout(),
        )
    }

    /// Raise a fault from outside the workers (e-stop button, supervisor, ...)
    pub fn report_fault(&self, reason: impl Into<String>) {
        signal_fault(
            &self.fault_tx,
            &self.ctx.metrics,
            FaultEvent::external(reason),
        );
    }

    pub fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        if let Ok(mut hooks) = self.ctx.hooks.write() {
            hooks.add_observer(observer);
        }
    }

    /// `false` once shutdown has begun (by command or by [`Robot::shutdown`])
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Liveness of (control, serial, tcp, camera) threads
    pub fn check_health(&self) -> [bool; 4] {
        let alive = |h: &Option<JoinHandle<()>>| h.as_ref().is_some_and(|h| !h.is_finished());
        [
            alive(&self.control_thread),
            alive(&self.serial_thread),
            alive(&self.tcp_thread),
            alive(&self.camera_thread),
        ]
    }

    pub fn is_healthy(&self) -> bool {
        self.check_health().iter().all(|&alive| alive)
    }

    /// Commit SHUTDOWN, stop every thread and wait for them
    ///
    /// All threads share one grace period (`shutdown_grace_ms`). A thread that
    /// misses it is logged and left behind; it is reported in the error but the
    /// runtime is stopped either way. Calling this again is a no-op.
    pub fn shutdown(&mut self) -> Result<(), DriverError> {
        let grace = self.ctx.runtime.shutdown_grace();
        let deadline = Instant::now() + grace;

        if self.is_running() {
            // Goes through the control loop so it commits SHUTDOWN and flushes a STOP
            let timeout = grace.min(self.ctx.runtime.command_reply_timeout());
            match dispatch_command(&self.command_tx, OperatorCommand::Shutdown, timeout) {
                Ok(reply) => debug!("Shutdown command: {}", reply),
                Err(e) => warn!("Shutdown command not acknowledged: {}", e),
            }
        }
        // Release: All writes before this are visible to threads that see the false value
        self.is_running.store(false, Ordering::Release);

        let threads = [
            ("Control", self.control_thread.take()),
            ("Serial", self.serial_thread.take()),
            ("TCP", self.tcp_thread.take()),
            ("Camera", self.camera_thread.take()),
        ];
        let mut missed = Vec::new();
        for (name, handle) in threads {
            let Some(handle) = handle else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(_e) = handle.join_timeout(remaining) {
                error!(
                    "{} thread panicked or failed to shut down within {:?}",
                    name, grace
                );
                missed.push(name);
            }
        }

        if missed.is_empty() {
            info!("Robot runtime stopped");
            Ok(())
        } else {
            Err(DriverError::IoThread(format!(
                "{} missed the {:?} shutdown deadline",
                missed.join(", "),
                grace
            )))
        }
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RobotConfig, RuntimeConfig};
    use mrf_link::mock::{MockCamera, MockSerial, MockTcp};

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            control_rate_hz: 100,
            serial_read_timeout_ms: 10,
            tcp_recv_timeout_ms: 10,
            camera_grab_timeout_ms: 10,
            ..Default::default()
        }
    }

    fn start(serial: MockSerial, tcp: MockTcp) -> Robot {
        let ctx = Arc::new(RobotContext::new(Arc::new(RobotConfig::default()), runtime()));
        Robot::spawn(
            ctx,
            &OdometryConfig::default(),
            serial,
            tcp,
            MockCamera::streaming(640, 480, 30),
            None,
        )
        .unwrap()
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_join_timeout() {
        let quick = thread::spawn(|| {});
        assert!(quick.join_timeout(Duration::from_secs(1)).is_ok());

        let slow = thread::spawn(|| thread::sleep(Duration::from_millis(300)));
        assert!(slow.join_timeout(Duration::from_millis(10)).is_err());

        let panicking = thread::spawn(|| panic!("boom"));
        assert!(panicking.join_timeout(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_robot_starts_connects_and_shuts_down() {
        let serial = MockSerial::streaming(100);
        let tcp = MockTcp::new();
        let mut robot = start(serial.clone(), tcp);

        assert!(wait_until(Duration::from_secs(2), || {
            robot.comm_status(Channel::Serial) == CommStatus::Connected
                && robot.comm_status(Channel::Tcp) == CommStatus::Connected
        }));
        assert!(robot.is_healthy());
        assert_eq!(robot.state(), RobotState::Idle);

        assert!(wait_until(Duration::from_secs(2), || {
            robot.read_image().1 > 0 && robot.read_sensor().1 > 0
        }));
        assert_eq!(robot.send_command(OperatorCommand::Start).unwrap(), Reply::Ok("START"));
        assert_eq!(
            robot
                .send_command(OperatorCommand::Move { speed: 30, angle: 0 })
                .unwrap(),
            Reply::Ok("MOVE")
        );
        // Default sink routes motor commands to the serial port
        assert!(wait_until(Duration::from_secs(1), || {
            serial.written().iter().any(|f| &f[..] == [0xFA, 30, 0, 30, 0])
        }));

        robot.shutdown().unwrap();
        assert_eq!(robot.state(), RobotState::Shutdown);
        assert!(!robot.is_running());
        assert_eq!(robot.comm_status(Channel::Serial), CommStatus::Disconnected);
        assert_eq!(robot.comm_status(Channel::Tcp), CommStatus::Disconnected);
        // Final STOP reached the port
        let written = serial.written();
        assert_eq!(&written.last().unwrap()[..], &[0xFA, 0, 0, 0, 0]);

        // Idempotent
        assert!(robot.shutdown().is_ok());
    }

    #[test]
    fn test_report_fault_moves_running_robot_to_error() {
        let mut robot = start(MockSerial::streaming(100), MockTcp::new());
        assert!(wait_until(Duration::from_secs(2), || {
            robot.status().serial == CommStatus::Connected
                && robot.status().tcp == CommStatus::Connected
                && robot.read_image().1 > 0
                && robot.read_sensor().1 > 0
        }));
        robot.send_command(OperatorCommand::Start).unwrap();

        robot.report_fault("bumper pressed");
        assert!(wait_until(Duration::from_secs(1), || {
            robot.state() == RobotState::Error
        }));
        robot.shutdown().unwrap();
    }
}
