//! Runtime integration tests
//!
//! Full runtime (control loop plus three workers) against scripted links.

use mrf_driver::{
    OdometryConfig, RobotBuilder, RobotContext, RuntimeConfig, StateObserver, TransitionEvent,
    TransitionRecorder,
};
use mrf_link::mock::{MockCamera, MockSerial, MockTcp, RecordingSink, SerialEvent, SerialIdle};
use mrf_link::{ActuatorDecision, CameraBackend, ImageBuffer, LinkError};
use mrf_protocol::{
    Channel, CommStatus, MotorCommand, OperatorCommand, Reply, RobotState, StatusReport,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_runtime() -> RuntimeConfig {
    RuntimeConfig {
        control_rate_hz: 100,
        serial_read_timeout_ms: 10,
        tcp_connect_timeout_ms: 100,
        tcp_recv_timeout_ms: 10,
        camera_grab_timeout_ms: 10,
        command_reply_timeout_ms: 200,
        ..Default::default()
    }
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

fn wait_ready(ctx: &RobotContext) {
    assert!(
        wait_until(Duration::from_secs(3), || {
            ctx.comms_ready() && ctx.store.sensor_version() > 0 && ctx.store.image_version() > 0
        }),
        "runtime never became ready"
    );
}

// ============================================================================
// Safety: RUNNING only with every required channel connected
// ============================================================================

/// Checks comm readiness at the instant RUNNING is entered
struct SafetyWatch {
    ctx: Arc<RobotContext>,
    violations: Mutex<Vec<String>>,
    entered_running: Mutex<u32>,
}

impl StateObserver for SafetyWatch {
    fn on_robot_transition(&self, from: RobotState, to: RobotState) {
        if to != RobotState::Running {
            return;
        }
        *self.entered_running.lock() += 1;
        if !self.ctx.comms_ready() {
            self.violations.lock().push(format!(
                "{} -> RUNNING with {:?}",
                from,
                self.ctx.unready_channels()
            ));
        }
    }

    fn on_actuator_decision(&self, decision: &ActuatorDecision) {
        if decision.motor != MotorCommand::STOP && decision.state != RobotState::Running {
            self.violations
                .lock()
                .push(format!("motor {:?} outside RUNNING", decision.motor));
        }
    }
}

#[test]
fn test_running_requires_connected_channels() {
    let serial = MockSerial::streaming(100);
    let tcp = MockTcp::new();
    let mut robot = RobotBuilder::new()
        .runtime_config(RuntimeConfig {
            backoff_base_ms: 20,
            ..fast_runtime()
        })
        .actuator_sink(RecordingSink::new())
        .build(serial.clone(), tcp.clone(), MockCamera::streaming(64, 48, 50))
        .unwrap();

    let watch = Arc::new(SafetyWatch {
        ctx: robot.context().clone(),
        violations: Mutex::new(Vec::new()),
        entered_running: Mutex::new(0),
    });
    robot.add_observer(watch.clone());
    wait_ready(robot.context());

    for round in 0..5 {
        // Start is refused until the data is fresh again after a reconnect
        assert!(wait_until(Duration::from_secs(2), || matches!(
            robot.send_command(OperatorCommand::Start),
            Ok(Reply::Ok("START"))
        )));
        let _ = robot.send_command(OperatorCommand::Move {
            speed: 40,
            angle: 10,
        });

        // Kill the serial link, fail the first reconnect
        serial.fail_next_opens(1);
        serial.push(SerialEvent::Error(format!("cable pulled ({})", round)));
        assert!(wait_until(Duration::from_secs(1), || {
            robot.state() == RobotState::Error
        }));
        // Commands during the outage are refused
        assert!(matches!(
            robot.send_command(OperatorCommand::Resume).unwrap(),
            Reply::Err(_)
        ));

        wait_ready(robot.context());
        assert_eq!(robot.send_command(OperatorCommand::Ack).unwrap(), Reply::Ok("ACK"));
        assert_eq!(robot.state(), RobotState::Idle);
    }

    robot.shutdown().unwrap();
    assert!(*watch.entered_running.lock() >= 1);
    let violations = watch.violations.lock();
    assert!(violations.is_empty(), "violations: {:?}", *violations);
}

// ============================================================================
// Liveness: stale data leaves RUNNING
// ============================================================================

#[test]
fn test_stale_sensor_stream_faults_running_robot() {
    let serial = MockSerial::streaming(100);
    let sink = RecordingSink::new();
    let runtime = RuntimeConfig {
        sensor_stale_ms: 100,
        ..fast_runtime()
    };
    let mut robot = RobotBuilder::new()
        .runtime_config(runtime)
        .actuator_sink(sink.clone())
        .build(serial.clone(), MockTcp::new(), MockCamera::streaming(64, 48, 50))
        .unwrap();
    wait_ready(robot.context());

    assert_eq!(robot.send_command(OperatorCommand::Start).unwrap(), Reply::Ok("START"));
    robot
        .send_command(OperatorCommand::Move {
            speed: 25,
            angle: 0,
        })
        .unwrap();

    // Link stays up but goes quiet
    serial.set_idle(SerialIdle::Silent);
    let stalled_at = Instant::now();
    assert!(wait_until(Duration::from_secs(1), || {
        robot.state() == RobotState::Error
    }));
    // Threshold plus a handful of control periods
    assert!(stalled_at.elapsed() < Duration::from_millis(400));
    assert_eq!(robot.comm_status(Channel::Serial), CommStatus::Connected);
    assert!(robot.metrics().stale_faults >= 1);
    assert_eq!(sink.last().unwrap().motor, MotorCommand::STOP);

    robot.shutdown().unwrap();
}

// ============================================================================
// Reconnect with backoff
// ============================================================================

#[test]
fn test_serial_reconnects_with_growing_backoff() {
    let serial = MockSerial::default();
    let (recorder, events) = TransitionRecorder::new(256);
    let base = Duration::from_millis(40);
    let mut robot = RobotBuilder::new()
        .runtime_config(RuntimeConfig {
            backoff_base_ms: 40,
            backoff_max_ms: 1000,
            ..fast_runtime()
        })
        .observer(Arc::new(recorder))
        .build(serial.clone(), MockTcp::new(), MockCamera::silent())
        .unwrap();

    // A few read timeouts keep the link up
    assert!(wait_until(Duration::from_secs(1), || {
        robot.metrics().serial_timeouts >= 3
    }));
    assert_eq!(robot.comm_status(Channel::Serial), CommStatus::Connected);
    assert_eq!(serial.open_attempts().len(), 1);

    // Then the device fails and the next two opens are refused
    serial.fail_next_opens(2);
    serial.push(SerialEvent::Error("device reset".to_string()));
    assert!(wait_until(Duration::from_secs(3), || {
        serial.open_attempts().len() == 4
            && robot.comm_status(Channel::Serial) == CommStatus::Connected
    }));

    let attempts = serial.open_attempts();
    let gaps: Vec<Duration> = attempts.windows(2).skip(1).map(|w| w[1] - w[0]).collect();
    // 2x then 4x the base delay
    assert!(gaps[0] >= base * 2, "gaps: {:?}", gaps);
    assert!(gaps[1] >= base * 4, "gaps: {:?}", gaps);
    assert!(gaps[1] > gaps[0]);
    assert!(robot.metrics().link_errors >= 3);

    robot.shutdown().unwrap();

    let serial_path: Vec<(CommStatus, CommStatus)> = events
        .try_iter()
        .filter_map(|e| match e {
            TransitionEvent::Comm {
                channel: Channel::Serial,
                from,
                to,
                ..
            } => Some((from, to)),
            _ => None,
        })
        .collect();
    use CommStatus::*;
    assert_eq!(
        serial_path,
        vec![
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connected, Error),
            (Error, Connecting),
            (Connecting, Error),
            (Error, Connecting),
            (Connecting, Error),
            (Error, Connecting),
            (Connecting, Connected),
            (Connected, Disconnected),
        ]
    );
}

// ============================================================================
// Shutdown
// ============================================================================

/// Camera that ignores its timeout and blocks
struct StuckCamera {
    block: Duration,
}

impl CameraBackend for StuckCamera {
    fn grab_frame(&mut self, _timeout: Duration) -> Result<ImageBuffer, LinkError> {
        thread::sleep(self.block);
        Err(LinkError::Timeout)
    }
}

#[test]
fn test_shutdown_completes_within_grace() {
    let runtime = RuntimeConfig {
        serial_read_timeout_ms: 100,
        tcp_recv_timeout_ms: 100,
        camera_grab_timeout_ms: 100,
        shutdown_grace_ms: 1000,
        ..fast_runtime()
    };
    let mut robot = RobotBuilder::new()
        .runtime_config(runtime)
        .actuator_sink(RecordingSink::new())
        .build(MockSerial::default(), MockTcp::new(), MockCamera::silent())
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || robot.context().comms_ready()));

    let started = Instant::now();
    robot.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(robot.state(), RobotState::Shutdown);
    assert_eq!(robot.check_health(), [false; 4]);
}

#[test]
fn test_shutdown_reports_stuck_worker() {
    let runtime = RuntimeConfig {
        shutdown_grace_ms: 300,
        ..fast_runtime()
    };
    let mut robot = RobotBuilder::new()
        .runtime_config(runtime)
        .actuator_sink(RecordingSink::new())
        .build(
            MockSerial::default(),
            MockTcp::new(),
            StuckCamera {
                block: Duration::from_secs(3),
            },
        )
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let result = robot.shutdown();
    assert!(started.elapsed() < Duration::from_millis(800));
    let err = result.unwrap_err().to_string();
    assert!(err.contains("Camera"), "{}", err);
    // The rest of the runtime still stopped
    assert_eq!(robot.state(), RobotState::Shutdown);
    assert!(!robot.is_running());
}

// ============================================================================
// Operator session end to end
// ============================================================================

#[test]
fn test_operator_session_drives_motors() {
    let serial = MockSerial::streaming(100);
    serial.set_wheel_ticks(10, 10);
    serial.set_battery_mv(7200);
    let tcp = MockTcp::new();
    let mut robot = RobotBuilder::new()
        .runtime_config(fast_runtime())
        .build(serial.clone(), tcp.clone(), MockCamera::streaming(64, 48, 50))
        .unwrap();
    wait_ready(robot.context());
    let reply_timeout = Duration::from_secs(1);

    tcp.send_line("start");
    assert!(tcp.wait_for_reply(reply_timeout, |r| r == "OK START").is_some());

    tcp.send_line("MOVE 50 0");
    assert!(tcp.wait_for_reply(reply_timeout, |r| r == "OK MOVE").is_some());
    assert!(wait_until(reply_timeout, || {
        serial.written().iter().any(|f| f[..] == [0xFA, 50, 0, 50, 0])
    }));
    // Both wheels advance, so the pose moves forward
    assert!(wait_until(reply_timeout, || robot.pose().x > 0.0));
    let path = robot.path();
    assert!(!path.is_empty());
    assert!(path.len() <= OdometryConfig::default().path_history_len);
    assert!(path.last().unwrap().x > 0.0);
    assert!(path.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    tcp.send_line("STATUS");
    let status = tcp
        .wait_for_reply(reply_timeout, |r| r.starts_with('{'))
        .unwrap();
    let report = StatusReport::from_json(&status).unwrap();
    assert_eq!(report.robot_state, RobotState::Running);
    assert_eq!(report.serial, CommStatus::Connected);
    assert!((report.battery_voltage - 7.2).abs() < 1e-3);

    // Wheels stop turning, then the pose goes back to the origin
    serial.set_wheel_ticks(0, 0);
    let quiet_from = robot.read_sensor().1 + 5;
    assert!(wait_until(reply_timeout, || robot.read_sensor().1 >= quiet_from));
    thread::sleep(Duration::from_millis(50));
    robot.reset_odometry();
    assert!(wait_until(reply_timeout, || {
        let odometry = robot.odometry();
        odometry.pose.x == 0.0 && odometry.total_distance == 0.0
    }));
    // History restarts at the origin
    assert!(robot.path().iter().all(|pose| pose.x == 0.0));

    tcp.send_line("FLY");
    assert!(tcp.wait_for_reply(reply_timeout, |r| r.starts_with("ERR")).is_some());

    tcp.send_line("PAUSE");
    assert!(tcp.wait_for_reply(reply_timeout, |r| r == "OK PAUSE").is_some());
    assert!(wait_until(reply_timeout, || {
        serial
            .written()
            .last()
            .is_some_and(|f| f[..] == [0xFA, 0, 0, 0, 0])
    }));

    // SHUTDOWN from the operator stops the whole runtime
    tcp.send_line("SHUTDOWN");
    assert!(wait_until(Duration::from_secs(2), || !robot.is_running()));
    assert_eq!(robot.state(), RobotState::Shutdown);
    robot.shutdown().unwrap();

    let metrics = robot.metrics();
    assert!(metrics.commands_received >= 6);
    assert!(metrics.commands_rejected >= 1);
}
