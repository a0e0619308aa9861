//! run command
//!
//! Starts the runtime and supervises it from the main thread until Ctrl-C,
//! an operator SHUTDOWN, or a dead worker.

use anyhow::{Context, Result};
use clap::Args;
use mrf_driver::{MrfConfig, Robot, RobotBuilder};
use mrf_link::LogSink;
use mrf_link::mock::{MockCamera, MockSerial, MockTcp};
use mrf_protocol::{OperatorCommand, Reply};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::config::load_or_default;

/// Supervisor poll period
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Args, Debug)]
pub struct RunCommand {
    /// TOML config file (defaults are used when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port (overrides the config)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Operator endpoint host (overrides the config)
    #[arg(long)]
    pub host: Option<String>,

    /// Operator endpoint port (overrides the config)
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// Use scripted collaborators instead of hardware
    #[arg(long)]
    pub simulate: bool,

    /// Send START once the runtime is ready
    #[arg(long)]
    pub start: bool,

    /// Status log interval in seconds (0 disables it)
    #[arg(long, default_value_t = 5)]
    pub status_interval: u64,
}

impl RunCommand {
    pub fn execute(&self) -> Result<()> {
        let config = self.effective_config()?;

        let is_interrupted = Arc::new(AtomicBool::new(false));
        let flag = is_interrupted.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived interrupt signal. Shutting down...");
            flag.store(true, Ordering::Release);
        })
        .context("failed to install Ctrl-C handler")?;

        let mut robot = if self.simulate {
            info!("Starting in simulation mode");
            let serial = MockSerial::streaming(config.robot.frame_rate.max(1) * 2);
            serial.set_wheel_ticks(12, 10);
            RobotBuilder::from_config(config.clone())
                .actuator_sink(LogSink::new())
                .build(
                    serial,
                    MockTcp::new(),
                    MockCamera::streaming(
                        config.robot.frame_width,
                        config.robot.frame_height,
                        config.robot.frame_rate,
                    ),
                )?
        } else {
            RobotBuilder::from_config(config.clone()).build_hardware()?
        };

        if self.start {
            self.start_when_ready(&robot, &is_interrupted);
        }

        let status_interval = Duration::from_secs(self.status_interval);
        let mut last_status = Instant::now();
        while !is_interrupted.load(Ordering::Acquire) && robot.is_running() {
            if !robot.is_healthy() {
                warn!("Runtime thread died: {:?}", robot.check_health());
                break;
            }
            if !status_interval.is_zero() && last_status.elapsed() >= status_interval {
                log_status(&robot);
                last_status = Instant::now();
            }
            thread::sleep(POLL_INTERVAL);
        }

        let result = robot.shutdown();
        let metrics = robot.metrics();
        info!(
            "Final metrics: ticks={} serial_frames={} link_errors={} commands={} stale_faults={}",
            metrics.control_ticks,
            metrics.serial_frames,
            metrics.link_errors,
            metrics.commands_received,
            metrics.stale_faults
        );
        result.context("runtime did not shut down cleanly")
    }

    fn effective_config(&self) -> Result<MrfConfig> {
        let mut config = load_or_default(self.config.as_deref())?;
        if let Some(port) = &self.port {
            config.robot.serial_port = port.clone();
        }
        if let Some(host) = &self.host {
            config.robot.tcp_host = host.clone();
        }
        if let Some(tcp_port) = self.tcp_port {
            config.robot.tcp_port = tcp_port;
        }
        config.validate()?;
        Ok(config)
    }

    /// Retry START until it is accepted, the user gives up, or 10 s pass
    fn start_when_ready(&self, robot: &Robot, is_interrupted: &AtomicBool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline && !is_interrupted.load(Ordering::Acquire) {
            match robot.send_command(OperatorCommand::Start) {
                Ok(Reply::Ok(_)) => {
                    info!("Robot started");
                    return;
                },
                Ok(reply) => debug!("START not accepted yet: {}", reply),
                Err(e) => warn!("START failed: {}", e),
            }
            thread::sleep(Duration::from_millis(200));
        }
        warn!("Gave up waiting for the runtime to accept START");
    }
}

fn log_status(robot: &Robot) {
    let status = robot.status();
    info!(
        "Status: state={} serial={} tcp={} battery={:.2}V pose=({:.3}, {:.3}, {:.3})",
        status.robot_state,
        status.serial,
        status.tcp,
        status.battery_voltage,
        status.pose[0],
        status.pose[1],
        status.pose[2]
    );
}
