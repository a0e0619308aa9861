//! Runtime configuration
//!
//! `RobotConfig` describes the hardware and is immutable after start; it is
//! shared as `Arc<RobotConfig>`. `RuntimeConfig` holds timing and policy knobs,
//! all in milliseconds. Every field has a default so a TOML file only needs to
//! name what it changes.
//!
//! # Example
//!
//! ```
//! use mrf_driver::MrfConfig;
//!
//! let config = MrfConfig::from_toml_str(r#"
//! [robot]
//! serial_port = "/dev/ttyACM0"
//! frame_rate = 15
//!
//! [runtime]
//! sensor_stale_ms = 300
//! "#).unwrap();
//! assert_eq!(config.robot.frame_rate, 15);
//! assert_eq!(config.runtime.image_stale_ms, 500);
//! ```

use crate::error::DriverError;
use mrf_protocol::Channel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hardware configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub tcp_host: String,
    pub tcp_port: u16,
    pub camera_index: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Camera frame rate; also the default control loop rate
    pub frame_rate: u32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            tcp_host: "127.0.0.1".to_string(),
            tcp_port: 9000,
            camera_index: 0,
            frame_width: 640,
            frame_height: 480,
            frame_rate: 30,
        }
    }
}

impl RobotConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.serial_port.is_empty() {
            return Err(DriverError::InvalidConfig("serial_port is empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(DriverError::InvalidConfig("baud_rate must be > 0".to_string()));
        }
        if self.tcp_host.is_empty() {
            return Err(DriverError::InvalidConfig("tcp_host is empty".to_string()));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(DriverError::InvalidConfig(format!(
                "frame size {}x{} is empty",
                self.frame_width, self.frame_height
            )));
        }
        if self.frame_rate == 0 {
            return Err(DriverError::InvalidConfig("frame_rate must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Timing and policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Control loop rate (0 = use `RobotConfig::frame_rate`)
    pub control_rate_hz: u32,
    /// Sensor slot staleness threshold
    pub sensor_stale_ms: u64,
    /// Image slot staleness threshold (0 = the control loop does not consume images)
    pub image_stale_ms: u64,
    pub serial_read_timeout_ms: u64,
    /// Also bounds each reply write on the operator link
    pub tcp_connect_timeout_ms: u64,
    pub tcp_recv_timeout_ms: u64,
    pub camera_grab_timeout_ms: u64,
    /// First reconnect delay; doubles per consecutive failure
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Connected time after which the failure counter resets
    pub backoff_reset_after_ms: u64,
    /// Total time shutdown waits for all threads; every blocking wait must be shorter
    pub shutdown_grace_ms: u64,
    /// How long the TCP worker waits for the control loop to answer a command
    pub command_reply_timeout_ms: u64,
    /// Channels that must be CONNECTED to run
    pub required_channels: Vec<Channel>,
    pub fault_queue_capacity: usize,
    pub command_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control_rate_hz: 0,
            sensor_stale_ms: 200,
            image_stale_ms: 500,
            serial_read_timeout_ms: 50,
            tcp_connect_timeout_ms: 500,
            tcp_recv_timeout_ms: 50,
            camera_grab_timeout_ms: 100,
            backoff_base_ms: 100,
            backoff_max_ms: 5000,
            backoff_reset_after_ms: 5000,
            shutdown_grace_ms: 1000,
            command_reply_timeout_ms: 500,
            required_channels: vec![Channel::Serial, Channel::Tcp],
            fault_queue_capacity: 64,
            command_queue_capacity: 32,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        let timeouts = [
            ("sensor_stale_ms", self.sensor_stale_ms),
            ("serial_read_timeout_ms", self.serial_read_timeout_ms),
            ("tcp_connect_timeout_ms", self.tcp_connect_timeout_ms),
            ("tcp_recv_timeout_ms", self.tcp_recv_timeout_ms),
            ("camera_grab_timeout_ms", self.camera_grab_timeout_ms),
            ("backoff_base_ms", self.backoff_base_ms),
            ("shutdown_grace_ms", self.shutdown_grace_ms),
            ("command_reply_timeout_ms", self.command_reply_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(DriverError::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        // A worker blocked in one of these cannot see the shutdown flag
        let blocking = [
            ("serial_read_timeout_ms", self.serial_read_timeout_ms),
            ("tcp_connect_timeout_ms", self.tcp_connect_timeout_ms),
            ("tcp_recv_timeout_ms", self.tcp_recv_timeout_ms),
            ("camera_grab_timeout_ms", self.camera_grab_timeout_ms),
            ("command_reply_timeout_ms", self.command_reply_timeout_ms),
        ];
        for (name, value) in blocking {
            if value >= self.shutdown_grace_ms {
                return Err(DriverError::InvalidConfig(format!(
                    "{} ({}) must be below shutdown_grace_ms ({})",
                    name, value, self.shutdown_grace_ms
                )));
            }
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(DriverError::InvalidConfig(format!(
                "backoff_max_ms ({}) < backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        if self.fault_queue_capacity == 0 || self.command_queue_capacity == 0 {
            return Err(DriverError::InvalidConfig(
                "queue capacities must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Control loop period
    pub fn control_period(&self, robot: &RobotConfig) -> Duration {
        let rate = if self.control_rate_hz > 0 {
            self.control_rate_hz
        } else {
            robot.frame_rate
        };
        Duration::from_secs(1) / rate.max(1)
    }

    pub fn sensor_stale(&self) -> Duration {
        Duration::from_millis(self.sensor_stale_ms)
    }

    /// `None` when the control loop does not consume images
    pub fn image_stale(&self) -> Option<Duration> {
        (self.image_stale_ms > 0).then(|| Duration::from_millis(self.image_stale_ms))
    }

    pub fn serial_read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_read_timeout_ms)
    }

    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_connect_timeout_ms)
    }

    pub fn tcp_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_recv_timeout_ms)
    }

    pub fn camera_grab_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_grab_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn command_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.command_reply_timeout_ms)
    }

    pub fn is_required(&self, channel: Channel) -> bool {
        self.required_channels.contains(&channel)
    }
}

/// Differential drive geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    /// Distance between the wheels (m)
    pub wheel_base_m: f64,
    pub wheel_radius_m: f64,
    /// Encoder ticks per wheel revolution
    pub ticks_per_rev: u32,
    /// Number of poses kept in the path history
    pub path_history_len: usize,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            wheel_base_m: 0.2,
            wheel_radius_m: 0.05,
            ticks_per_rev: 1024,
            path_history_len: 1000,
        }
    }
}

impl OdometryConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if !(self.wheel_base_m > 0.0) || !(self.wheel_radius_m > 0.0) {
            return Err(DriverError::InvalidConfig(
                "wheel_base_m and wheel_radius_m must be > 0".to_string(),
            ));
        }
        if self.ticks_per_rev == 0 {
            return Err(DriverError::InvalidConfig("ticks_per_rev must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MrfConfig {
    pub robot: RobotConfig,
    pub runtime: RuntimeConfig,
    pub odometry: OdometryConfig,
}

impl MrfConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, DriverError> {
        let config: MrfConfig =
            toml::from_str(text).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DriverError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        self.robot.validate()?;
        self.runtime.validate()?;
        self.odometry.validate()
    }
}
