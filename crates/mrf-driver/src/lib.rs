//! Runtime layer
//!
//! Coordinates the MRF robot's I/O workers and control loop:
//! - worker threads for the serial, operator (TCP) and camera links
//! - versioned telemetry slots (ArcSwap lock-free reads)
//! - comm and robot state machines with a fail-safe control loop
//! - differential-drive odometry
//! - observer hooks and transition recording
//!
//! Most users start with [`RobotBuilder`] and talk to the resulting [`Robot`].

mod builder;
pub mod clock;
pub mod comm;
pub mod config;
mod context;
pub mod control;
mod error;
pub mod hooks;
pub mod metrics;
pub mod odometry;
pub mod pipeline;
pub mod recording;
mod robot;
pub mod robot_state;
pub mod sink;
pub mod store;

pub use builder::RobotBuilder;
pub use comm::{Backoff, CommChannel, CommTransitionError};
pub use config::{MrfConfig, OdometryConfig, RobotConfig, RuntimeConfig};
pub use context::RobotContext;
pub use control::{CommandEnvelope, ControlLoop, FaultEvent, FaultSource, dispatch_command};
pub use error::DriverError;
pub use hooks::{HookManager, StateObserver};
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use odometry::{Odometry, OdometrySnapshot, PathHistory, Pose, Velocity};
pub use pipeline::{camera_loop, handle_command_line, serial_loop, tcp_loop};
pub use recording::{TransitionEvent, TransitionRecorder};
pub use robot::Robot;
pub use robot_state::{AtomicRobotState, RobotEvent, RobotTransitionError};
pub use sink::{MotorMailbox, SerialMotorSink};
pub use store::{ImageData, SensorData, TelemetryStore};
