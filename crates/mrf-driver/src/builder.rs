//! Builder
//!
//! Chained construction of a [`Robot`].

use crate::config::{MrfConfig, OdometryConfig, RobotConfig, RuntimeConfig};
use crate::context::RobotContext;
use crate::error::DriverError;
use crate::hooks::StateObserver;
use crate::robot::Robot;
use mrf_link::{
    ActuatorSink, CameraBackend, SerialConnector, SerialPortConnector, SyntheticCamera,
    TcpCommandConnector, TcpConnector,
};
use std::sync::Arc;
use tracing::debug;

/// Robot builder (chained)
///
/// Every config section is optional and falls back to its default. The
/// collaborators (serial connector, operator connector, camera) are passed to
/// [`RobotBuilder::build`], so tests can plug in scripted ones.
///
/// # Example
///
/// ```no_run
/// use mrf_driver::{RobotBuilder, RobotConfig};
///
/// let config = RobotConfig {
///     serial_port: "/dev/ttyACM0".to_string(),
///     ..Default::default()
/// };
/// let robot = RobotBuilder::new()
///     .robot_config(config)
///     .build_hardware()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct RobotBuilder {
    robot: Option<RobotConfig>,
    runtime: Option<RuntimeConfig>,
    odometry: Option<OdometryConfig>,
    /// Replaces the serial motor sink when set
    actuator: Option<Box<dyn ActuatorSink>>,
    observers: Vec<Arc<dyn StateObserver>>,
}

impl RobotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded config file
    pub fn from_config(config: MrfConfig) -> Self {
        Self {
            robot: Some(config.robot),
            runtime: Some(config.runtime),
            odometry: Some(config.odometry),
            ..Self::default()
        }
    }

    pub fn robot_config(mut self, config: RobotConfig) -> Self {
        self.robot = Some(config);
        self
    }

    pub fn runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime = Some(config);
        self
    }

    pub fn odometry_config(mut self, config: OdometryConfig) -> Self {
        self.odometry = Some(config);
        self
    }

    /// Route actuator decisions somewhere other than the serial port
    pub fn actuator_sink(mut self, sink: impl ActuatorSink + 'static) -> Self {
        self.actuator = Some(Box::new(sink));
        self
    }

    /// Register an observer before any thread starts, so no transition is missed
    pub fn observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate the configuration and start the runtime
    ///
    /// # Errors
    /// - `DriverError::InvalidConfig`: a config section failed validation
    /// - `DriverError::IoThread`: a thread could not be spawned
    pub fn build<S, T, B>(self, serial: S, tcp: T, camera: B) -> Result<Robot, DriverError>
    where
        S: SerialConnector + 'static,
        T: TcpConnector + 'static,
        B: CameraBackend + 'static,
    {
        let robot = self.robot.unwrap_or_default();
        let runtime = self.runtime.unwrap_or_default();
        let odometry = self.odometry.unwrap_or_default();
        robot.validate()?;
        runtime.validate()?;
        odometry.validate()?;

        let ctx = Arc::new(RobotContext::new(Arc::new(robot), runtime));
        if !self.observers.is_empty()
            && let Ok(mut hooks) = ctx.hooks.write()
        {
            for observer in self.observers {
                hooks.add_observer(observer);
            }
            debug!("Builder: registered {} observers", hooks.len());
        }

        Robot::spawn(ctx, &odometry, serial, tcp, camera, self.actuator)
    }

    /// Start with the real serial port, a TCP operator link and the synthetic camera
    pub fn build_hardware(self) -> Result<Robot, DriverError> {
        let (width, height, fps) = match &self.robot {
            Some(c) => (c.frame_width, c.frame_height, c.frame_rate),
            None => {
                let c = RobotConfig::default();
                (c.frame_width, c.frame_height, c.frame_rate)
            },
        };
        self.build(
            SerialPortConnector,
            TcpCommandConnector,
            SyntheticCamera::new(width, height, fps),
        )
    }
}
