//! Differential drive odometry
//!
//! Dead reckoning from the 16-bit wheel encoders. The control loop feeds every
//! new sensor version into [`Odometry::update`] and publishes an
//! [`OdometrySnapshot`] for readers. The recent trajectory is kept in a
//! [`PathHistory`] that readers share with the control loop.

use crate::config::OdometryConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;

/// Updates closer together than this are skipped
const MIN_DT_SECS: f64 = 0.001;
/// Below this heading change the arc is treated as a straight segment
const STRAIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, normalized to [-π, π]
    pub theta: f64,
    /// Sensor timestamp of the last update (monotonic seconds)
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    /// m/s
    pub linear: f64,
    /// rad/s
    pub angular: f64,
    pub left_wheel: f64,
    pub right_wheel: f64,
}

/// Published odometry state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OdometrySnapshot {
    pub pose: Pose,
    pub velocity: Velocity,
    /// Sum of |distance| travelled by the robot center (m)
    pub total_distance: f64,
    /// Sum of |heading change| (rad)
    pub total_rotation: f64,
}

/// Bounded pose history, oldest first
///
/// Clones share the same history. Only the control loop writes it.
#[derive(Debug, Clone)]
pub struct PathHistory {
    capacity: usize,
    poses: Arc<Mutex<VecDeque<Pose>>>,
}

impl PathHistory {
    /// `capacity` 0 disables recording
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            poses: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
        }
    }

    fn push(&self, pose: Pose) {
        if self.capacity == 0 {
            return;
        }
        let mut poses = self.poses.lock();
        if poses.len() == self.capacity {
            poses.pop_front();
        }
        poses.push_back(pose);
    }

    fn clear(&self) {
        self.poses.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.poses.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.lock().is_empty()
    }

    pub fn latest(&self) -> Option<Pose> {
        self.poses.lock().back().copied()
    }

    /// Copy of the recorded poses
    pub fn to_vec(&self) -> Vec<Pose> {
        self.poses.lock().iter().copied().collect()
    }
}

#[derive(Debug, Clone)]
pub struct Odometry {
    wheel_base: f64,
    distance_per_tick: f64,
    snapshot: OdometrySnapshot,
    /// Last accepted (left, right, timestamp); `None` until the first sample
    previous: Option<(u16, u16, f64)>,
    path: PathHistory,
}

impl Odometry {
    pub fn new(config: &OdometryConfig) -> Self {
        Self {
            wheel_base: config.wheel_base_m,
            distance_per_tick: 2.0 * PI * config.wheel_radius_m / config.ticks_per_rev as f64,
            snapshot: OdometrySnapshot::default(),
            previous: None,
            path: PathHistory::new(config.path_history_len),
        }
    }

    pub fn distance_per_tick(&self) -> f64 {
        self.distance_per_tick
    }

    /// Integrate one encoder reading
    ///
    /// The first reading only sets the baseline. Readings less than 1 ms after
    /// the previous accepted one are skipped.
    ///
    /// # Returns
    /// `true` if the pose was updated
    pub fn update(&mut self, encoder_left: u16, encoder_right: u16, timestamp: f64) -> bool {
        let Some((prev_left, prev_right, prev_timestamp)) = self.previous else {
            self.previous = Some((encoder_left, encoder_right, timestamp));
            self.snapshot.pose.timestamp = timestamp;
            return false;
        };

        let dt = timestamp - prev_timestamp;
        if dt < MIN_DT_SECS {
            return false;
        }
        self.previous = Some((encoder_left, encoder_right, timestamp));

        // Wrapping difference reinterpreted as signed handles counter overflow
        let delta_left = encoder_left.wrapping_sub(prev_left) as i16 as f64;
        let delta_right = encoder_right.wrapping_sub(prev_right) as i16 as f64;

        let distance_left = delta_left * self.distance_per_tick;
        let distance_right = delta_right * self.distance_per_tick;
        let distance_center = (distance_left + distance_right) / 2.0;
        let delta_theta = (distance_right - distance_left) / self.wheel_base;

        let pose = &mut self.snapshot.pose;
        let (dx, dy) = if delta_theta.abs() < STRAIGHT_EPSILON {
            (
                distance_center * pose.theta.cos(),
                distance_center * pose.theta.sin(),
            )
        } else {
            let radius = distance_center / delta_theta;
            (
                radius * ((pose.theta + delta_theta).sin() - pose.theta.sin()),
                radius * (pose.theta.cos() - (pose.theta + delta_theta).cos()),
            )
        };
        pose.x += dx;
        pose.y += dy;
        pose.theta = normalize_angle(pose.theta + delta_theta);
        pose.timestamp = timestamp;

        self.snapshot.velocity = Velocity {
            linear: distance_center / dt,
            angular: delta_theta / dt,
            left_wheel: distance_left / dt,
            right_wheel: distance_right / dt,
        };
        self.snapshot.total_distance += distance_center.abs();
        self.snapshot.total_rotation += delta_theta.abs();

        self.path.push(self.snapshot.pose);
        true
    }

    pub fn snapshot(&self) -> OdometrySnapshot {
        self.snapshot
    }

    pub fn pose(&self) -> Pose {
        self.snapshot.pose
    }

    /// Handle on the pose history for readers on other threads
    pub fn path(&self) -> PathHistory {
        self.path.clone()
    }

    /// Move back to the origin and clear totals and path
    ///
    /// The encoder baseline is kept so the next reading integrates from here.
    pub fn reset(&mut self) {
        let timestamp = self.snapshot.pose.timestamp;
        self.snapshot = OdometrySnapshot::default();
        self.snapshot.pose.timestamp = timestamp;
        self.path.clear();
    }
}

/// Wrap an angle into [-π, π]
pub fn normalize_angle(mut angle: f64) -> f64 {
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn odometry() -> Odometry {
        Odometry::new(&OdometryConfig::default())
    }

    #[test]
    fn test_first_sample_is_baseline() {
        let mut odom = odometry();
        assert!(!odom.update(500, 500, 1.0));
        assert_eq!(odom.pose().x, 0.0);
    }

    #[test]
    fn test_straight_line() {
        let mut odom = odometry();
        odom.update(0, 0, 0.0);
        // One full wheel revolution on both sides: 2π·0.05 m
        assert!(odom.update(1024, 1024, 1.0));
        let snap = odom.snapshot();
        let expected = 2.0 * PI * 0.05;
        assert!((snap.pose.x - expected).abs() < 1e-9);
        assert!(snap.pose.y.abs() < 1e-9);
        assert!(snap.pose.theta.abs() < 1e-9);
        assert!((snap.velocity.linear - expected).abs() < 1e-9);
        assert!((snap.total_distance - expected).abs() < 1e-9);
    }

    #[test]
    fn test_turn_in_place() {
        let mut odom = odometry();
        odom.update(0, 0, 0.0);
        // Right wheel forward, left wheel back: positive (counter-clockwise) rotation
        odom.update(65535 - 99, 100, 0.5);
        let snap = odom.snapshot();
        let per_tick = odom.distance_per_tick();
        let expected_theta = (200.0 * per_tick) / 0.2;
        assert!((snap.pose.theta - expected_theta).abs() < 1e-9);
        assert!(snap.pose.x.abs() < 1e-9);
        assert!((snap.total_rotation - expected_theta).abs() < 1e-9);
        assert!(snap.velocity.angular > 0.0);
    }

    #[test]
    fn test_encoder_wrap_is_small_forward_motion() {
        let mut odom = odometry();
        odom.update(65530, 65530, 0.0);
        odom.update(10, 10, 0.1);
        let expected = 16.0 * odom.distance_per_tick();
        assert!((odom.pose().x - expected).abs() < 1e-9);
    }

    #[test]
    fn test_too_small_dt_is_skipped() {
        let mut odom = odometry();
        odom.update(0, 0, 1.0);
        assert!(!odom.update(100, 100, 1.0005));
        assert_eq!(odom.pose().x, 0.0);
        // Baseline did not move: the later update sees the full delta
        assert!(odom.update(100, 100, 1.01));
        assert!((odom.pose().x - 100.0 * odom.distance_per_tick()).abs() < 1e-9);
    }

    #[test]
    fn test_reset_and_path() {
        let config = OdometryConfig {
            path_history_len: 2,
            ..Default::default()
        };
        let mut odom = Odometry::new(&config);
        odom.update(0, 0, 0.0);
        odom.update(10, 10, 0.1);
        odom.update(20, 20, 0.2);
        odom.update(30, 30, 0.3);
        let path = odom.path();
        assert_eq!(path.len(), 2);
        assert_eq!(path.latest(), Some(odom.pose()));
        // Oldest entry was evicted
        assert!((path.to_vec()[0].x - 20.0 * odom.distance_per_tick()).abs() < 1e-9);

        odom.reset();
        assert_eq!(odom.pose().x, 0.0);
        assert_eq!(odom.snapshot().total_distance, 0.0);
        assert!(path.is_empty());

        odom.update(40, 40, 0.4);
        assert!((odom.pose().x - 10.0 * odom.distance_per_tick()).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-9);
        assert!((normalize_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-9);
        assert_eq!(normalize_angle(0.5), 0.5);
    }
}
