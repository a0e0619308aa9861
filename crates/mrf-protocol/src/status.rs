//! Status report returned for `STATUS`

use crate::state::{CommStatus, RobotState};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub robot_state: RobotState,
    pub serial: CommStatus,
    pub tcp: CommStatus,
    /// Version of the latest published sensor reading (0 = none yet)
    pub sensor_version: u64,
    /// Version of the latest published image (0 = none yet)
    pub image_version: u64,
    pub battery_voltage: f32,
    /// Pose estimate `[x (m), y (m), theta (rad)]`
    pub pose: [f64; 3],
}

impl StatusReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let report = StatusReport {
            robot_state: RobotState::Paused,
            serial: CommStatus::Connected,
            tcp: CommStatus::Error,
            sensor_version: 42,
            image_version: 0,
            battery_voltage: 7.4,
            pose: [0.5, -0.25, 1.0],
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"robot_state\":\"PAUSED\""));
        assert!(json.contains("\"tcp\":\"ERROR\""));
        assert_eq!(StatusReport::from_json(&json).unwrap(), report);
    }
}
