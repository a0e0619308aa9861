//! Differential motor command frame
//!
//! `0xFA` followed by left and right wheel speeds as little-endian `i16`.

/// Motor command header byte
pub const MOTOR_HEADER: u8 = 0xFA;
/// Encoded frame length
pub const MOTOR_FRAME_LEN: usize = 5;

const SPEED_LIMIT: i16 = 100;

/// Left/right wheel speed command (percent, -100..=100)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorCommand {
    pub left: i16,
    pub right: i16,
}

impl MotorCommand {
    pub const STOP: MotorCommand = MotorCommand { left: 0, right: 0 };

    /// Convert a speed/steering pair into wheel speeds
    ///
    /// # Parameters
    /// - `speed`: forward speed, clamped to -100..=100
    /// - `angle`: steering, clamped to -100..=100; positive turns right, 0 goes straight
    ///
    /// The wheel on the inside of the turn is slowed by `|angle|` percent.
    pub fn from_speed_angle(speed: i16, angle: i16) -> Self {
        let speed = speed.clamp(-SPEED_LIMIT, SPEED_LIMIT) as i32;
        let angle = angle.clamp(-SPEED_LIMIT, SPEED_LIMIT) as i32;
        let limit = SPEED_LIMIT as i32;

        // Integer math truncates toward zero, so results stay within -100..=100
        if angle >= 0 {
            Self {
                left: speed as i16,
                right: (speed * (limit - angle) / limit) as i16,
            }
        } else {
            Self {
                left: (speed * (limit + angle) / limit) as i16,
                right: speed as i16,
            }
        }
    }

    pub fn is_stop(&self) -> bool {
        self.left == 0 && self.right == 0
    }

    pub fn encode(&self) -> [u8; MOTOR_FRAME_LEN] {
        let l = self.left.to_le_bytes();
        let r = self.right.to_le_bytes();
        [MOTOR_HEADER, l[0], l[1], r[0], r[1]]
    }
}
