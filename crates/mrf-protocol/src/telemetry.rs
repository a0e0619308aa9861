//! Serial telemetry frame
//!
//! One frame per microcontroller sample:
//!
//! ```text
//! +------+-----+---------------------------+----------+
//! | 0xF5 | 28  | payload (28 bytes, LE)     | XOR(pl)  |
//! +------+-----+---------------------------+----------+
//!
//! payload offsets:
//!   0  accel_x  i16    12 pitch   i16    22 temperature i16 (0.01 °C)
//!   2  accel_y  i16    14 roll    i16    24 humidity    u16 (0.01 %RH)
//!   4  accel_z  i16    16 yaw     i16    26 battery     u16 (mV)
//!   6  gyro_x   i16    18 enc_l   u16
//!   8  gyro_y   i16    20 enc_r   u16
//!  10  gyro_z   i16
//! ```
//!
//! Header, length and checksum violations are framing errors. A frame that is
//! well-formed but carries impossible readings is a payload decode error.

use crate::{ProtocolError, bytes_to_i16_le, bytes_to_u16_le, xor_checksum};

/// Frame header byte
pub const TELEMETRY_HEADER: u8 = 0xF5;
/// Payload length (second byte of every frame)
pub const TELEMETRY_PAYLOAD_LEN: usize = 28;
/// Complete frame length: header + length + payload + checksum
pub const TELEMETRY_FRAME_LEN: usize = TELEMETRY_PAYLOAD_LEN + 3;

const TEMPERATURE_RANGE_CENTI: std::ops::RangeInclusive<i16> = -4000..=12500;
const HUMIDITY_MAX_CENTI: u16 = 10_000;

/// Raw IMU counts as sent by the microcontroller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImuRaw {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
    pub pitch: i16,
    pub roll: i16,
    pub yaw: i16,
}

/// Decoded telemetry frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryPacket {
    pub imu: ImuRaw,
    /// 16-bit wrapping encoder counters
    pub encoder_left: u16,
    pub encoder_right: u16,
    pub temperature_centi: i16,
    pub humidity_centi: u16,
    pub battery_mv: u16,
}

impl TelemetryPacket {
    /// Validate framing and decode the payload
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let payload = check_frame(frame)?;
        Self::from_payload(payload)
    }

    /// Decode a payload whose framing was already verified
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != TELEMETRY_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: TELEMETRY_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let i16_at = |offset: usize| bytes_to_i16_le([payload[offset], payload[offset + 1]]);
        let u16_at = |offset: usize| bytes_to_u16_le([payload[offset], payload[offset + 1]]);

        let packet = Self {
            imu: ImuRaw {
                accel: [i16_at(0), i16_at(2), i16_at(4)],
                gyro: [i16_at(6), i16_at(8), i16_at(10)],
                pitch: i16_at(12),
                roll: i16_at(14),
                yaw: i16_at(16),
            },
            encoder_left: u16_at(18),
            encoder_right: u16_at(20),
            temperature_centi: i16_at(22),
            humidity_centi: u16_at(24),
            battery_mv: u16_at(26),
        };

        if !TEMPERATURE_RANGE_CENTI.contains(&packet.temperature_centi) {
            return Err(ProtocolError::InvalidValue {
                field: "temperature".to_string(),
                value: packet.temperature_centi as i64,
            });
        }
        if packet.humidity_centi > HUMIDITY_MAX_CENTI {
            return Err(ProtocolError::InvalidValue {
                field: "humidity".to_string(),
                value: packet.humidity_centi as i64,
            });
        }

        Ok(packet)
    }

    /// Build a complete frame (used by simulators and tests)
    pub fn encode(&self) -> [u8; TELEMETRY_FRAME_LEN] {
        let mut frame = [0u8; TELEMETRY_FRAME_LEN];
        frame[0] = TELEMETRY_HEADER;
        frame[1] = TELEMETRY_PAYLOAD_LEN as u8;

        let words: [[u8; 2]; 14] = [
            self.imu.accel[0].to_le_bytes(),
            self.imu.accel[1].to_le_bytes(),
            self.imu.accel[2].to_le_bytes(),
            self.imu.gyro[0].to_le_bytes(),
            self.imu.gyro[1].to_le_bytes(),
            self.imu.gyro[2].to_le_bytes(),
            self.imu.pitch.to_le_bytes(),
            self.imu.roll.to_le_bytes(),
            self.imu.yaw.to_le_bytes(),
            self.encoder_left.to_le_bytes(),
            self.encoder_right.to_le_bytes(),
            self.temperature_centi.to_le_bytes(),
            self.humidity_centi.to_le_bytes(),
            self.battery_mv.to_le_bytes(),
        ];
        for (i, word) in words.iter().enumerate() {
            frame[2 + i * 2..4 + i * 2].copy_from_slice(word);
        }

        frame[TELEMETRY_FRAME_LEN - 1] = xor_checksum(&frame[2..TELEMETRY_FRAME_LEN - 1]);
        frame
    }

    pub fn temperature_c(&self) -> f32 {
        self.temperature_centi as f32 / 100.0
    }

    pub fn humidity_pct(&self) -> f32 {
        self.humidity_centi as f32 / 100.0
    }

    pub fn battery_volts(&self) -> f32 {
        self.battery_mv as f32 / 1000.0
    }
}

/// Verify header, length byte and checksum; return the payload slice
pub fn check_frame(frame: &[u8]) -> Result<&[u8], ProtocolError> {
    if frame.len() != TELEMETRY_FRAME_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: TELEMETRY_FRAME_LEN,
            actual: frame.len(),
        });
    }
    if frame[0] != TELEMETRY_HEADER {
        return Err(ProtocolError::InvalidHeader {
            expected: TELEMETRY_HEADER,
            actual: frame[0],
        });
    }
    if frame[1] as usize != TELEMETRY_PAYLOAD_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: TELEMETRY_PAYLOAD_LEN,
            actual: frame[1] as usize,
        });
    }

    let payload = &frame[2..TELEMETRY_FRAME_LEN - 1];
    let expected = xor_checksum(payload);
    let actual = frame[TELEMETRY_FRAME_LEN - 1];
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }

    Ok(payload)
}

/// Byte-stream frame synchronizer
///
/// Serial reads return arbitrary chunks; `FrameSync` reassembles complete
/// frames. Bytes are never dropped silently: skipped garbage and corrupt
/// frames are reported as errors so the link layer can surface them.
#[derive(Debug, Default)]
pub struct FrameSync {
    buffer: Vec<u8>,
}

impl FrameSync {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(TELEMETRY_FRAME_LEN * 4),
        }
    }

    /// Append raw bytes read from the port
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Extract the next complete frame
    ///
    /// # Returns
    /// - `None`: not enough data yet
    /// - `Some(Ok(frame))`: a frame with valid framing
    /// - `Some(Err(_))`: bytes were discarded (garbage before a header, bad length, bad checksum)
    pub fn next_frame(&mut self) -> Option<Result<[u8; TELEMETRY_FRAME_LEN], ProtocolError>> {
        if self.buffer.is_empty() {
            return None;
        }

        // Resync on the header byte
        if self.buffer[0] != TELEMETRY_HEADER {
            let actual = self.buffer[0];
            let skip = self
                .buffer
                .iter()
                .position(|&b| b == TELEMETRY_HEADER)
                .unwrap_or(self.buffer.len());
            self.buffer.drain(..skip);
            return Some(Err(ProtocolError::InvalidHeader {
                expected: TELEMETRY_HEADER,
                actual,
            }));
        }

        if self.buffer.len() < 2 {
            return None;
        }
        if self.buffer[1] as usize != TELEMETRY_PAYLOAD_LEN {
            let actual = self.buffer[1] as usize;
            self.buffer.drain(..1);
            return Some(Err(ProtocolError::InvalidLength {
                expected: TELEMETRY_PAYLOAD_LEN,
                actual,
            }));
        }

        if self.buffer.len() < TELEMETRY_FRAME_LEN {
            return None;
        }

        let mut frame = [0u8; TELEMETRY_FRAME_LEN];
        frame.copy_from_slice(&self.buffer[..TELEMETRY_FRAME_LEN]);
        match check_frame(&frame) {
            Ok(_) => {
                self.buffer.drain(..TELEMETRY_FRAME_LEN);
                Some(Ok(frame))
            },
            Err(e) => {
                // Drop only the header so a frame starting inside this one can still be found
                self.buffer.drain(..1);
                Some(Err(e))
            },
        }
    }
}
