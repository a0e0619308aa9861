//! Shared telemetry store
//!
//! One slot per data kind. Each slot is a single-writer double buffer:
//! the publishing worker builds a new value, bumps the slot version under the
//! slot mutex and swaps it in with `ArcSwap`. Readers never lock and never see
//! a torn value; versions observed by any reader are non-decreasing.
//!
//! Slots are independent: there is no ordering between a sensor publish and
//! an image publish.

use arc_swap::ArcSwapOption;
use mrf_link::ImageBuffer;
use mrf_protocol::{ImuRaw, TelemetryPacket};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Latest serial telemetry reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorData {
    /// Receive time (monotonic seconds, see [`crate::clock`])
    pub timestamp: f64,
    /// °C
    pub temperature: f32,
    /// %RH
    pub humidity: f32,
    /// V
    pub battery_voltage: f32,
    /// 16-bit wrapping counters; compute deltas with `wrapping_sub`
    pub encoder_left: u16,
    pub encoder_right: u16,
    pub imu: ImuRaw,
}

impl SensorData {
    pub fn from_packet(packet: &TelemetryPacket, timestamp: f64) -> Self {
        Self {
            timestamp,
            temperature: packet.temperature_c(),
            humidity: packet.humidity_pct(),
            battery_voltage: packet.battery_volts(),
            encoder_left: packet.encoder_left,
            encoder_right: packet.encoder_right,
            imu: packet.imu,
        }
    }
}

/// Latest camera frame
///
/// `buffer` is `None` for capture/decode failures; consumers ignore such frames
/// but the sequence number still advances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageData {
    pub buffer: Option<ImageBuffer>,
    /// Capture time (monotonic seconds)
    pub timestamp: f64,
    /// Strictly increasing per camera session, starting at 1
    pub sequence_number: u64,
}

impl ImageData {
    pub fn valid(buffer: ImageBuffer, timestamp: f64, sequence_number: u64) -> Self {
        Self {
            buffer: Some(buffer),
            timestamp,
            sequence_number,
        }
    }

    pub fn invalid(timestamp: f64, sequence_number: u64) -> Self {
        Self {
            buffer: None,
            timestamp,
            sequence_number,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.buffer.is_some()
    }
}

/// A published value and its slot version (versions start at 1)
#[derive(Debug)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Single-writer, multi-reader slot
#[derive(Debug)]
pub struct Slot<T> {
    /// Serializes publishers and owns the version counter
    version: Mutex<u64>,
    current: ArcSwapOption<Versioned<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            version: Mutex::new(0),
            current: ArcSwapOption::const_empty(),
        }
    }
}

impl<T> Slot<T> {
    /// Replace the current value, returning its version
    pub fn publish(&self, value: T) -> u64 {
        let mut version = self.version.lock();
        *version += 1;
        self.current.store(Some(Arc::new(Versioned {
            value,
            version: *version,
        })));
        *version
    }

    /// Latest value, or `None` before the first publish
    pub fn load(&self) -> Option<Arc<Versioned<T>>> {
        self.current.load_full()
    }

    /// Version of the latest value (0 = never published)
    pub fn version(&self) -> u64 {
        self.current.load().as_ref().map_or(0, |v| v.version)
    }
}

/// Telemetry slots shared between workers and the control loop
#[derive(Debug, Default)]
pub struct TelemetryStore {
    sensor: Slot<SensorData>,
    image: Slot<ImageData>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called only by the serial worker
    pub fn publish_sensor(&self, data: SensorData) -> u64 {
        self.sensor.publish(data)
    }

    /// Called only by the camera worker
    pub fn publish_image(&self, data: ImageData) -> u64 {
        self.image.publish(data)
    }

    /// Latest sensor reading and its version
    ///
    /// Before the first publish this returns a default reading with version 0.
    pub fn read_sensor(&self) -> (SensorData, u64) {
        match self.sensor.load() {
            Some(v) => (v.value, v.version),
            None => (SensorData::default(), 0),
        }
    }

    /// Latest image and its version
    ///
    /// Before the first publish this returns an invalid image with version 0.
    /// Pixel data is reference counted; the clone does not copy it.
    pub fn read_image(&self) -> (ImageData, u64) {
        match self.image.load() {
            Some(v) => (v.value.clone(), v.version),
            None => (ImageData::default(), 0),
        }
    }

    pub fn sensor_version(&self) -> u64 {
        self.sensor.version()
    }

    pub fn image_version(&self) -> u64 {
        self.image.version()
    }

    pub fn is_sensor_stale(&self, now: f64, threshold: Duration) -> bool {
        let (data, version) = self.read_sensor();
        is_stale(version, data.timestamp, now, threshold)
    }

    pub fn is_image_stale(&self, now: f64, threshold: Duration) -> bool {
        let (data, version) = self.read_image();
        is_stale(version, data.timestamp, now, threshold)
    }
}

/// A never-published slot (version 0) is always stale
pub fn is_stale(version: u64, timestamp: f64, now: f64, threshold: Duration) -> bool {
    version == 0 || now - timestamp > threshold.as_secs_f64()
}
