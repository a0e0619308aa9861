//! Runtime metrics
//!
//! Lock-free atomic counters updated by the workers and the control loop and
//! readable from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Runtime counters
///
/// # Example
///
/// ```rust
/// use mrf_driver::RuntimeMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = RuntimeMetrics::new();
/// metrics.serial_frames.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().serial_frames, 1);
/// ```
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    /// Telemetry frames decoded and published
    pub serial_frames: AtomicU64,
    /// Serial reads that timed out (normal when the MCU is quiet)
    pub serial_timeouts: AtomicU64,
    /// Motor frames written to the serial port
    pub motor_frames: AtomicU64,
    /// Motor mailbox overwrites (control loop faster than the serial worker)
    pub motor_overwrites: AtomicU64,
    /// Link failures across all channels (open/connect/read/write)
    pub link_errors: AtomicU64,
    /// Telemetry payloads dropped by the decoder
    pub decode_errors: AtomicU64,
    /// Framing errors skipped while locking onto a fresh serial stream
    pub serial_resyncs: AtomicU64,
    /// Operator command lines received
    pub commands_received: AtomicU64,
    /// Commands rejected (parse error or no matching transition)
    pub commands_rejected: AtomicU64,
    pub camera_frames: AtomicU64,
    /// Frames published with `is_valid = false`
    pub camera_invalid_frames: AtomicU64,
    pub control_ticks: AtomicU64,
    /// Ticks that overran the control period
    pub control_overruns: AtomicU64,
    /// Stale consumed slots detected while moving
    pub stale_faults: AtomicU64,
    /// Fault events lost because the fault queue was full
    pub faults_dropped: AtomicU64,
    pub actuator_decisions: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            serial_frames: self.serial_frames.load(Ordering::Relaxed),
            serial_timeouts: self.serial_timeouts.load(Ordering::Relaxed),
            motor_frames: self.motor_frames.load(Ordering::Relaxed),
            motor_overwrites: self.motor_overwrites.load(Ordering::Relaxed),
            link_errors: self.link_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            serial_resyncs: self.serial_resyncs.load(Ordering::Relaxed),
            commands_received: self.commands_received.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            camera_frames: self.camera_frames.load(Ordering::Relaxed),
            camera_invalid_frames: self.camera_invalid_frames.load(Ordering::Relaxed),
            control_ticks: self.control_ticks.load(Ordering::Relaxed),
            control_overruns: self.control_overruns.load(Ordering::Relaxed),
            stale_faults: self.stale_faults.load(Ordering::Relaxed),
            faults_dropped: self.faults_dropped.load(Ordering::Relaxed),
            actuator_decisions: self.actuator_decisions.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.serial_frames.store(0, Ordering::Relaxed);
        self.serial_timeouts.store(0, Ordering::Relaxed);
        self.motor_frames.store(0, Ordering::Relaxed);
        self.motor_overwrites.store(0, Ordering::Relaxed);
        self.link_errors.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.serial_resyncs.store(0, Ordering::Relaxed);
        self.commands_received.store(0, Ordering::Relaxed);
        self.commands_rejected.store(0, Ordering::Relaxed);
        self.camera_frames.store(0, Ordering::Relaxed);
        self.camera_invalid_frames.store(0, Ordering::Relaxed);
        self.control_ticks.store(0, Ordering::Relaxed);
        self.control_overruns.store(0, Ordering::Relaxed);
        self.stale_faults.store(0, Ordering::Relaxed);
        self.faults_dropped.store(0, Ordering::Relaxed);
        self.actuator_decisions.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`RuntimeMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub serial_frames: u64,
    pub serial_timeouts: u64,
    pub motor_frames: u64,
    pub motor_overwrites: u64,
    pub link_errors: u64,
    pub decode_errors: u64,
    pub serial_resyncs: u64,
    pub commands_received: u64,
    pub commands_rejected: u64,
    pub camera_frames: u64,
    pub camera_invalid_frames: u64,
    pub control_ticks: u64,
    pub control_overruns: u64,
    pub stale_faults: u64,
    pub faults_dropped: u64,
    pub actuator_decisions: u64,
}

impl MetricsSnapshot {
    /// Share of camera frames that failed (percent, 0 when no frames)
    pub fn camera_failure_rate(&self) -> f64 {
        if self.camera_frames == 0 {
            return 0.0;
        }
        (self.camera_invalid_frames as f64 / self.camera_frames as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_default() {
        let snapshot = RuntimeMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.camera_failure_rate(), 0.0);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = RuntimeMetrics::new();
        metrics.serial_frames.fetch_add(100, Ordering::Relaxed);
        metrics.camera_frames.fetch_add(4, Ordering::Relaxed);
        metrics.camera_invalid_frames.fetch_add(1, Ordering::Relaxed);
        let before = metrics.snapshot();
        assert_eq!(before.serial_frames, 100);
        assert_eq!(before.camera_failure_rate(), 25.0);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_concurrent_updates() {
        let metrics = Arc::new(RuntimeMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.control_ticks.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().control_ticks, 4000);
    }
}
