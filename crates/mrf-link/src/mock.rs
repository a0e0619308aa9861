//! Scripted collaborators for tests and `--simulate`
//!
//! Each mock is a cheap clonable handle over shared state: hand one clone to
//! the runtime as the collaborator, keep another to script events and inspect
//! what the runtime did. Scripted events are served first; once the script is
//! empty the mock falls back to its idle mode.

use crate::camera::SyntheticCamera;
use crate::{
    ActuatorDecision, ActuatorSink, CameraBackend, CommandLink, ImageBuffer, LinkError,
    SerialConnector, SerialLink, TcpConnector,
};
use bytes::Bytes;
use mrf_protocol::{FrameSync, TelemetryPacket, telemetry::check_frame};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll granularity while waiting for scripted events
const POLL_SLICE: Duration = Duration::from_millis(1);

/// Wait up to `timeout` for `poll` to produce something, polling in short slices
fn poll_until<T>(timeout: Duration, mut poll: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = poll() {
            return Some(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        std::thread::sleep(POLL_SLICE.min(deadline - now));
    }
}

// ============================================================================
// Serial
// ============================================================================

#[derive(Debug, Clone)]
pub enum SerialEvent {
    /// One complete frame; framing is checked as a unit
    Frame(Bytes),
    /// Raw bytes appended to the port's byte stream and reassembled with
    /// [`FrameSync`] like the real link does
    Bytes(Bytes),
    /// The read fails with a device error (cable pulled, port reset, ...)
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialIdle {
    /// Nothing arrives; reads time out
    Silent,
    /// Generate a telemetry frame every `interval`
    Stream { interval: Duration },
}

#[derive(Debug)]
struct SerialState {
    script: VecDeque<SerialEvent>,
    idle: SerialIdle,
    fail_opens: usize,
    fail_writes: usize,
    open_attempts: Vec<Instant>,
    written: Vec<Bytes>,
    packet: TelemetryPacket,
    wheel_ticks: (i16, i16),
    next_stream_at: Option<Instant>,
    /// Bytes of the first streamed frame already gone by when a port opens
    open_offset: usize,
    skip_next: usize,
}

/// Scripted serial connector and link
#[derive(Debug, Clone)]
pub struct MockSerial {
    state: Arc<Mutex<SerialState>>,
}

impl Default for MockSerial {
    fn default() -> Self {
        Self::new(SerialIdle::Silent)
    }
}

impl MockSerial {
    pub fn new(idle: SerialIdle) -> Self {
        let packet = TelemetryPacket {
            temperature_centi: 2150,
            humidity_centi: 4000,
            battery_mv: 7400,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(SerialState {
                script: VecDeque::new(),
                idle,
                fail_opens: 0,
                fail_writes: 0,
                open_attempts: Vec::new(),
                written: Vec::new(),
                packet,
                wheel_ticks: (0, 0),
                next_stream_at: None,
                open_offset: 0,
                skip_next: 0,
            })),
        }
    }

    /// Telemetry stream at `rate_hz`
    pub fn streaming(rate_hz: u32) -> Self {
        Self::new(SerialIdle::Stream {
            interval: Duration::from_secs(1) / rate_hz.max(1),
        })
    }

    pub fn push(&self, event: SerialEvent) {
        self.state.lock().script.push_back(event);
    }

    pub fn push_packet(&self, packet: &TelemetryPacket) {
        self.push(SerialEvent::Frame(Bytes::copy_from_slice(&packet.encode())));
    }

    pub fn set_idle(&self, idle: SerialIdle) {
        let mut state = self.state.lock();
        state.idle = idle;
        state.next_stream_at = None;
    }

    /// Encoder ticks added per streamed frame (left, right)
    pub fn set_wheel_ticks(&self, left: i16, right: i16) {
        self.state.lock().wheel_ticks = (left, right);
    }

    pub fn set_battery_mv(&self, battery_mv: u16) {
        self.state.lock().packet.battery_mv = battery_mv;
    }

    /// Every open lands `offset` bytes into a streamed frame, like a device
    /// that was already transmitting
    pub fn open_mid_frame(&self, offset: usize) {
        self.state.lock().open_offset = offset;
    }

    /// The next `count` open attempts are refused
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().fail_opens = count;
    }

    /// The next `count` motor writes fail with a device error
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().fail_writes = count;
    }

    pub fn open_attempts(&self) -> Vec<Instant> {
        self.state.lock().open_attempts.clone()
    }

    /// Frames the runtime wrote to the port
    pub fn written(&self) -> Vec<Bytes> {
        self.state.lock().written.clone()
    }
}

impl SerialConnector for MockSerial {
    type Link = MockSerialLink;

    fn open(&mut self, port: &str, _baud_rate: u32) -> Result<Self::Link, LinkError> {
        let mut state = self.state.lock();
        state.open_attempts.push(Instant::now());
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(LinkError::Refused(format!("mock port {} unavailable", port)));
        }
        state.next_stream_at = None;
        state.skip_next = state.open_offset;
        Ok(MockSerialLink {
            state: self.state.clone(),
            sync: FrameSync::new(),
        })
    }
}

pub struct MockSerialLink {
    state: Arc<Mutex<SerialState>>,
    sync: FrameSync,
}

impl SerialState {
    fn next_streamed(&mut self, now: Instant) -> Option<Bytes> {
        let SerialIdle::Stream { interval } = self.idle else {
            return None;
        };
        let due = self.next_stream_at.unwrap_or(now);
        if now < due {
            return None;
        }
        self.next_stream_at = Some((due + interval).max(now));

        let mut rng = rand::thread_rng();
        let (left, right) = self.wheel_ticks;
        let packet = &mut self.packet;
        packet.encoder_left = packet.encoder_left.wrapping_add(left as u16);
        packet.encoder_right = packet.encoder_right.wrapping_add(right as u16);
        packet.imu.accel = [rng.gen_range(-20..=20), rng.gen_range(-20..=20), 16384];
        packet.imu.gyro = [rng.gen_range(-5..=5), rng.gen_range(-5..=5), rng.gen_range(-5..=5)];
        let frame = packet.encode();
        let skip = std::mem::take(&mut self.skip_next).min(frame.len());
        Some(Bytes::copy_from_slice(&frame[skip..]))
    }
}

impl SerialLink for MockSerialLink {
    fn read_frame(&mut self, timeout: Duration) -> Result<Bytes, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.sync.next_frame() {
                return match result {
                    Ok(frame) => Ok(Bytes::copy_from_slice(&frame)),
                    Err(e) => Err(LinkError::Framing(e)),
                };
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = poll_until(remaining, || {
                let mut state = self.state.lock();
                if let Some(event) = state.script.pop_front() {
                    return Some(event);
                }
                state.next_streamed(Instant::now()).map(SerialEvent::Bytes)
            });

            match event {
                Some(SerialEvent::Frame(frame)) => {
                    check_frame(&frame)?;
                    return Ok(frame);
                },
                Some(SerialEvent::Bytes(bytes)) => self.sync.push(&bytes),
                Some(SerialEvent::Error(message)) => return Err(LinkError::Device(message)),
                None => return Err(LinkError::Timeout),
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(LinkError::Device("mock write failed".to_string()));
        }
        state.written.push(Bytes::copy_from_slice(frame));
        Ok(())
    }
}

// ============================================================================
// Operator link
// ============================================================================

#[derive(Debug, Clone)]
pub enum TcpEvent {
    Line(String),
    /// The read fails with a device error
    Error(String),
    /// Peer closed the connection
    Close,
}

#[derive(Debug, Default)]
struct TcpState {
    script: VecDeque<TcpEvent>,
    fail_connects: usize,
    connect_attempts: Vec<Instant>,
    replies: Vec<String>,
}

/// Scripted operator endpoint
#[derive(Debug, Clone, Default)]
pub struct MockTcp {
    state: Arc<Mutex<TcpState>>,
}

impl MockTcp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command line from the operator
    pub fn send_line(&self, line: impl Into<String>) {
        self.state.lock().script.push_back(TcpEvent::Line(line.into()));
    }

    pub fn push(&self, event: TcpEvent) {
        self.state.lock().script.push_back(event);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().fail_connects = count;
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state.lock().connect_attempts.clone()
    }

    /// Reply lines written by the runtime, without terminators
    pub fn replies(&self) -> Vec<String> {
        self.state.lock().replies.clone()
    }

    /// Block until a reply satisfying `pred` shows up
    pub fn wait_for_reply(
        &self,
        timeout: Duration,
        pred: impl Fn(&str) -> bool,
    ) -> Option<String> {
        poll_until(timeout, || {
            self.state.lock().replies.iter().find(|r| pred(r)).cloned()
        })
    }
}

impl TcpConnector for MockTcp {
    type Link = MockTcpLink;

    fn connect(
        &mut self,
        host: &str,
        port: u16,
        _timeout: Duration,
    ) -> Result<Self::Link, LinkError> {
        let mut state = self.state.lock();
        state.connect_attempts.push(Instant::now());
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(LinkError::Refused(format!("mock {}:{} refused", host, port)));
        }
        Ok(MockTcpLink {
            state: self.state.clone(),
        })
    }
}

pub struct MockTcpLink {
    state: Arc<Mutex<TcpState>>,
}

impl CommandLink for MockTcpLink {
    fn send_command(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let text = String::from_utf8_lossy(bytes);
        let mut state = self.state.lock();
        for line in text.lines() {
            state.replies.push(line.to_string());
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Bytes, LinkError> {
        match poll_until(timeout, || self.state.lock().script.pop_front()) {
            Some(TcpEvent::Line(line)) => Ok(Bytes::from(line.into_bytes())),
            Some(TcpEvent::Error(message)) => Err(LinkError::Device(message)),
            Some(TcpEvent::Close) => Err(LinkError::Closed),
            None => Err(LinkError::Timeout),
        }
    }
}

// ============================================================================
// Camera
// ============================================================================

#[derive(Debug, Clone)]
pub enum CameraEvent {
    Frame(ImageBuffer),
    /// Capture or decode failure
    Failure(String),
}

#[derive(Debug)]
struct CameraState {
    script: VecDeque<CameraEvent>,
    /// `None` = silent
    stream: Option<SyntheticCamera>,
    grabs: u64,
}

/// Scripted camera; streams synthetic frames when the script is empty
#[derive(Debug, Clone)]
pub struct MockCamera {
    state: Arc<Mutex<CameraState>>,
}

impl MockCamera {
    pub fn silent() -> Self {
        Self {
            state: Arc::new(Mutex::new(CameraState {
                script: VecDeque::new(),
                stream: None,
                grabs: 0,
            })),
        }
    }

    pub fn streaming(width: u32, height: u32, fps: u32) -> Self {
        let camera = Self::silent();
        camera.state.lock().stream = Some(SyntheticCamera::new(width, height, fps));
        camera
    }

    pub fn push(&self, event: CameraEvent) {
        self.state.lock().script.push_back(event);
    }

    /// Stop streaming; grabs time out from now on
    pub fn go_silent(&self) {
        self.state.lock().stream = None;
    }

    pub fn grab_count(&self) -> u64 {
        self.state.lock().grabs
    }
}

impl CameraBackend for MockCamera {
    fn grab_frame(&mut self, timeout: Duration) -> Result<ImageBuffer, LinkError> {
        self.state.lock().grabs += 1;
        let event = poll_until(timeout, || {
            let mut state = self.state.lock();
            if let Some(event) = state.script.pop_front() {
                return Some(Ok(event));
            }
            match state.stream.as_mut() {
                Some(camera) => match camera.grab_frame(Duration::ZERO) {
                    Ok(image) => Some(Ok(CameraEvent::Frame(image))),
                    Err(LinkError::Timeout) => None,
                    Err(e) => Some(Err(e)),
                },
                None => None,
            }
        });

        match event {
            Some(Ok(CameraEvent::Frame(image))) => Ok(image),
            Some(Ok(CameraEvent::Failure(message))) => Err(LinkError::Decode(message)),
            Some(Err(e)) => Err(e),
            None => Err(LinkError::Timeout),
        }
    }
}

// ============================================================================
// Actuators
// ============================================================================

/// Records every decision it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    decisions: Arc<Mutex<Vec<ActuatorDecision>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<ActuatorDecision> {
        self.decisions.lock().clone()
    }

    pub fn last(&self) -> Option<ActuatorDecision> {
        self.decisions.lock().last().copied()
    }

    pub fn len(&self) -> usize {
        self.decisions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.lock().is_empty()
    }
}

impl ActuatorSink for RecordingSink {
    fn apply(&mut self, decision: &ActuatorDecision) {
        self.decisions.lock().push(*decision);
    }
}
