//! Camera frames and a synthetic frame source

use crate::{CameraBackend, LinkError};
use bytes::Bytes;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// Decoded image (pixel data is reference counted, clones are cheap)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl ImageBuffer {
    /// Build an image, checking that `data` matches the dimensions
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, LinkError> {
        let data = data.into();
        let expected = Self::expected_len(width, height, format);
        if data.len() != expected {
            return Err(LinkError::Decode(format!(
                "{}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Gray gradient generator paced at a fixed frame rate
///
/// Used by `--simulate` and by tests that need a live image stream without a device.
#[derive(Debug)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_interval: Duration,
    next_frame_at: Option<Instant>,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            next_frame_at: None,
            frame_count: 0,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> Bytes {
        let shift = (self.frame_count % 256) as usize;
        let width = self.width as usize;
        let pixels = width * self.height as usize;
        (0..pixels)
            .map(|i| ((i % width.max(1) + shift) % 256) as u8)
            .collect::<Vec<u8>>()
            .into()
    }
}

impl CameraBackend for SyntheticCamera {
    fn grab_frame(&mut self, timeout: Duration) -> Result<ImageBuffer, LinkError> {
        let now = Instant::now();
        let due = self.next_frame_at.unwrap_or(now);
        let wait = due.saturating_duration_since(now);
        if wait > timeout {
            std::thread::sleep(timeout);
            return Err(LinkError::Timeout);
        }
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }

        self.next_frame_at = Some(due.max(now) + self.frame_interval);
        let data = self.render();
        self.frame_count += 1;
        ImageBuffer::new(self.width, self.height, PixelFormat::Gray8, data)
    }
}
