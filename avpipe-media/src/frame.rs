//! Decoded frames and their format descriptors
//!
//! Payloads are reference counted ([`Bytes`]) so a sink may keep a frame
//! for its render cycle without copying.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sample encoding of PCM audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16 bit interleaved
    S16,
    /// Signed 32 bit interleaved
    S32,
    /// 32 bit float interleaved
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

/// Audio stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Sample encoding
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Create a new audio format
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Whether the format describes playable audio
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    /// Bytes in one sample frame (one sample per channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    /// Bytes per second of playback
    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    /// Playback duration of `len` bytes, in seconds
    pub fn duration_of(&self, len: usize) -> f64 {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0.0;
        }
        len as f64 / rate as f64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48_000, 2, SampleFormat::S16)
    }
}

/// Decoded PCM audio
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation time in seconds
    pub timestamp: f64,
    /// Format of `data`
    pub format: AudioFormat,
    /// Interleaved samples
    pub data: Bytes,
}

impl AudioFrame {
    /// Create a new audio frame
    pub fn new(timestamp: f64, format: AudioFormat, data: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            format,
            data: data.into(),
        }
    }

    /// Whether the frame carries samples in a valid format
    pub fn is_valid(&self) -> bool {
        self.format.is_valid() && !self.data.is_empty()
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        self.format.duration_of(self.data.len())
    }
}

/// Pixel layout of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0
    Yuv420p,
    /// Semi-planar YUV 4:2:0
    Nv12,
    /// Packed 24 bit RGB
    Rgb24,
    /// Packed 32 bit RGB, alpha ignored
    Rgb32,
    /// Packed 32 bit BGRA
    Bgra32,
    /// 8 bit palette indices
    Pal8,
    /// 8 bit grey
    Gray8,
}

impl PixelFormat {
    /// Whether the format is packed RGB
    pub fn is_rgb(&self) -> bool {
        matches!(
            self,
            PixelFormat::Rgb24 | PixelFormat::Rgb32 | PixelFormat::Bgra32
        )
    }

    /// Whether the format stores palette indices
    pub fn is_palettized(&self) -> bool {
        matches!(self, PixelFormat::Pal8)
    }
}

/// Decoded video picture
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation time in seconds
    pub timestamp: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout of `data`
    pub pixel_format: PixelFormat,
    /// Image bytes
    pub data: Bytes,
    /// Whether the picture came from a key frame
    pub is_key_frame: bool,
}

impl VideoFrame {
    /// Create a new video frame
    pub fn new(
        timestamp: f64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            timestamp,
            width,
            height,
            pixel_format,
            data: data.into(),
            is_key_frame: false,
        }
    }

    /// Empty picture delivered to sinks to clear their output
    pub fn blank() -> Self {
        Self::new(0.0, 0, 0, PixelFormat::Rgb32, Bytes::new())
    }

    /// Mark the frame as decoded from a key frame
    pub fn with_key_frame(mut self, key: bool) -> Self {
        self.is_key_frame = key;
        self
    }

    /// Whether the frame holds a picture
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.data.is_empty()
    }
}
