//! Decoder, resampler and converter interfaces
//!
//! Bitstream decoding, sample-rate conversion and pixel conversion are done
//! by external implementations. The workers own one instance of each and
//! drive them from their own thread only, so the traits take `&mut self`.

use crate::error::MediaResult;
use crate::frame::{AudioFormat, AudioFrame, PixelFormat, VideoFrame};
use avpipe_core::Packet;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Decoder fidelity under load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodeMode {
    /// Decode every frame
    #[default]
    Normal,
    /// Skip frames no other frame references
    DropNonReference,
}

/// Video bitstream decoder
pub trait VideoDecoder: Send + Debug {
    /// Codec name used in logs and errors
    fn name(&self) -> &str;

    /// Whether the decoder is usable
    fn is_available(&self) -> bool {
        true
    }

    /// Feed the unprocessed bytes of `packet`, returning how many were consumed.
    ///
    /// An end-of-stream unit asks the decoder to drain; once nothing is
    /// buffered it should fail or produce no frame.
    fn decode(&mut self, packet: &Packet) -> MediaResult<usize>;

    /// Take the picture produced by the last successful decode, if any
    fn frame(&mut self) -> Option<VideoFrame>;

    /// Drop all buffered state, e.g. after a discontinuity
    fn flush(&mut self);

    /// Switch decode fidelity
    fn set_decode_mode(&mut self, mode: DecodeMode) {
        let _ = mode;
    }
}

/// Audio bitstream decoder
pub trait AudioDecoder: Send + Debug {
    /// Codec name used in logs and errors
    fn name(&self) -> &str;

    /// Whether the decoder is usable
    fn is_available(&self) -> bool {
        true
    }

    /// Format of the frames this decoder produces
    fn native_format(&self) -> AudioFormat;

    /// Feed the unprocessed bytes of `packet`, returning how many were consumed
    fn decode(&mut self, packet: &Packet) -> MediaResult<usize>;

    /// Take the samples produced by the last successful decode, if any
    fn frame(&mut self) -> Option<AudioFrame>;

    /// Drop all buffered state
    fn flush(&mut self);
}

/// Sample format and speed conversion
pub trait Resampler: Send + Debug {
    /// Target format of [`Resampler::convert`]
    fn set_output_format(&mut self, format: AudioFormat);

    /// Current target format
    fn output_format(&self) -> AudioFormat;

    /// Playback speed the output is stretched to
    fn set_speed(&mut self, speed: f64);

    /// Current speed
    fn speed(&self) -> f64;

    /// Rebuild internal state after a format or speed change
    fn prepare(&mut self) -> MediaResult<()>;

    /// Convert one frame to the output format and speed
    fn convert(&mut self, frame: &AudioFrame) -> MediaResult<AudioFrame>;
}

/// Picture adjustments applied during conversion, each in `-100..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Equalizer {
    /// Brightness offset
    pub brightness: i32,
    /// Contrast offset
    pub contrast: i32,
    /// Saturation offset
    pub saturation: i32,
}

impl Equalizer {
    /// Build an equalizer, clamping each value into range
    pub fn new(brightness: i32, contrast: i32, saturation: i32) -> Self {
        Self {
            brightness: brightness.clamp(-100, 100),
            contrast: contrast.clamp(-100, 100),
            saturation: saturation.clamp(-100, 100),
        }
    }

    /// Whether every adjustment is neutral
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }
}

/// Pixel format conversion
pub trait FrameConverter: Send + Debug {
    /// Convert `frame` into `target`
    fn convert(&mut self, frame: &VideoFrame, target: PixelFormat) -> MediaResult<VideoFrame>;

    /// Picture adjustments applied by subsequent conversions
    fn set_equalizer(&mut self, equalizer: Equalizer);
}
