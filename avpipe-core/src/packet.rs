//! Compressed units handed from ingestion to the decode workers
//!
//! A [`Packet`] is produced once by ingestion and consumed once by a worker.
//! Besides ordinary payload-carrying units there are two markers:
//!
//! - an *invalid* unit, which signals a discontinuity (flush, and when it
//!   carries a non-negative pts, a seek to that position);
//! - an *end-of-stream* unit, emitted exactly once per stream segment.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Presentation timestamp used when ingestion does not know the time of a unit
pub const UNKNOWN_PTS: f64 = -1.0;

/// A compressed unit of media
#[derive(Debug, Clone)]
pub struct Packet {
    /// Compressed payload
    data: Bytes,
    /// Bytes already consumed by a decoder
    consumed: usize,
    /// Presentation time in seconds, negative when unknown
    pub pts: f64,
    /// Duration in seconds, zero when unknown
    pub duration: f64,
    /// Whether the unit starts a GOP
    pub is_key_frame: bool,
    is_end_of_stream: bool,
    is_valid: bool,
    /// Correlates a discontinuity with the seek that caused it (0 = none)
    pub sync_id: u32,
}

impl Packet {
    /// Create a payload-carrying unit
    pub fn new(data: impl Into<Bytes>, pts: f64) -> Self {
        Self {
            data: data.into(),
            consumed: 0,
            pts,
            duration: 0.0,
            is_key_frame: false,
            is_end_of_stream: false,
            is_valid: true,
            sync_id: 0,
        }
    }

    /// Create the end-of-stream marker
    pub fn end_of_stream() -> Self {
        Self {
            is_end_of_stream: true,
            ..Self::new(Bytes::new(), UNKNOWN_PTS)
        }
    }

    /// Create an explicit invalid unit announcing a discontinuity.
    ///
    /// A non-negative `target` turns the discontinuity into a seek to that
    /// position; a negative one only requests a decoder flush.
    pub fn discontinuity(sync_id: u32, target: f64) -> Self {
        Self {
            is_valid: false,
            sync_id,
            ..Self::new(Bytes::new(), target)
        }
    }

    /// Mark the unit as a key frame
    pub fn with_key_frame(mut self, key: bool) -> Self {
        self.is_key_frame = key;
        self
    }

    /// Set the unit duration in seconds
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// Whether this is a real unit rather than a discontinuity marker
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Whether this is the end-of-stream marker
    pub fn is_end_of_stream(&self) -> bool {
        self.is_end_of_stream
    }

    /// Whether a discontinuity marker also carries a seek target
    pub fn is_seek(&self) -> bool {
        !self.is_valid && self.pts >= 0.0
    }

    /// Whether the unit carries a usable presentation time
    pub fn has_pts(&self) -> bool {
        self.pts > 0.0
    }

    /// Full payload, ignoring the consumed cursor
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload bytes not yet consumed by a decoder
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.consumed.min(self.data.len())..]
    }

    /// Number of bytes not yet consumed
    pub fn remaining_len(&self) -> usize {
        self.data.len().saturating_sub(self.consumed)
    }

    /// Advance the consumed cursor after a partial decode
    pub fn advance(&mut self, consumed: usize) {
        self.consumed = (self.consumed + consumed).min(self.data.len());
    }

    /// Whether a decoder has consumed every byte
    pub fn is_consumed(&self) -> bool {
        self.remaining_len() == 0
    }
}

/// Rational time base used by containers to express raw timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    /// Numerator
    pub num: u32,
    /// Denominator
    pub den: u32,
}

impl Timebase {
    /// Create a new time base
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// The 90 kHz clock used by MPEG transport streams
    pub const MPEG_TS: Timebase = Timebase::new(1, 90_000);

    /// Milliseconds
    pub const MILLIS: Timebase = Timebase::new(1, 1_000);

    /// Convert a raw timestamp into seconds
    pub fn to_seconds(&self, raw: i64) -> f64 {
        if self.den == 0 {
            return UNKNOWN_PTS;
        }
        raw as f64 * self.num as f64 / self.den as f64
    }
}

/// Pluggable presentation-time normalization applied by ingestion
///
/// Containers disagree on how they stamp units; the normalizer maps a raw
/// container timestamp to seconds from the stream origin.
pub trait TimestampNormalizer: Send + Sync {
    /// Map a raw timestamp to seconds, returning [`UNKNOWN_PTS`] when unusable
    fn normalize(&self, raw: i64) -> f64;
}

impl TimestampNormalizer for Timebase {
    fn normalize(&self, raw: i64) -> f64 {
        if raw < 0 {
            return UNKNOWN_PTS;
        }
        self.to_seconds(raw)
    }
}

/// Normalizer that applies a stream-specific linear correction
#[derive(Debug, Clone, Copy)]
pub struct ScaledTimestamps {
    /// Base time unit of the raw values
    pub timebase: Timebase,
    /// Multiplier applied after conversion
    pub scale: f64,
    /// Offset subtracted after scaling, in seconds
    pub origin: f64,
}

impl TimestampNormalizer for ScaledTimestamps {
    fn normalize(&self, raw: i64) -> f64 {
        if raw < 0 {
            return UNKNOWN_PTS;
        }
        self.timebase.to_seconds(raw) * self.scale - self.origin
    }
}
