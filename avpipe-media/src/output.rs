//! Output sinks and the fanout that broadcasts frames to them
//!
//! Sinks are shared (`Arc`) between the worker that feeds them and the
//! code that adds or removes them, so every sink method takes `&self`.
//! Membership changes and delivery serialize on one lock: a broadcast
//! always sees a whole sink set.

use crate::error::MediaResult;
use crate::frame::{AudioFormat, PixelFormat, VideoFrame};
use parking_lot::Mutex;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// Identifier returned when a sink joins a fanout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(Uuid);

impl SinkId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PCM audio output
pub trait AudioSink: Send + Sync + Debug {
    /// Sink name used in logs
    fn name(&self) -> &str;

    /// Whether the device can currently be used
    fn is_available(&self) -> bool;

    /// Whether the device is open
    fn is_open(&self) -> bool;

    /// Open with `format`, returning the format actually in effect
    fn open(&self, format: AudioFormat) -> MediaResult<AudioFormat>;

    /// Close the device
    fn close(&self);

    /// Bytes accepted per [`AudioSink::play`] call
    fn buffer_size(&self) -> usize;

    /// Queue one chunk that starts at `timestamp`
    fn play(&self, data: &[u8], timestamp: f64) -> MediaResult<()>;

    /// Rate factor the device applies on top of the playback speed
    fn speed(&self) -> f64 {
        1.0
    }
}

/// Picture output
pub trait VideoSink: Send + Sync + Debug {
    /// Sink name used in logs
    fn name(&self) -> &str;

    /// Whether frames in `format` can be shown without conversion
    fn is_format_supported(&self, format: PixelFormat) -> bool;

    /// Format to convert into when the decoded one is unsupported
    fn preferred_format(&self) -> PixelFormat;

    /// Take one frame; the sink may keep a clone for its render cycle
    fn receive(&self, frame: &VideoFrame);

    /// Whether the sink wants the producer to pause between frames
    fn can_pause(&self) -> bool {
        false
    }

    /// Block the producer for at most `timeout`; true if released early
    fn request_pause(&self, _timeout: Duration) -> bool {
        false
    }
}

/// Concurrency-safe broadcast to a dynamic set of sinks
pub struct OutputFanout<S: ?Sized> {
    sinks: Mutex<Vec<(SinkId, Arc<S>)>>,
}

impl<S: ?Sized> OutputFanout<S> {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Add a sink at the end of the delivery order
    pub fn add_sink(&self, sink: Arc<S>) -> SinkId {
        let id = SinkId::new();
        let mut sinks = self.sinks.lock();
        sinks.push((id, sink));
        debug!(%id, count = sinks.len(), "sink added");
        id
    }

    /// Remove a sink; returns it when it was present
    pub fn remove_sink(&self, id: SinkId) -> Option<Arc<S>> {
        let mut sinks = self.sinks.lock();
        let index = sinks.iter().position(|(sink_id, _)| *sink_id == id)?;
        let (_, sink) = sinks.remove(index);
        debug!(%id, count = sinks.len(), "sink removed");
        Some(sink)
    }

    /// Remove every sink
    pub fn clear(&self) {
        self.sinks.lock().clear();
    }

    /// Number of sinks
    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Whether no sink is attached
    pub fn is_empty(&self) -> bool {
        self.sinks.lock().is_empty()
    }

    /// First sink in delivery order
    pub fn first(&self) -> Option<Arc<S>> {
        self.sinks.lock().first().map(|(_, sink)| sink.clone())
    }

    /// Run `f` over the current sink set while holding the membership lock
    pub fn with_sinks<R>(&self, f: impl FnOnce(&[(SinkId, Arc<S>)]) -> R) -> R {
        let sinks = self.sinks.lock();
        f(&sinks)
    }
}

impl<S: ?Sized> Default for OutputFanout<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> Debug for OutputFanout<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFanout")
            .field("sinks", &self.len())
            .finish()
    }
}

impl OutputFanout<dyn VideoSink> {
    /// Broadcast `frame` to every sink, returning how many received it
    pub fn deliver(&self, frame: &VideoFrame) -> usize {
        let sinks = self.sinks.lock();
        for (_, sink) in sinks.iter() {
            sink.receive(frame);
        }
        trace!(timestamp = frame.timestamp, sinks = sinks.len(), "frame delivered");
        sinks.len()
    }

    /// Target format for `format`, `None` when no conversion is needed.
    ///
    /// Negotiated against the first sink; RGB and palette pictures go to
    /// `Rgb32` when that sink takes it.
    pub fn negotiate_format(&self, format: PixelFormat) -> Option<PixelFormat> {
        let sink = self.first()?;
        if sink.is_format_supported(format) {
            return None;
        }
        if (format.is_rgb() || format.is_palettized())
            && sink.is_format_supported(PixelFormat::Rgb32)
        {
            return Some(PixelFormat::Rgb32);
        }
        Some(sink.preferred_format())
    }

    /// Whether any sink asks for producer backpressure
    pub fn can_pause(&self) -> bool {
        self.sinks.lock().iter().any(|(_, sink)| sink.can_pause())
    }

    /// Let every sink that wants to pause hold the producer, each for at
    /// most `timeout`. The membership lock is not held while waiting.
    pub fn request_pause(&self, timeout: Duration) -> bool {
        let pausing: Vec<Arc<dyn VideoSink>> = self
            .sinks
            .lock()
            .iter()
            .filter(|(_, sink)| sink.can_pause())
            .map(|(_, sink)| sink.clone())
            .collect();
        let mut released = false;
        for sink in pausing {
            released |= sink.request_pause(timeout);
        }
        released
    }
}
