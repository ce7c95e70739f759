//! Event subscription for player clients

use avpipe_media::{PlaybackEvent, StreamKind};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Stream of playback events for async or polling consumers
#[derive(Debug)]
pub struct EventStream {
    receiver: broadcast::Receiver<PlaybackEvent>,
    missed: u64,
}

impl EventStream {
    /// Wrap a bus receiver
    pub fn new(receiver: broadcast::Receiver<PlaybackEvent>) -> Self {
        Self {
            receiver,
            missed: 0,
        }
    }

    /// Next event; `None` once the player is gone.
    ///
    /// A consumer that falls behind skips the overwritten events.
    pub async fn next(&mut self) -> Option<PlaybackEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting
    pub fn try_next(&mut self) -> Option<PlaybackEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events skipped because this consumer lagged
    pub fn missed(&self) -> u64 {
        self.missed
    }

    fn lagged(&mut self, skipped: u64) {
        self.missed += skipped;
        warn!(skipped, "event consumer lagged");
    }
}

/// Event filter for selective event processing
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Keep only events of this stream; pipeline-wide events always pass
    pub stream: Option<StreamKind>,
    /// Drop per-frame delivery notifications
    pub skip_per_frame: bool,
    /// Specific event types to include (if specified, overrides other filters)
    pub specific_event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a filter that includes all events
    pub fn all() -> Self {
        Self::default()
    }

    /// Events of one stream, plus pipeline-wide ones
    pub fn stream_only(stream: StreamKind) -> Self {
        Self {
            stream: Some(stream),
            ..Self::default()
        }
    }

    /// Everything except per-frame notifications
    pub fn state_changes() -> Self {
        Self {
            skip_per_frame: true,
            ..Self::default()
        }
    }

    /// Create a filter for specific event types, e.g. `"seek_finished"`
    pub fn specific(event_types: Vec<String>) -> Self {
        Self {
            specific_event_types: Some(event_types),
            ..Self::default()
        }
    }

    /// Check if an event should be included based on this filter
    pub fn should_include(&self, event: &PlaybackEvent) -> bool {
        if let Some(ref specific_types) = self.specific_event_types {
            return specific_types.iter().any(|t| t == event.event_type());
        }
        if self.skip_per_frame && event.is_per_frame() {
            return false;
        }
        match (self.stream, event.stream()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}

/// Filtered event stream that only yields events matching a filter
#[derive(Debug)]
pub struct FilteredEventStream {
    stream: EventStream,
    filter: EventFilter,
}

impl FilteredEventStream {
    /// Create a new filtered event stream
    pub fn new(stream: EventStream, filter: EventFilter) -> Self {
        Self { stream, filter }
    }

    /// Get the next event that matches the filter
    pub async fn next(&mut self) -> Option<PlaybackEvent> {
        loop {
            let event = self.stream.next().await?;
            if self.filter.should_include(&event) {
                return Some(event);
            }
        }
    }

    /// Try to get the next filtered event without waiting
    pub fn try_next(&mut self) -> Option<PlaybackEvent> {
        loop {
            let event = self.stream.try_next()?;
            if self.filter.should_include(&event) {
                return Some(event);
            }
        }
    }

    /// Update the filter
    pub fn set_filter(&mut self, filter: EventFilter) {
        self.filter = filter;
    }

    /// Current filter
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}
