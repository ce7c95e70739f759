//! Typed playback notifications
//!
//! Workers publish synchronously on their own thread. Subscribers receive
//! every event on whatever thread they poll from; a slow subscriber gets
//! `RecvError::Lagged` instead of stalling a worker.

use crate::codecs::DecodeMode;
use avpipe_core::ClockDriveMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Which worker an event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Audio worker
    Audio,
    /// Video worker
    Video,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Notification published by the workers
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// A frame reached the outputs
    FrameDelivered {
        /// Producing stream
        stream: StreamKind,
        /// Presentation time of the frame
        timestamp: f64,
    },
    /// The decoder drained after the end-of-stream unit
    EndOfStreamDecoded {
        /// Producing stream
        stream: StreamKind,
    },
    /// Playback resumed at the seek target
    SeekFinished {
        /// Producing stream
        stream: StreamKind,
        /// Timestamp of the first frame at or past the target
        timestamp: f64,
    },
    /// Video decode fidelity changed
    DecodeModeChanged {
        /// New mode
        mode: DecodeMode,
    },
    /// The rest of a GOP was abandoned to catch up
    GopAbandoned {
        /// Lag behind the clock when abandoning, seconds
        lag: f64,
    },
    /// The clock drive mode was switched by a worker
    ClockModeChanged {
        /// New mode
        mode: ClockDriveMode,
    },
    /// The last displayed frame was captured
    FrameCaptured {
        /// Capture name
        name: String,
        /// Presentation time of the captured frame
        timestamp: f64,
    },
    /// A worker entered its run loop
    WorkerStarted {
        /// Worker stream
        stream: StreamKind,
    },
    /// A worker left its run loop
    WorkerStopped {
        /// Worker stream
        stream: StreamKind,
    },
}

impl PlaybackEvent {
    /// Stable name of the event kind
    pub fn event_type(&self) -> &'static str {
        match self {
            PlaybackEvent::FrameDelivered { .. } => "frame_delivered",
            PlaybackEvent::EndOfStreamDecoded { .. } => "end_of_stream_decoded",
            PlaybackEvent::SeekFinished { .. } => "seek_finished",
            PlaybackEvent::DecodeModeChanged { .. } => "decode_mode_changed",
            PlaybackEvent::GopAbandoned { .. } => "gop_abandoned",
            PlaybackEvent::ClockModeChanged { .. } => "clock_mode_changed",
            PlaybackEvent::FrameCaptured { .. } => "frame_captured",
            PlaybackEvent::WorkerStarted { .. } => "worker_started",
            PlaybackEvent::WorkerStopped { .. } => "worker_stopped",
        }
    }

    /// Stream the event belongs to; `None` for pipeline-wide events
    pub fn stream(&self) -> Option<StreamKind> {
        match self {
            PlaybackEvent::FrameDelivered { stream, .. }
            | PlaybackEvent::EndOfStreamDecoded { stream }
            | PlaybackEvent::SeekFinished { stream, .. }
            | PlaybackEvent::WorkerStarted { stream }
            | PlaybackEvent::WorkerStopped { stream } => Some(*stream),
            PlaybackEvent::DecodeModeChanged { .. }
            | PlaybackEvent::GopAbandoned { .. }
            | PlaybackEvent::FrameCaptured { .. } => Some(StreamKind::Video),
            PlaybackEvent::ClockModeChanged { .. } => None,
        }
    }

    /// Per-frame events that are usually too chatty to log
    pub fn is_per_frame(&self) -> bool {
        matches!(self, PlaybackEvent::FrameDelivered { .. })
    }
}

/// Broadcast channel shared by every pipeline component
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers; dropped when nobody listens
    pub fn publish(&self, event: PlaybackEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(PlaybackEvent::WorkerStarted {
            stream: StreamKind::Video,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_classification() {
        let event = PlaybackEvent::GopAbandoned { lag: 1.5 };
        assert_eq!(event.event_type(), "gop_abandoned");
        assert_eq!(event.stream(), Some(StreamKind::Video));
        let event = PlaybackEvent::ClockModeChanged {
            mode: ClockDriveMode::AudioDriven,
        };
        assert_eq!(event.stream(), None);
        assert!(!event.is_per_frame());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();
        bus.publish(PlaybackEvent::EndOfStreamDecoded {
            stream: StreamKind::Audio,
        });
        let expected = PlaybackEvent::EndOfStreamDecoded {
            stream: StreamKind::Audio,
        };
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }

    #[test]
    fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.publish(PlaybackEvent::FrameDelivered {
                stream: StreamKind::Video,
                timestamp: i as f64,
            });
        }
        assert!(matches!(
            tokio_test::block_on(rx.recv()),
            Err(broadcast::error::RecvError::Lagged(8))
        ));
    }
}
