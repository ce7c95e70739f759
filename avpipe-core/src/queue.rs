//! Blocking FIFO handoff of packets from ingestion to a worker

use crate::packet::Packet;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default capacity hint used by ingestion for backpressure
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
struct QueueState {
    packets: VecDeque<Packet>,
    stopped: bool,
}

/// Thread-safe packet queue with blocking take
///
/// `push` never rejects: capacity is a hint that ingestion checks through
/// [`PacketQueue::is_full`] to apply its own backpressure.
#[derive(Debug)]
pub struct PacketQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl PacketQueue {
    /// Create a queue with the default capacity hint
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue with a capacity hint
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a unit and wake one waiting consumer
    pub fn push(&self, packet: Packet) {
        let mut state = self.state.lock();
        state.packets.push_back(packet);
        trace!(size = state.packets.len(), "packet pushed");
        drop(state);
        self.available.notify_one();
    }

    /// Block until a unit is available.
    ///
    /// Returns `None` once the queue has been stopped.
    pub fn take(&self) -> Option<Packet> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(packet) = state.packets.pop_front() {
                return Some(packet);
            }
            self.available.wait(&mut state);
        }
    }

    /// Block for at most `timeout` waiting for a unit.
    ///
    /// Returns `None` on timeout or when the queue is stopped.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(packet) = state.packets.pop_front() {
                return Some(packet);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                if state.stopped {
                    return None;
                }
                return state.packets.pop_front();
            }
        }
    }

    /// Drop every pending unit
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.packets.len();
        state.packets.clear();
        drop(state);
        if dropped > 0 {
            debug!(dropped, "packet queue cleared");
        }
        self.available.notify_all();
    }

    /// Stop the queue, waking every blocked consumer
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.available.notify_all();
    }

    /// Re-arm a stopped queue so it can feed a restarted worker
    pub fn restart(&self) {
        self.state.lock().stopped = false;
    }

    /// Whether [`PacketQueue::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of pending units
    pub fn size(&self) -> usize {
        self.state.lock().packets.len()
    }

    /// Whether no unit is pending
    pub fn is_empty(&self) -> bool {
        self.state.lock().packets.is_empty()
    }

    /// Whether ingestion should hold off pushing
    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    /// Capacity hint
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}
