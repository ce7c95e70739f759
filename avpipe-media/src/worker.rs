//! Run-loop skeleton shared by the audio and video workers
//!
//! Each worker embeds a [`WorkerLoop`] and drives it from its own thread.
//! Other threads only talk to a worker through its [`WorkerControl`]:
//! they schedule tasks, request pause, seek or stop. Tasks are drained at
//! the top of each iteration, so a worker never races with its own state.

use crate::events::{EventBus, PlaybackEvent, StreamKind};
use avpipe_core::{MasterClock, Packet, PacketQueue, SharedMetrics};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Created, loop not entered yet
    Idle,
    /// Producing output
    Running,
    /// Pause took effect; tasks and stop are still observed
    Paused,
    /// Loop exited
    Stopped,
}

#[derive(Debug)]
struct ControlState<T> {
    stop: bool,
    pause_requested: bool,
    seek_requested: bool,
    run_state: RunState,
    tasks: VecDeque<T>,
    generation: u64,
}

/// Cross-thread control block of one worker
#[derive(Debug)]
pub struct WorkerControl<T> {
    state: Mutex<ControlState<T>>,
    wake: Condvar,
}

impl<T> WorkerControl<T> {
    /// Create a control block for an idle worker
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                stop: false,
                pause_requested: false,
                seek_requested: false,
                run_state: RunState::Idle,
                tasks: VecDeque::new(),
                generation: 0,
            }),
            wake: Condvar::new(),
        }
    }

    fn signal(&self, f: impl FnOnce(&mut ControlState<T>)) {
        let mut state = self.state.lock();
        f(&mut state);
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.wake.notify_all();
    }

    /// Queue a task for the next safe point
    pub fn schedule(&self, task: T) {
        self.signal(|state| state.tasks.push_back(task));
    }

    /// Ask the worker to pause (`true`) or resume (`false`)
    pub fn request_pause(&self, pause: bool) {
        self.signal(|state| state.pause_requested = pause);
    }

    /// Ask the worker to drop in-flight work ahead of a discontinuity
    pub fn request_seek(&self) {
        self.signal(|state| state.seek_requested = true);
    }

    /// Ask the worker to leave its loop
    pub fn stop(&self) {
        self.signal(|state| state.stop = true);
    }

    /// Whether stop was requested
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stop
    }

    /// Whether a pause is requested
    pub fn is_pause_requested(&self) -> bool {
        self.state.lock().pause_requested
    }

    /// Whether the pause has taken effect
    pub fn is_paused(&self) -> bool {
        self.state.lock().run_state == RunState::Paused
    }

    /// Current lifecycle state
    pub fn run_state(&self) -> RunState {
        self.state.lock().run_state
    }

    /// Number of tasks waiting for the next safe point
    pub fn pending_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub(crate) fn set_run_state(&self, run_state: RunState) {
        self.state.lock().run_state = run_state;
    }

    pub(crate) fn take_tasks(&self) -> VecDeque<T> {
        std::mem::take(&mut self.state.lock().tasks)
    }

    pub(crate) fn take_seek_request(&self) -> bool {
        std::mem::take(&mut self.state.lock().seek_requested)
    }

    /// Sleep up to `timeout`, returning early on stop, tasks or any other
    /// request. Returns true when woken early.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let generation = state.generation;
        loop {
            if state.stop || !state.tasks.is_empty() || state.generation != generation {
                return true;
            }
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                return state.stop || !state.tasks.is_empty() || state.generation != generation;
            }
        }
    }
}

impl<T> Default for WorkerControl<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to a worker running on another thread
#[derive(Debug)]
pub struct WorkerHandle<T> {
    control: Arc<WorkerControl<T>>,
}

impl<T> Clone for WorkerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
        }
    }
}

impl<T> WorkerHandle<T> {
    pub(crate) fn new(control: Arc<WorkerControl<T>>) -> Self {
        Self { control }
    }

    /// Queue a task; it runs at the worker's next safe point
    pub fn schedule(&self, task: T) {
        self.control.schedule(task);
    }

    /// Pause or resume delivery
    pub fn pause(&self, pause: bool) {
        self.control.request_pause(pause);
    }

    /// Whether the worker has actually paused
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Drop in-flight work; the discontinuity unit follows on the queue
    pub fn request_seek(&self) {
        self.control.request_seek();
    }

    /// Ask the worker to exit
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Current lifecycle state
    pub fn run_state(&self) -> RunState {
        self.control.run_state()
    }
}

/// Per-worker counters, also handed to filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    /// Units taken from the queue
    pub units_taken: u64,
    /// Frames produced by the decoder
    pub frames_decoded: u64,
    /// Frames handed to the outputs
    pub frames_delivered: u64,
    /// Decoded frames not delivered
    pub frames_dropped: u64,
    /// Units discarded without decoding
    pub units_discarded: u64,
    /// Failed decode calls
    pub decode_errors: u64,
    /// Timestamp of the last delivered frame
    pub last_timestamp: f64,
}

/// Loop state embedded in every worker
#[derive(Debug)]
pub struct WorkerLoop<T> {
    pub(crate) stream: StreamKind,
    pub(crate) control: Arc<WorkerControl<T>>,
    pub(crate) queue: Arc<PacketQueue>,
    pub(crate) clock: Arc<MasterClock>,
    pub(crate) events: EventBus,
    pub(crate) metrics: SharedMetrics,
    pub(crate) stats: WorkerStats,
    pub(crate) poll_interval: Duration,
}

impl<T> WorkerLoop<T> {
    /// Create the loop state for one stream
    pub fn new(
        stream: StreamKind,
        queue: Arc<PacketQueue>,
        clock: Arc<MasterClock>,
        events: EventBus,
        metrics: SharedMetrics,
        poll_interval: Duration,
    ) -> Self {
        Self {
            stream,
            control: Arc::new(WorkerControl::new()),
            queue,
            clock,
            events,
            metrics,
            stats: WorkerStats::default(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Handle for other threads
    pub fn handle(&self) -> WorkerHandle<T> {
        WorkerHandle::new(self.control.clone())
    }

    /// Counters of the current run
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    pub(crate) fn begin(&self) {
        self.control.set_run_state(RunState::Running);
        info!(stream = %self.stream, "worker started");
        self.events.publish(PlaybackEvent::WorkerStarted {
            stream: self.stream,
        });
    }

    pub(crate) fn take_tasks(&self) -> VecDeque<T> {
        self.control.take_tasks()
    }

    /// Honor a pause request. Returns true while paused, after one
    /// interruptible poll, so the caller restarts its iteration.
    pub(crate) fn pause_gate(&self) -> bool {
        let requested = self.control.is_pause_requested();
        let state = self.control.run_state();
        if requested {
            if state != RunState::Paused {
                self.control.set_run_state(RunState::Paused);
                debug!(stream = %self.stream, "worker paused");
            }
            self.control.wait_timeout(self.poll_interval);
            return true;
        }
        if state == RunState::Paused {
            self.control.set_run_state(RunState::Running);
            debug!(stream = %self.stream, "worker resumed");
        }
        false
    }

    /// Take the next unit, waiting at most one poll interval
    pub(crate) fn next_packet(&mut self) -> Option<Packet> {
        let packet = self.queue.take_timeout(self.poll_interval)?;
        self.stats.units_taken += 1;
        Some(packet)
    }

    /// Interruptible sleep; true when woken early
    pub(crate) fn wait(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return false;
        }
        self.control.wait_timeout(duration)
    }

    pub(crate) fn finish(&self) {
        self.queue.clear();
        self.control.set_run_state(RunState::Stopped);
        info!(
            stream = %self.stream,
            delivered = self.stats.frames_delivered,
            dropped = self.stats.frames_dropped,
            "worker stopped"
        );
        self.events.publish(PlaybackEvent::WorkerStopped {
            stream: self.stream,
        });
    }
}
