//! Ordered frame filters
//!
//! Filters run in registration order. A filter that is disabled, or whose
//! context preparation fails, is skipped; the rest of the chain still runs.

use crate::events::StreamKind;
use crate::worker::WorkerStats;
use std::fmt::Debug;
use tracing::trace;

/// Per-invocation context handed to [`Filter::prepare_context`]
#[derive(Debug, Clone, PartialEq)]
pub struct FilterContext {
    /// Stream being filtered
    pub stream: StreamKind,
    /// Master clock value at invocation
    pub clock: f64,
    /// Playback speed
    pub speed: f64,
    /// Index of the frame within the current run
    pub frame_index: u64,
}

impl FilterContext {
    /// Create a context for `stream`
    pub fn new(stream: StreamKind, clock: f64, speed: f64, frame_index: u64) -> Self {
        Self {
            stream,
            clock,
            speed,
            frame_index,
        }
    }
}

/// Transform applied to every delivered frame of type `F`
pub trait Filter<F>: Send + Debug {
    /// Name used to toggle the filter
    fn name(&self) -> &str;

    /// Whether the filter wants to run at all
    fn is_enabled(&self) -> bool {
        true
    }

    /// Prepare for `frame`; returning false skips this filter only
    fn prepare_context(
        &mut self,
        ctx: &mut FilterContext,
        stats: &WorkerStats,
        frame: &F,
    ) -> bool {
        let _ = (ctx, stats, frame);
        true
    }

    /// Transform the frame in place
    fn apply(&mut self, stats: &WorkerStats, frame: &mut F);
}

#[derive(Debug)]
struct FilterSlot<F> {
    filter: Box<dyn Filter<F>>,
    enabled: bool,
}

/// Filters of one worker, in registration order
#[derive(Debug)]
pub struct FilterChain<F> {
    slots: Vec<FilterSlot<F>>,
}

impl<F> FilterChain<F> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Append a filter
    pub fn add(&mut self, filter: Box<dyn Filter<F>>) {
        self.slots.push(FilterSlot {
            filter,
            enabled: true,
        });
    }

    /// Toggle every filter called `name`; returns whether one matched
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for slot in self.slots.iter_mut().filter(|s| s.filter.name() == name) {
            slot.enabled = enabled;
            found = true;
        }
        found
    }

    /// Number of registered filters
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no filter is registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run the chain over `frame`, returning how many filters applied
    pub fn run(&mut self, ctx: &mut FilterContext, stats: &WorkerStats, frame: &mut F) -> usize {
        let mut applied = 0;
        for slot in &mut self.slots {
            if !slot.enabled || !slot.filter.is_enabled() {
                continue;
            }
            if !slot.filter.prepare_context(ctx, stats, frame) {
                trace!(filter = slot.filter.name(), "filter context not ready, skipped");
                continue;
            }
            slot.filter.apply(stats, frame);
            applied += 1;
        }
        applied
    }
}

impl<F> Default for FilterChain<F> {
    fn default() -> Self {
        Self::new()
    }
}
