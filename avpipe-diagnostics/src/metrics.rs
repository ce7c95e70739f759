//! Metrics collection for the playback pipeline
//!
//! [`PipelineMetrics`] implements the core [`MetricsRecorder`] seam. It is
//! created by whoever composes the pipeline and shared with the workers, so
//! several pipelines in one process never mix their numbers.

use avpipe_core::MetricsRecorder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default window over which event rates are measured
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Counts events and reports their rate once per window
#[derive(Debug)]
pub struct FrequencyMeter {
    window: Duration,
    started: Option<Instant>,
    count: u64,
    last_rate: Option<f64>,
}

impl FrequencyMeter {
    /// Create a meter measuring over `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            started: None,
            count: 0,
            last_rate: None,
        }
    }

    /// Count one event. Returns the rate in events per second when this
    /// event completed a window.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Count one event observed at `now`
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        let started = *self.started.get_or_insert(now);
        self.count += 1;
        let elapsed = now.saturating_duration_since(started);
        if elapsed <= self.window {
            return None;
        }
        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.started = Some(now);
        self.count = 0;
        self.last_rate = Some(rate);
        Some(rate)
    }

    /// Rate of the last completed window
    pub fn rate(&self) -> Option<f64> {
        self.last_rate
    }

    /// Events counted in the running window
    pub fn pending(&self) -> u64 {
        self.count
    }
}

impl Default for FrequencyMeter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

/// Aggregate of sampled values for one key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Number of samples
    pub count: u64,
    /// Sum of samples
    pub sum: f64,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// Most recent sample
    pub last: f64,
}

impl Observation {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
            last: value,
        }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
    }

    /// Mean of all samples
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
    /// Counter values by key
    pub counters: BTreeMap<String, u64>,
    /// Observation aggregates by key
    pub observations: BTreeMap<String, Observation>,
    /// Last completed rate (events per second) by counter key
    pub rates: BTreeMap<String, f64>,
}

/// Concurrent metrics collector shared by the workers of one pipeline
#[derive(Debug)]
pub struct PipelineMetrics {
    counters: DashMap<&'static str, AtomicU64>,
    observations: DashMap<&'static str, Observation>,
    meters: DashMap<&'static str, Mutex<FrequencyMeter>>,
    rate_window: Duration,
}

impl PipelineMetrics {
    /// Create a collector measuring rates over one second
    pub fn new() -> Self {
        Self::with_rate_window(DEFAULT_RATE_WINDOW)
    }

    /// Create a collector measuring rates over `window`
    pub fn with_rate_window(window: Duration) -> Self {
        Self {
            counters: DashMap::new(),
            observations: DashMap::new(),
            meters: DashMap::new(),
            rate_window: window,
        }
    }

    /// Current value of a counter
    pub fn counter(&self, key: &str) -> u64 {
        self.counters
            .get(key)
            .map_or(0, |value| value.load(Ordering::Relaxed))
    }

    /// Aggregate of a sampled key
    pub fn observation(&self, key: &str) -> Option<Observation> {
        self.observations.get(key).map(|entry| *entry)
    }

    /// Last completed rate of a counter, events per second
    pub fn rate(&self, key: &str) -> Option<f64> {
        self.meters.get(key).and_then(|meter| meter.lock().rate())
    }

    /// Copy every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
            .collect();
        let observations = self
            .observations
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();
        let rates = self
            .meters
            .iter()
            .filter_map(|entry| {
                let rate = entry.value().lock().rate()?;
                Some((entry.key().to_string(), rate))
            })
            .collect();
        MetricsSnapshot {
            captured_at: Utc::now(),
            counters,
            observations,
            rates,
        }
    }

    /// Forget everything collected so far
    pub fn reset(&self) {
        self.counters.clear();
        self.observations.clear();
        self.meters.clear();
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for PipelineMetrics {
    fn increment(&self, key: &'static str) {
        self.counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let meter = self
            .meters
            .entry(key)
            .or_insert_with(|| Mutex::new(FrequencyMeter::new(self.rate_window)));
        if let Some(rate) = meter.lock().tick() {
            debug!(key, rate, "event frequency");
        };
    }

    fn observe(&self, key: &'static str, value: f64) {
        self.observations
            .entry(key)
            .and_modify(|observation| observation.record(value))
            .or_insert_with(|| Observation::first(value));
    }
}
