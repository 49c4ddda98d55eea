//! Rolling Window Aggregation
//!
//! A fixed-capacity FIFO over the most recent events. Statistics are only
//! produced once the window is full and are recomputed over the whole
//! window on every update.
//!
//! For multiplexed sources, [`SeriesAggregators`] keeps one window per series
//! key, created on first sighting and capped in number: when a new key
//! arrives at the cap, the least recently updated series is evicted.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::event::StreamEvent;
use super::outcome::Maybe;

/// Point-in-time statistics over a full window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    /// Number of events in the window (equals the capacity).
    pub count: usize,
    /// Mean price.
    pub mean: f64,
    /// Minimum price.
    pub min: f64,
    /// Maximum price.
    pub max: f64,
    /// Population standard deviation of price.
    pub std_dev: f64,
    /// Sum of volume.
    pub total_volume: f64,
    /// Wall-clock time the statistics were computed.
    pub computed_at: DateTime<Utc>,
}

/// Sliding window over the last `capacity` events.
#[derive(Debug, Clone)]
pub struct RollingWindowAggregator {
    capacity: usize,
    window: VecDeque<StreamEvent>,
}

impl RollingWindowAggregator {
    /// Create an aggregator. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// Window capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether no events have been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Whether the window has reached capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    /// Append an event, evicting the oldest past capacity.
    ///
    /// Returns `None` until the window first fills, then statistics over the
    /// current contents on every call.
    pub fn update(&mut self, event: StreamEvent) -> Maybe<WindowStats> {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(event);

        if self.is_full() {
            Some(self.compute())
        } else {
            None
        }
    }

    fn compute(&self) -> WindowStats {
        let count = self.window.len();
        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;

        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut total_volume = 0.0;
        for event in &self.window {
            sum += event.price;
            min = min.min(event.price);
            max = max.max(event.price);
            total_volume += event.volume;
        }
        let mean = sum / n;

        let variance = self
            .window
            .iter()
            .map(|e| {
                let d = e.price - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        WindowStats {
            count,
            mean,
            min,
            max,
            std_dev: variance.sqrt(),
            total_volume,
            computed_at: Utc::now(),
        }
    }
}

/// Result of feeding one event to [`SeriesAggregators`].
#[derive(Debug, Clone)]
pub struct SeriesUpdate {
    /// Statistics for the event's series, once its window is full.
    pub stats: Maybe<WindowStats>,
    /// The event opened a new series.
    pub new_series: bool,
    /// Series evicted to make room for the new one.
    pub evicted: Option<String>,
}

#[derive(Debug)]
struct SeriesEntry {
    aggregator: RollingWindowAggregator,
    last_update: u64,
}

/// Independent rolling windows keyed by series.
#[derive(Debug)]
pub struct SeriesAggregators {
    window_size: usize,
    max_series: usize,
    series: HashMap<String, SeriesEntry>,
    tick: u64,
}

impl SeriesAggregators {
    /// Create an empty set. `max_series` of zero is treated as one.
    #[must_use]
    pub fn new(window_size: usize, max_series: usize) -> Self {
        Self {
            window_size,
            max_series: max_series.max(1),
            series: HashMap::new(),
            tick: 0,
        }
    }

    /// Number of tracked series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether no series are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Whether a series is currently tracked.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.series.contains_key(key)
    }

    /// Feed an event into the window for `key`, creating it if needed.
    pub fn update(&mut self, key: &str, event: StreamEvent) -> SeriesUpdate {
        self.tick += 1;
        let now = self.tick;

        let mut new_series = false;
        let mut evicted = None;
        if !self.series.contains_key(key) {
            new_series = true;
            if self.series.len() >= self.max_series {
                evicted = self.evict_stalest();
            }
            self.series.insert(
                key.to_string(),
                SeriesEntry {
                    aggregator: RollingWindowAggregator::new(self.window_size),
                    last_update: now,
                },
            );
        }

        let stats = self.series.get_mut(key).and_then(|entry| {
            entry.last_update = now;
            entry.aggregator.update(event)
        });

        SeriesUpdate {
            stats,
            new_series,
            evicted,
        }
    }

    fn evict_stalest(&mut self) -> Option<String> {
        let stalest = self
            .series
            .iter()
            .min_by_key(|(_, entry)| entry.last_update)
            .map(|(key, _)| key.clone())?;
        self.series.remove(&stalest);
        Some(stalest)
    }
}
