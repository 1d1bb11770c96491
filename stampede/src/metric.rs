use std::{
    fmt::{self, Debug, Display},
    sync::atomic::{AtomicU64, Ordering},
};

use hdrhistogram::{CreationError, Histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Trend values are stored in the histogram with three decimal digits.
const TREND_SCALE: f64 = 1_000.0;
/// Significant digits kept by every trend histogram.
const TREND_SIGFIG: u8 = 3;

/// The three kinds of metric a test can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::Counter => "counter",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        })
    }
}

/// The `Aggregate` trait describes a shared accumulator that virtual users write
/// samples into while the test runs.
///
/// Implementations must be safe to write from any number of tasks at the same
/// time and must never lose an update. They keep only compact, mergeable state
/// (counts, sums, histograms); derived statistics such as rates and percentiles
/// are computed from the [`Aggregate::Snapshot`] once the run has drained.
///
/// # Implementor notes
/// - `consume` is on the hot path of every iteration. Keep the critical section
///   to a single update and never await inside it.
/// - `merge` must be **associative** and **commutative** so that partial
///   aggregates can be combined in any order. Merging an aggregate into
///   itself is a no-op.
pub trait Aggregate
where
    Self: Send + Sync + Debug,
{
    /// One observation.
    type Sample;
    /// Immutable copy of the accumulated state.
    type Snapshot: Clone + Debug;

    /// Kind reported to thresholds and reports.
    const KIND: MetricKind;

    /// Record a single observation.
    fn consume(&self, sample: Self::Sample);

    /// Fold everything recorded by `other` into `self`.
    fn merge(&self, other: &Self);

    /// Copy the current state out of the accumulator.
    fn snapshot(&self) -> Self::Snapshot;
}

/// Monotonically increasing total.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Aggregate for Counter {
    type Sample = u64;
    type Snapshot = CounterSnapshot;
    const KIND: MetricKind = MetricKind::Counter;

    fn consume(&self, sample: u64) {
        self.add(sample);
    }

    fn merge(&self, other: &Self) {
        if std::ptr::eq(self, other) {
            return;
        }
        self.add(other.value());
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.value(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub count: u64,
}

impl CounterSnapshot {
    /// Average increments per second over `elapsed_secs`.
    pub fn per_second(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs > 0.0 {
            self.count as f64 / elapsed_secs
        } else {
            0.0
        }
    }
}

/// Fraction of boolean observations that were `true`.
#[derive(Debug, Default)]
pub struct Rate {
    passes: AtomicU64,
    total: AtomicU64,
}

impl Rate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: bool) {
        if value {
            self.passes.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// `passes / total`, or `0.0` when nothing was recorded.
    pub fn rate(&self) -> f64 {
        self.snapshot().rate()
    }
}

impl Aggregate for Rate {
    type Sample = bool;
    type Snapshot = RateSnapshot;
    const KIND: MetricKind = MetricKind::Rate;

    fn consume(&self, sample: bool) {
        self.add(sample);
    }

    fn merge(&self, other: &Self) {
        if std::ptr::eq(self, other) {
            return;
        }
        let theirs = other.snapshot();
        self.passes.fetch_add(theirs.passes, Ordering::Relaxed);
        self.total.fetch_add(theirs.total, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RateSnapshot {
        RateSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateSnapshot {
    pub passes: u64,
    pub total: u64,
}

impl RateSnapshot {
    pub fn fails(&self) -> u64 {
        self.total.saturating_sub(self.passes)
    }

    pub fn has_data(&self) -> bool {
        self.total > 0
    }

    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passes as f64 / self.total as f64
        }
    }
}

/// Summary of a numeric distribution, typically latency in milliseconds.
///
/// Count, sum, min and max are exact. Percentiles come from an HDR histogram
/// with three significant digits, so memory stays bounded no matter how many
/// samples a long run records. Negative samples count towards min/mean but are
/// bucketed as zero in the histogram; non-finite samples are ignored.
#[derive(Debug)]
pub struct Trend {
    state: Mutex<TrendSnapshot>,
}

impl Trend {
    pub fn new() -> Result<Self, CreationError> {
        Ok(Self {
            state: Mutex::new(TrendSnapshot::empty()?),
        })
    }

    pub fn add(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let scaled = (value.max(0.0) * TREND_SCALE).round() as u64;
        let mut state = self.state.lock();
        if let Err(e) = state.histogram.record(scaled) {
            tracing::warn!("Clamping trend sample {value}: {e}");
            state.histogram.saturating_record(scaled);
        }
        if state.count == 0 {
            state.min = value;
            state.max = value;
        } else {
            state.min = state.min.min(value);
            state.max = state.max.max(value);
        }
        state.count += 1;
        state.sum += value;
    }
}

impl Aggregate for Trend {
    type Sample = f64;
    type Snapshot = TrendSnapshot;
    const KIND: MetricKind = MetricKind::Trend;

    fn consume(&self, sample: f64) {
        self.add(sample);
    }

    fn merge(&self, other: &Self) {
        if std::ptr::eq(self, other) {
            return;
        }
        // Copy first so the two locks are never held together.
        let theirs = other.snapshot();
        if theirs.count == 0 {
            return;
        }
        let mut state = self.state.lock();
        if let Err(e) = state.histogram.add(&theirs.histogram) {
            tracing::warn!("Skipping trend merge of {} samples: {e}", theirs.count);
            return;
        }
        if state.count == 0 {
            state.min = theirs.min;
            state.max = theirs.max;
        } else {
            state.min = state.min.min(theirs.min);
            state.max = state.max.max(theirs.max);
        }
        state.count += theirs.count;
        state.sum += theirs.sum;
    }

    fn snapshot(&self) -> TrendSnapshot {
        self.state.lock().clone()
    }
}

/// Frozen copy of a [`Trend`].
#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    histogram: Histogram<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendSnapshot {
    fn empty() -> Result<Self, CreationError> {
        Ok(Self {
            histogram: Histogram::new(TREND_SIGFIG)?,
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Value below which `p` percent of the samples fall, `p` in `[0, 100]`.
    ///
    /// The result is clamped into `[min, max]`, so `p(50) <= p(95) <= p(99) <= max`
    /// holds for every non-empty trend.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let quantile = (p / 100.0).clamp(0.0, 1.0);
        let value = self.histogram.value_at_quantile(quantile) as f64 / TREND_SCALE;
        Some(value.clamp(self.min, self.max))
    }
}
