use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    error::ConfigError,
    metric::{
        Aggregate, Counter, CounterSnapshot, MetricKind, Rate, RateSnapshot, Trend, TrendSnapshot,
    },
};

/// Requests sent, one per iteration.
pub const HTTP_REQS: &str = "http_reqs";
/// Iteration latency in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Share of iterations that failed.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Share of named checks that passed, across all checks.
pub const CHECKS: &str = "checks";

#[derive(Debug, Clone)]
enum MetricHandle {
    Counter(Arc<Counter>),
    Rate(Arc<Rate>),
    Trend(Arc<Trend>),
}

impl MetricHandle {
    fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Rate(_) => MetricKind::Rate,
            MetricHandle::Trend(_) => MetricKind::Trend,
        }
    }

    fn snapshot(&self) -> MetricSnapshot {
        match self {
            MetricHandle::Counter(c) => MetricSnapshot::Counter(c.snapshot()),
            MetricHandle::Rate(r) => MetricSnapshot::Rate(r.snapshot()),
            MetricHandle::Trend(t) => MetricSnapshot::Trend(t.snapshot()),
        }
    }
}

/// Glue between a concrete aggregate and the registry's handle enum.
trait Registrable: Aggregate + Sized {
    fn create(name: &str) -> Result<Self, ConfigError>;
    fn wrap(metric: Arc<Self>) -> MetricHandle;
    fn unwrap(handle: &MetricHandle) -> Option<&Arc<Self>>;
}

impl Registrable for Counter {
    fn create(_: &str) -> Result<Self, ConfigError> {
        Ok(Counter::new())
    }

    fn wrap(metric: Arc<Self>) -> MetricHandle {
        MetricHandle::Counter(metric)
    }

    fn unwrap(handle: &MetricHandle) -> Option<&Arc<Self>> {
        match handle {
            MetricHandle::Counter(c) => Some(c),
            _ => None,
        }
    }
}

impl Registrable for Rate {
    fn create(_: &str) -> Result<Self, ConfigError> {
        Ok(Rate::new())
    }

    fn wrap(metric: Arc<Self>) -> MetricHandle {
        MetricHandle::Rate(metric)
    }

    fn unwrap(handle: &MetricHandle) -> Option<&Arc<Self>> {
        match handle {
            MetricHandle::Rate(r) => Some(r),
            _ => None,
        }
    }
}

impl Registrable for Trend {
    fn create(name: &str) -> Result<Self, ConfigError> {
        Trend::new().map_err(|source| ConfigError::Histogram {
            name: name.to_owned(),
            source,
        })
    }

    fn wrap(metric: Arc<Self>) -> MetricHandle {
        MetricHandle::Trend(metric)
    }

    fn unwrap(handle: &MetricHandle) -> Option<&Arc<Self>> {
        match handle {
            MetricHandle::Trend(t) => Some(t),
            _ => None,
        }
    }
}

/// Every named metric of a run.
///
/// Metrics are registered up front and handed out as `Arc` handles, so the
/// virtual users write straight into the metric without touching the name map.
/// Each metric guards itself (atomics for counters and rates, one mutex per
/// trend), which keeps writers from blocking each other beyond a single `add`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: RwLock<BTreeMap<String, MetricHandle>>,
    checks: RwLock<BTreeMap<String, Arc<Rate>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter called `name`.
    pub fn counter(&self, name: &str) -> Result<Arc<Counter>, ConfigError> {
        self.register(name)
    }

    /// Get or create the rate called `name`.
    pub fn rate(&self, name: &str) -> Result<Arc<Rate>, ConfigError> {
        self.register(name)
    }

    /// Get or create the trend called `name`.
    pub fn trend(&self, name: &str) -> Result<Arc<Trend>, ConfigError> {
        self.register(name)
    }

    /// Pass rate of the check called `name`. Checks live in their own namespace.
    pub fn check(&self, name: &str) -> Arc<Rate> {
        if let Some(rate) = self.checks.read().get(name) {
            return Arc::clone(rate);
        }
        Arc::clone(self.checks.write().entry(name.to_owned()).or_default())
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.read().get(name).map(MetricHandle::kind)
    }

    /// Copy every metric into an immutable snapshot.
    ///
    /// The copy is only consistent once every writer has stopped; the runner
    /// takes it after the virtual users have drained.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self
            .metrics
            .read()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.snapshot()))
            .collect();
        let checks = self
            .checks
            .read()
            .iter()
            .map(|(name, rate)| (name.clone(), rate.snapshot()))
            .collect();
        MetricsSnapshot { metrics, checks }
    }

    fn register<M: Registrable>(&self, name: &str) -> Result<Arc<M>, ConfigError> {
        if let Some(handle) = self.metrics.read().get(name) {
            return Self::downcast(name, handle);
        }

        let mut metrics = self.metrics.write();
        // Somebody may have registered it between the two locks.
        if let Some(handle) = metrics.get(name) {
            return Self::downcast(name, handle);
        }
        let metric = Arc::new(M::create(name)?);
        metrics.insert(name.to_owned(), M::wrap(Arc::clone(&metric)));
        tracing::debug!("Registered {} metric `{name}`", M::KIND);
        Ok(metric)
    }

    fn downcast<M: Registrable>(name: &str, handle: &MetricHandle) -> Result<Arc<M>, ConfigError> {
        M::unwrap(handle)
            .cloned()
            .ok_or_else(|| ConfigError::MetricKindConflict {
                name: name.to_owned(),
                existing: handle.kind(),
                requested: M::KIND,
            })
    }
}

/// Frozen value of one metric.
#[derive(Debug, Clone)]
pub enum MetricSnapshot {
    Counter(CounterSnapshot),
    Rate(RateSnapshot),
    Trend(TrendSnapshot),
}

impl MetricSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSnapshot::Counter(_) => MetricKind::Counter,
            MetricSnapshot::Rate(_) => MetricKind::Rate,
            MetricSnapshot::Trend(_) => MetricKind::Trend,
        }
    }
}

/// Frozen copy of a [`MetricsRegistry`], read by thresholds and reports.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    metrics: BTreeMap<String, MetricSnapshot>,
    checks: BTreeMap<String, RateSnapshot>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }

    pub fn counter(&self, name: &str) -> Option<CounterSnapshot> {
        match self.get(name)? {
            MetricSnapshot::Counter(c) => Some(*c),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<RateSnapshot> {
        match self.get(name)? {
            MetricSnapshot::Rate(r) => Some(*r),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSnapshot> {
        match self.get(name)? {
            MetricSnapshot::Trend(t) => Some(t),
            _ => None,
        }
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricSnapshot)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn checks(&self) -> impl Iterator<Item = (&str, &RateSnapshot)> {
        self.checks.iter().map(|(k, v)| (k.as_str(), v))
    }
}
