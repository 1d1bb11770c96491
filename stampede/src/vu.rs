use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::sync::watch::Receiver;

use crate::{
    error::ConfigError,
    metric::{Counter, Rate, Trend},
    registry::{CHECKS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, MetricsRegistry},
    scenario::{IterationResult, ScenarioMetrics},
};

/// Environment variable that overrides the configured base URL.
pub const BASE_URL_VAR: &str = "BASE_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Endpoint and parameters shared by every virtual user of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEnv {
    pub base_url: String,
    pub vars: BTreeMap<String, String>,
}

impl Default for WorkloadEnv {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            vars: BTreeMap::new(),
        }
    }
}

impl WorkloadEnv {
    /// Resolve the base URL from, in order: an explicit `BASE_URL` entry in
    /// `vars`, the process environment, the profile, the default.
    pub fn resolve(configured: Option<&str>, vars: BTreeMap<String, String>) -> Self {
        Self::resolve_with(configured, vars, |key| std::env::var(key).ok())
    }

    pub fn resolve_with(
        configured: Option<&str>,
        vars: BTreeMap<String, String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let base_url = vars
            .get(BASE_URL_VAR)
            .cloned()
            .or_else(|| lookup(BASE_URL_VAR))
            .or_else(|| configured.map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self { base_url, vars }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// What a workload sees on every call.
#[derive(Debug, Clone)]
pub struct VuContext {
    pub vu_id: usize,
    /// Zero-based iteration number of this virtual user.
    pub iteration: u64,
    pub env: Arc<WorkloadEnv>,
}

/// Pause between two iterations of the same virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkTime {
    /// Start the next iteration right away (maximum load).
    #[default]
    None,
    /// Uniformly random in `[min, max]`. `min == max` is a fixed pause.
    Uniform { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn uniform(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::ThinkTimeRange { min, max });
        }
        Ok(ThinkTime::Uniform { min, max })
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        match *self {
            ThinkTime::None => Duration::ZERO,
            ThinkTime::Uniform { min, max } if min >= max => min,
            ThinkTime::Uniform { min, max } => rng.gen_range(min..=max),
        }
    }
}

/// Writes one [`IterationResult`] into every metric it feeds.
#[derive(Debug)]
pub struct IterationRecorder {
    registry: Arc<MetricsRegistry>,
    requests: Arc<Counter>,
    duration: Arc<Trend>,
    failed: Arc<Rate>,
    checks: Arc<Rate>,
    success_counter: Option<Arc<Counter>>,
    error_rate: Option<Arc<Rate>>,
    latency_trend: Option<Arc<Trend>>,
}

impl IterationRecorder {
    /// Register the built-in metrics and the scenario's domain metrics.
    pub fn register(
        registry: &Arc<MetricsRegistry>,
        metrics: &ScenarioMetrics,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            registry: Arc::clone(registry),
            requests: registry.counter(HTTP_REQS)?,
            duration: registry.trend(HTTP_REQ_DURATION)?,
            failed: registry.rate(HTTP_REQ_FAILED)?,
            checks: registry.rate(CHECKS)?,
            success_counter: metrics
                .success_counter
                .as_deref()
                .map(|n| registry.counter(n))
                .transpose()?,
            error_rate: metrics
                .error_rate
                .as_deref()
                .map(|n| registry.rate(n))
                .transpose()?,
            latency_trend: metrics
                .latency_trend
                .as_deref()
                .map(|n| registry.trend(n))
                .transpose()?,
        })
    }

    pub fn record(&self, result: &IterationResult) {
        let latency = result.latency_ms();

        self.requests.add(1);
        self.duration.add(latency);
        self.failed.add(!result.success);
        for (name, passed) in &result.checks {
            self.checks.add(*passed);
            self.registry.check(name).add(*passed);
        }

        if result.success {
            if let Some(counter) = &self.success_counter {
                counter.add(1);
            }
        }
        if let Some(rate) = &self.error_rate {
            rate.add(!result.success);
        }
        if let Some(trend) = &self.latency_trend {
            trend.add(latency);
        }
    }
}

/// Stop signals a virtual user listens to: the run-wide shutdown and its own
/// retirement when the scheduler scales down.
pub(crate) struct VuSignals {
    pub shutdown: Receiver<bool>,
    pub retire: Receiver<bool>,
}

impl VuSignals {
    fn should_stop(&self) -> bool {
        *self.shutdown.borrow() || *self.retire.borrow()
    }

    /// Resolves once either signal is raised (or its sender is gone).
    async fn stopped(&mut self) {
        tokio::select! {
            _ = self.shutdown.wait_for(|stop| *stop) => {}
            _ = self.retire.wait_for(|stop| *stop) => {}
        }
    }
}

/// Body of one virtual user. Returns the number of completed iterations.
///
/// Stop signals are checked at iteration boundaries only, so an in-flight call
/// to `action` always completes and gets recorded. The think-time pause is the
/// one suspension point that a stop signal cuts short.
pub(crate) async fn run_vu<F, Fut>(
    id: usize,
    action: F,
    think_time: ThinkTime,
    recorder: Arc<IterationRecorder>,
    env: Arc<WorkloadEnv>,
    mut signals: VuSignals,
) -> u64
where
    F: Fn(VuContext) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = IterationResult> + Send + 'static,
{
    let mut rng = StdRng::from_entropy();
    let mut iteration = 0;
    tracing::debug!("VU {id} started.");

    while !signals.should_stop() {
        let ctx = VuContext {
            vu_id: id,
            iteration,
            env: Arc::clone(&env),
        };
        let result = action(ctx).await;
        recorder.record(&result);
        iteration += 1;

        if signals.should_stop() {
            break;
        }
        let pause = think_time.sample(&mut rng);
        if pause.is_zero() {
            // Keep instant workloads from starving the scheduler.
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = signals.stopped() => break,
        }
    }

    tracing::debug!("VU {id} stopped after {iteration} iterations.");
    iteration
}
