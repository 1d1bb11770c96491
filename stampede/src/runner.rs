use std::{future::Future, sync::Arc, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    error::ConfigError,
    executor::{ExecutionPlan, Executor, VuExecutor},
    registry::MetricsRegistry,
    report::RunSummary,
    scenario::{IterationResult, Scenario},
    threshold::{self, Threshold},
    vu::{IterationRecorder, VuContext},
};

/// Everything about a run that is not the workload itself.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RunOptions {
    pub plan: ExecutionPlan,
    #[builder(default)]
    pub thresholds: Vec<Threshold>,
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub grace_period: Duration,
}

impl RunOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plan.validate()?;
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }
}

/// Runs a scenario end to end: metrics, virtual users, drain, thresholds.
#[derive(Debug, Clone)]
pub struct Runner {
    options: RunOptions,
}

impl Runner {
    pub fn new(options: RunOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Execute `scenario` and summarize it.
    ///
    /// Metric registration and threshold binding happen before the first
    /// virtual user starts, so a threshold on an unknown metric or with a
    /// selector that does not fit the metric kind fails fast. The metrics are
    /// read only once every virtual user has drained.
    pub async fn run<F, Fut>(&self, scenario: &Scenario<F, Fut>) -> Result<RunSummary, ConfigError>
    where
        F: Fn(VuContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = IterationResult> + Send + 'static,
    {
        let registry = Arc::new(MetricsRegistry::new());
        let recorder = Arc::new(IterationRecorder::register(&registry, &scenario.metrics)?);
        for threshold in &self.options.thresholds {
            threshold.bind(&registry)?;
        }

        let executor = VuExecutor::builder()
            .schedule(self.options.plan.schedule())
            .tick(self.options.tick)
            .grace_period(self.options.grace_period)
            .build();
        let execution = executor.exec(scenario, recorder).await;

        let snapshot = registry.snapshot();
        let verdict = threshold::evaluate(&snapshot, &self.options.thresholds);
        for outcome in verdict.outcomes.iter().filter(|o| !o.passed) {
            tracing::warn!(
                "Threshold `{}` on `{}` failed (observed {:?})",
                outcome.expression,
                outcome.metric,
                outcome.observed
            );
        }

        Ok(RunSummary::new(&scenario.name, &snapshot, &execution, verdict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_tick_is_rejected() {
        let options = RunOptions::builder()
            .plan(ExecutionPlan::constant(1, Duration::from_secs(1)).unwrap())
            .tick(Duration::ZERO)
            .build();
        assert!(matches!(Runner::new(options), Err(ConfigError::ZeroTick)));
    }

    #[test]
    fn defaults() {
        let runner = Runner::new(
            RunOptions::builder()
                .plan(ExecutionPlan::constant(1, Duration::from_secs(1)).unwrap())
                .build(),
        )
        .unwrap();
        assert_eq!(runner.options().tick, Duration::from_millis(100));
        assert_eq!(runner.options().grace_period, Duration::from_secs(30));
        assert!(runner.options().thresholds.is_empty());
    }
}
