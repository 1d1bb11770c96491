use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::vu::{ThinkTime, VuContext, WorkloadEnv};

/// Outcome of one workload invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationResult {
    pub success: bool,
    pub latency: Duration,
    pub status: Option<u16>,
    /// Named boolean checks, in the order the workload evaluated them.
    pub checks: Vec<(String, bool)>,
}

impl IterationResult {
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            status: None,
            checks: Vec::new(),
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            success: false,
            ..Self::success(latency)
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_check(mut self, name: impl Into<String>, passed: bool) -> Self {
        self.checks.push((name.into(), passed));
        self
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1_000.0
    }
}

/// Optional domain metrics a scenario feeds besides the built-in `http_*` ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioMetrics {
    /// Counter incremented once per successful iteration, e.g. `tickets_created`.
    pub success_counter: Option<String>,
    /// Rate of failed iterations, e.g. `ticket_errors`.
    pub error_rate: Option<String>,
    /// Trend of iteration latency in milliseconds, e.g. `create_latency`.
    pub latency_trend: Option<String>,
}

/// The unit of work a test repeats, plus how each virtual user paces it.
///
/// `action` is cloned into every virtual user, so keep heavy resources such as
/// HTTP clients outside of it and capture a cheap handle instead.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Scenario<F, Fut>
where
    F: Fn(VuContext) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = IterationResult> + Send + 'static,
{
    #[builder(setter(into))]
    pub name: String,
    pub action: F,
    #[builder(default)]
    pub think_time: ThinkTime,
    #[builder(default)]
    pub metrics: ScenarioMetrics,
    #[builder(default)]
    pub env: WorkloadEnv,
}
