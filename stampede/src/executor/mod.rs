//! Executor: keeps the right number of virtual users alive over time.
//!
//! The [`Executor`] trait is the runtime hook that runs a [`Scenario`]. The
//! built-in [`VuExecutor`] is a closed-model executor: it does not pace requests,
//! it controls *concurrency*. A [`Schedule`] says how many virtual users should
//! be running at any elapsed time, and a single controller task makes it so.
//!
//! # High-level flow
//! 1. An [`ExecutionPlan`] (constant or staged) is turned into a [`Schedule`]
//!    once, when the executor is built.
//! 2. The controller wakes every `tick`, asks the schedule for the desired VU
//!    count and spawns or retires virtual users until the pool matches it.
//! 3. Each virtual user runs the scenario's `action` in a loop and records every
//!    result into the shared metrics registry.
//! 4. When the schedule's total duration has elapsed, the controller broadcasts
//!    shutdown and drains the pool, bounded by `grace_period`. Virtual users
//!    still busy after that are aborted and their iteration is discarded.
//!
//! # Mathematical behavior of the ramp
//! For a stage that starts at `T_i` with `V_i` users (the previous stage's
//! target, 0 for the first stage) and ramps to `V_{i+1}` over `d_i`:
//!
//! ```text
//! t = (elapsed - T_i) / d_i
//! vus(t) = round(V_i + (V_{i+1} - V_i) * t)
//! ```
//!
//! A stage with a zero duration jumps straight to its target.
//!
//! # Tuning knobs
//! - `tick`: how often the controller re-evaluates the schedule. Smaller ticks
//!   follow ramps more closely at the cost of more wakeups. Default 100ms.
//! - `grace_period`: upper bound on shutdown after the plan ends. Default 30s.
//!
//! # Scaling down
//! Retiring a virtual user never interrupts the call to `action` it is making:
//! it is told to stop and exits after recording its current iteration. Only the
//! think-time pause between iterations is cut short.
pub mod schedule;
pub mod vus;

pub use schedule::{ConstantVus, ExecutionPlan, RampingVus, Schedule, Stage};
pub use vus::VuExecutor;

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    scenario::{IterationResult, Scenario},
    vu::{IterationRecorder, VuContext},
};

/// What the executor observed while running, besides the metrics themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Wall time from the first tick until the pool drained.
    pub elapsed: Duration,
    /// Highest number of virtual users running at once.
    pub peak_vus: usize,
    /// Virtual users aborted after the grace period; their iteration was dropped.
    pub interrupted: usize,
}

/// The runtime hook that executes a `Scenario`.
///
/// This trait is generic over the action and its future so executors stay free
/// of boxing on the hot path.
pub trait Executor<F, Fut>
where
    Self: Send + Sync + Sized,
    F: Fn(VuContext) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = IterationResult> + Send + 'static,
{
    /// Run the scenario to completion, writing every iteration into `recorder`.
    fn exec(
        &self,
        scenario: &Scenario<F, Fut>,
        recorder: Arc<IterationRecorder>,
    ) -> impl Future<Output = ExecutionReport> + Send;
}
