//! Stampede: a k6-style load generator core for Rust.
//!
//! Stampede drives a pool of virtual users (VUs) through a workload, ramps
//! their number over time, records what they observe into streaming metrics
//! and turns those metrics into a pass/fail verdict. Transport, payloads and
//! report sinks stay outside the core: a workload is just an async closure.
//!
//! # Architecture
//!
//! - [`Scenario`]: the workload closure plus how every VU paces it (think time)
//!   and which domain metrics it feeds.
//! - [`Executor`]: runs a scenario. [`VuExecutor`] keeps the number of VUs on a
//!   [`Schedule`] derived from an [`ExecutionPlan`].
//! - [`metric`]: [`Counter`], [`Rate`] and [`Trend`] accumulators behind the
//!   [`Aggregate`] trait, stored by name in a [`MetricsRegistry`].
//! - [`Threshold`]: `p(95)<2000`-style rules evaluated once the run drained.
//! - [`RunSummary`] and [`Reporter`]: the final numbers and where they go.
//! - [`Runner`]: glues all of the above together.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::{Duration, Instant};
//!
//! use stampede::{
//!     ExecutionPlan, IterationResult, Reporter, RunOptions, Runner, Scenario, StdoutReporter,
//!     Threshold,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = Runner::new(
//!         RunOptions::builder()
//!             .plan(ExecutionPlan::constant(10, Duration::from_secs(30))?)
//!             .thresholds(vec![Threshold::parse("http_req_duration", "p(95)<200")?])
//!             .build(),
//!     )?;
//!
//!     let scenario = Scenario::builder()
//!         .name("sleepy")
//!         .action(|_ctx| async move {
//!             let start = Instant::now();
//!             tokio::time::sleep(Duration::from_millis(50)).await;
//!             IterationResult::success(start.elapsed())
//!         })
//!         .build();
//!
//!     let summary = runner.run(&scenario).await?;
//!     StdoutReporter::default().report(&summary).await?;
//!     Ok(())
//! }
//! ```

/// Load profiles
pub mod config;
pub mod error;
/// Virtual user scheduling
pub mod executor;
/// Metric primitives
pub mod metric;
/// Named metrics of a run
pub mod registry;
/// Run summaries and reporters
pub mod report;
pub mod runner;
/// The workload definition
pub mod scenario;
pub mod threshold;
/// The virtual user loop
pub mod vu;

pub use config::{RunConfig, load_profile};
pub use error::{ConfigError, Error, Result};
pub use executor::{ExecutionPlan, Executor, Schedule, Stage, VuExecutor};
pub use metric::{Aggregate, Counter, MetricKind, Rate, Trend};
pub use registry::{MetricsRegistry, MetricsSnapshot};
pub use report::{JsonFileReporter, Reporter, RunSummary, StdoutReporter, TextLayout, render_text};
pub use runner::{RunOptions, Runner};
pub use scenario::{IterationResult, Scenario, ScenarioMetrics};
pub use threshold::Threshold;
pub use vu::{ThinkTime, VuContext, WorkloadEnv};
