use std::{
    collections::BTreeMap,
    fmt::Write as _,
    future::Future,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    executor::ExecutionReport,
    metric::MetricKind,
    registry::{HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, MetricSnapshot, MetricsSnapshot},
    threshold::{ThresholdOutcome, ThresholdReport},
};

/// Percentiles exported for every trend, besides `med`.
const TREND_PERCENTILES: [f64; 4] = [50.0, 90.0, 95.0, 99.0];
const RULE: &str = "═══════════════════════════════════════════════════════════════";

/// Final values of one metric, keyed the way k6 names them in its summary
/// export (`count`, `rate`, `passes`, `p(95)`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub values: BTreeMap<String, f64>,
}

impl MetricSummary {
    fn from_snapshot(metric: &MetricSnapshot, elapsed_secs: f64) -> Self {
        let mut values = BTreeMap::new();
        match metric {
            MetricSnapshot::Counter(c) => {
                values.insert("count".to_owned(), c.count as f64);
                values.insert("rate".to_owned(), c.per_second(elapsed_secs));
            }
            MetricSnapshot::Rate(r) => {
                values.insert("rate".to_owned(), r.rate());
                values.insert("passes".to_owned(), r.passes as f64);
                values.insert("fails".to_owned(), r.fails() as f64);
            }
            MetricSnapshot::Trend(t) => {
                values.insert("count".to_owned(), t.count() as f64);
                let stats = [
                    ("avg", t.mean()),
                    ("min", t.min()),
                    ("max", t.max()),
                    ("med", t.percentile(50.0)),
                ];
                for (key, value) in stats {
                    if let Some(v) = value {
                        values.insert(key.to_owned(), v);
                    }
                }
                for p in TREND_PERCENTILES {
                    if let Some(v) = t.percentile(p) {
                        values.insert(format!("p({p})"), v);
                    }
                }
            }
        }
        Self {
            kind: metric.kind(),
            values,
        }
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub passes: u64,
    pub fails: u64,
}

/// Everything a run produced, ready to be rendered or exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenario: String,
    pub total_requests: u64,
    /// Wall time of the run including the drain.
    pub duration_ms: f64,
    pub peak_vus: usize,
    /// Iterations discarded because their virtual user outlived the grace period.
    pub interrupted_iterations: usize,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: BTreeMap<String, CheckSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub passed: bool,
}

impl RunSummary {
    pub fn new(
        scenario: &str,
        snapshot: &MetricsSnapshot,
        execution: &ExecutionReport,
        verdict: ThresholdReport,
    ) -> Self {
        let elapsed_secs = execution.elapsed.as_secs_f64();
        let metrics = snapshot
            .metrics()
            .map(|(name, m)| (name.to_owned(), MetricSummary::from_snapshot(m, elapsed_secs)))
            .collect();
        let checks = snapshot
            .checks()
            .map(|(name, r)| {
                let summary = CheckSummary {
                    passes: r.passes,
                    fails: r.fails(),
                };
                (name.to_owned(), summary)
            })
            .collect();

        Self {
            scenario: scenario.to_owned(),
            total_requests: snapshot.counter(HTTP_REQS).map_or(0, |c| c.count),
            duration_ms: elapsed_secs * 1_000.0,
            peak_vus: execution.peak_vus,
            interrupted_iterations: execution.interrupted,
            metrics,
            checks,
            thresholds: verdict.outcomes,
            passed: verdict.passed,
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    fn value(&self, metric: &str, key: &str) -> Option<f64> {
        self.metric(metric)?.value(key)
    }
}

/// How the throughput line of the text summary is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Throughput {
    /// `Peak RPS:` requests per second over the run.
    #[default]
    PerSecond,
    /// `Throughput:` requests per minute over the run.
    PerMinute,
}

/// A domain counter printed under the request total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterLine {
    pub label: String,
    pub metric: String,
}

/// Which metrics the text summary shows and how it labels them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextLayout {
    /// Banner title. Defaults to the scenario name.
    pub title: Option<String>,
    pub counters: Vec<CounterLine>,
    /// Rate shown as `Error Rate:`. Defaults to `http_req_failed`.
    pub error_rate: Option<String>,
    /// Trend the latency block reads.
    pub latency: String,
    pub throughput: Throughput,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            title: None,
            counters: Vec::new(),
            error_rate: None,
            latency: HTTP_REQ_DURATION.to_owned(),
            throughput: Throughput::default(),
        }
    }
}

fn line(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "  {:<19}{value}", format!("{label}:"));
}

fn ms(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_owned(), |v| format!("{v:.0}ms"))
}

fn mark(passed: bool) -> char {
    if passed { '✓' } else { '✗' }
}

/// Render the fixed-layout human summary.
pub fn render_text(summary: &RunSummary, layout: &TextLayout) -> String {
    let mut out = String::new();
    let title = layout
        .title
        .clone()
        .unwrap_or_else(|| format!("{} RESULTS", summary.scenario.to_uppercase()));

    let _ = writeln!(out, "\n{RULE}\n  {title}\n{RULE}\n");

    line(&mut out, "Total Requests", summary.total_requests);
    for counter in &layout.counters {
        let count = summary.value(&counter.metric, "count").unwrap_or(0.0);
        line(&mut out, &counter.label, count);
    }
    let error_metric = layout.error_rate.as_deref().unwrap_or(HTTP_REQ_FAILED);
    let error_rate = summary.value(error_metric, "rate").unwrap_or(0.0);
    line(&mut out, "Error Rate", format!("{:.2}%", error_rate * 100.0));

    let _ = writeln!(out, "\n  Latency:");
    for (label, key) in [("p50", "p(50)"), ("p95", "p(95)"), ("p99", "p(99)"), ("max", "max")] {
        let _ = writeln!(out, "    {label}:  {}", ms(summary.value(&layout.latency, key)));
    }
    let _ = writeln!(out);

    let secs = summary.duration_ms / 1_000.0;
    let per_second = if secs > 0.0 {
        summary.total_requests as f64 / secs
    } else {
        0.0
    };
    match layout.throughput {
        Throughput::PerSecond => line(&mut out, "Peak RPS", format!("{per_second:.1}")),
        Throughput::PerMinute => {
            line(&mut out, "Throughput", format!("{:.1} req/min", per_second * 60.0))
        }
    }

    if !summary.checks.is_empty() {
        let _ = writeln!(out, "\n  Checks:");
        for (name, check) in &summary.checks {
            let total = check.passes + check.fails;
            let pct = if total == 0 {
                0.0
            } else {
                check.passes as f64 * 100.0 / total as f64
            };
            let _ = writeln!(
                out,
                "    {} {name}: {pct:.2}% ({}/{total})",
                mark(check.fails == 0),
                check.passes
            );
        }
    }

    if !summary.thresholds.is_empty() {
        let _ = writeln!(out, "\n  Thresholds:");
        for t in &summary.thresholds {
            let observed = t
                .observed
                .map_or_else(|| "no data".to_owned(), |v| format!("{v:.2}"));
            let _ = writeln!(
                out,
                "    {} {}: {} (observed {observed})",
                mark(t.passed),
                t.metric,
                t.expression
            );
        }
        let verdict = if summary.passed { "PASSED" } else { "FAILED" };
        let _ = writeln!(out, "\n  Result:            {verdict}");
    }

    let _ = writeln!(out, "\n{RULE}");
    out
}

/// A [`Reporter`] consumes a [`RunSummary`] and performs side effects: printing
/// it, persisting it, sending it somewhere.
///
/// The summary itself is pure data; reporters are the I/O boundary.
pub trait Reporter {
    fn report(&self, summary: &RunSummary) -> impl Future<Output = Result<()>> + Send;
}

/// Prints [`render_text`] to stdout.
#[derive(Debug, Clone, Default)]
pub struct StdoutReporter {
    pub layout: TextLayout,
}

impl Reporter for StdoutReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        print!("{}", render_text(summary, &self.layout));
        Ok(())
    }
}

/// Writes the summary as pretty JSON, creating missing parent directories.
#[derive(Debug, Clone)]
pub struct JsonFileReporter {
    pub path: PathBuf,
}

impl Reporter for JsonFileReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::info!("Summary written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        registry::{CHECKS, MetricsRegistry},
        threshold::{Threshold, evaluate},
    };

    fn summary() -> RunSummary {
        let registry = MetricsRegistry::new();
        registry.counter(HTTP_REQS).unwrap().add(120);
        registry.counter("tickets_created").unwrap().add(118);
        let errors = registry.rate("ticket_errors").unwrap();
        for i in 0..120 {
            errors.add(i < 2);
        }
        let latency = registry.trend(HTTP_REQ_DURATION).unwrap();
        for i in 1..=120 {
            latency.add(i as f64 * 10.0);
        }
        registry.rate(CHECKS).unwrap().add(true);
        registry.check("status is 201").add(true);
        registry.check("status is 201").add(false);

        let thresholds = Threshold::parse_all([
            (HTTP_REQ_DURATION, vec!["p(95)<2000"]),
            ("ticket_errors", vec!["rate<0.01"]),
        ])
        .unwrap();
        let snapshot = registry.snapshot();
        let verdict = evaluate(&snapshot, &thresholds);
        let execution = ExecutionReport {
            elapsed: Duration::from_secs(60),
            peak_vus: 10,
            interrupted: 0,
        };
        RunSummary::new("load-test", &snapshot, &execution, verdict)
    }

    #[test]
    fn summary_exports_k6_shaped_values() {
        let s = summary();
        assert_eq!(s.total_requests, 120);
        assert_eq!(s.duration_ms, 60_000.0);
        assert!(!s.passed);

        let json = serde_json::to_value(&s).unwrap();
        let reqs = &json["metrics"]["http_reqs"];
        assert_eq!(reqs["type"], "counter");
        assert_eq!(reqs["values"]["count"], 120.0);
        assert_eq!(reqs["values"]["rate"], 2.0);

        let errors = &json["metrics"]["ticket_errors"];
        assert_eq!(errors["type"], "rate");
        assert_eq!(errors["values"]["passes"], 2.0);
        assert_eq!(errors["values"]["fails"], 118.0);

        let latency = &json["metrics"]["http_req_duration"]["values"];
        for key in ["avg", "min", "med", "max", "p(50)", "p(90)", "p(95)", "p(99)", "count"] {
            assert!(latency[key].is_number(), "missing {key}");
        }
        assert_eq!(latency["max"], 1200.0);
        let near = |key: &str, expected: f64| {
            let v = latency[key].as_f64().unwrap();
            // within one 10ms sample step
            assert!((v - expected).abs() <= 11.0, "{key} = {v}, expected {expected}");
        };
        near("med", 600.0);
        near("p(50)", 600.0);
        near("p(90)", 1080.0);
        near("p(95)", 1140.0);
        near("p(99)", 1190.0);
        near("avg", 605.0);

        assert_eq!(json["checks"]["status is 201"]["fails"], 1);
        assert_eq!(json["thresholds"][1]["passed"], false);
    }

    #[test]
    fn empty_trend_exports_only_its_count() {
        let registry = MetricsRegistry::new();
        registry.trend(HTTP_REQ_DURATION).unwrap();
        let execution = ExecutionReport {
            elapsed: Duration::ZERO,
            peak_vus: 0,
            interrupted: 0,
        };
        let snapshot = registry.snapshot();
        let s = RunSummary::new("empty", &snapshot, &execution, evaluate(&snapshot, &[]));

        let latency = s.metric(HTTP_REQ_DURATION).unwrap();
        assert_eq!(latency.values.len(), 1);
        assert_eq!(latency.value("count"), Some(0.0));

        let text = render_text(&s, &TextLayout::default());
        assert!(text.contains("p95:  n/a"));
        assert!(text.contains("Peak RPS:          0.0"));
    }

    #[test]
    fn text_layout_matches_the_classic_banner() {
        let layout = TextLayout {
            title: Some("TICKETERO - LOAD TEST RESULTS".into()),
            counters: vec![CounterLine {
                label: "Tickets Created".into(),
                metric: "tickets_created".into(),
            }],
            error_rate: Some("ticket_errors".into()),
            throughput: Throughput::PerMinute,
            ..TextLayout::default()
        };
        let text = render_text(&summary(), &layout);

        assert!(text.contains("  TICKETERO - LOAD TEST RESULTS\n"));
        assert!(text.contains("  Total Requests:    120\n"));
        assert!(text.contains("  Tickets Created:   118\n"));
        assert!(text.contains("  Error Rate:        1.67%\n"));
        assert!(text.contains("    max:  1200ms\n"));
        assert!(text.contains("  Throughput:        120.0 req/min\n"));
        assert!(text.contains("✗ status is 201: 50.00% (1/2)"));
        assert!(text.contains("✗ ticket_errors: rate<0.01"));
        assert!(text.contains("Result:            FAILED"));
    }

    #[tokio::test]
    async fn json_reporter_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("load-test-summary.json");

        let exported = summary();
        JsonFileReporter { path: path.clone() }
            .report(&exported)
            .await
            .unwrap();

        let written: RunSummary = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.scenario, exported.scenario);
        assert_eq!(written.total_requests, 120);
        assert_eq!(written.checks, exported.checks);
        assert_eq!(
            written.metrics.keys().collect::<Vec<_>>(),
            exported.metrics.keys().collect::<Vec<_>>()
        );
        assert!(!written.passed);
    }
}
