//! Pass/fail rules over final metric values.
//!
//! A threshold is written the way k6 writes them: `p(95)<2000`, `rate<0.01`,
//! `count>50`. Expressions are parsed once, when the profile is loaded, into a
//! [`Threshold`]; evaluation never looks at the string again.
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    metric::MetricKind,
    registry::{MetricSnapshot, MetricsRegistry, MetricsSnapshot},
};

/// Which statistic of the metric a threshold looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector {
    Count,
    Rate,
    Percentile(f64),
    Min,
    Max,
    Mean,
}

impl Selector {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "count" => Ok(Selector::Count),
            "rate" => Ok(Selector::Rate),
            "min" => Ok(Selector::Min),
            "max" => Ok(Selector::Max),
            "mean" | "avg" => Ok(Selector::Mean),
            "med" => Ok(Selector::Percentile(50.0)),
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown selector `{other}`"))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("percentile `{inner}` is not a number"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {p} is outside 0..=100"));
                }
                Ok(Selector::Percentile(p))
            }
        }
    }

    /// The only metric kind this selector can be applied to.
    pub fn applies_to(&self) -> MetricKind {
        match self {
            Selector::Count => MetricKind::Counter,
            Selector::Rate => MetricKind::Rate,
            Selector::Percentile(_) | Selector::Min | Selector::Max | Selector::Mean => {
                MetricKind::Trend
            }
        }
    }

    /// Observed value, or `None` when the metric holds no data for it.
    fn observe(&self, metric: &MetricSnapshot) -> Option<f64> {
        match (self, metric) {
            (Selector::Count, MetricSnapshot::Counter(c)) => Some(c.count as f64),
            (Selector::Rate, MetricSnapshot::Rate(r)) => r.has_data().then(|| r.rate()),
            (Selector::Percentile(p), MetricSnapshot::Trend(t)) => t.percentile(*p),
            (Selector::Min, MetricSnapshot::Trend(t)) => t.min(),
            (Selector::Max, MetricSnapshot::Trend(t)) => t.max(),
            (Selector::Mean, MetricSnapshot::Trend(t)) => t.mean(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    fn holds(&self, observed: f64, literal: f64) -> bool {
        match self {
            Comparator::Lt => observed < literal,
            Comparator::Le => observed <= literal,
            Comparator::Gt => observed > literal,
            Comparator::Ge => observed >= literal,
        }
    }
}

/// A parsed `<selector> <comparator> <literal>` rule bound to one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub expression: String,
    pub selector: Selector,
    pub comparator: Comparator,
    pub literal: f64,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidThreshold {
            metric: metric.to_owned(),
            expression: expression.to_owned(),
            reason,
        };

        let at = expression
            .find(['<', '>'])
            .ok_or_else(|| invalid("expected one of <, <=, >, >=".into()))?;
        let (selector, rest) = expression.split_at(at);
        let (comparator, literal) = match rest.as_bytes() {
            [b'<', b'=', ..] => (Comparator::Le, &rest[2..]),
            [b'>', b'=', ..] => (Comparator::Ge, &rest[2..]),
            [b'<', ..] => (Comparator::Lt, &rest[1..]),
            _ => (Comparator::Gt, &rest[1..]),
        };

        let selector = Selector::parse(selector.trim()).map_err(invalid)?;
        let literal: f64 = literal
            .trim()
            .parse()
            .map_err(|_| invalid(format!("`{}` is not a number", literal.trim())))?;
        if !literal.is_finite() {
            return Err(invalid("the limit must be a finite number".into()));
        }

        Ok(Self {
            metric: metric.to_owned(),
            expression: expression.to_owned(),
            selector,
            comparator,
            literal,
        })
    }

    /// Parse every `(metric, expressions)` pair of a profile.
    pub fn parse_all<'a, I, E>(sets: I) -> Result<Vec<Self>, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, E)>,
        E: IntoIterator<Item = &'a str>,
    {
        let mut thresholds = Vec::new();
        for (metric, expressions) in sets {
            for expression in expressions {
                thresholds.push(Self::parse(metric, expression)?);
            }
        }
        Ok(thresholds)
    }

    /// Check the threshold against the metrics that will exist during the run.
    pub fn bind(&self, registry: &MetricsRegistry) -> Result<(), ConfigError> {
        let kind = registry
            .kind_of(&self.metric)
            .ok_or_else(|| ConfigError::UnknownMetric {
                metric: self.metric.clone(),
                expression: self.expression.clone(),
            })?;
        if kind != self.selector.applies_to() {
            return Err(ConfigError::SelectorMismatch {
                metric: self.metric.clone(),
                expression: self.expression.clone(),
                kind,
            });
        }
        Ok(())
    }

    /// Fail-closed: a missing metric, a rate or trend without samples, or a
    /// NaN never passes.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdOutcome {
        let observed = snapshot
            .get(&self.metric)
            .and_then(|m| self.selector.observe(m));
        let passed = observed.is_some_and(|v| self.comparator.holds(v, self.literal));
        ThresholdOutcome {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            observed,
            passed,
        }
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub outcomes: Vec<ThresholdOutcome>,
    /// AND of every outcome. An empty threshold list passes.
    pub passed: bool,
}

pub fn evaluate(snapshot: &MetricsSnapshot, thresholds: &[Threshold]) -> ThresholdReport {
    let outcomes: Vec<_> = thresholds.iter().map(|t| t.evaluate(snapshot)).collect();
    let passed = outcomes.iter().all(|o| o.passed);
    ThresholdReport { outcomes, passed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(error_count: usize) -> MetricsRegistry {
        let registry = MetricsRegistry::new();
        let latency = registry.trend("http_req_duration").unwrap();
        for _ in 0..100 {
            latency.add(1800.0);
        }
        let errors = registry.rate("ticket_errors").unwrap();
        for i in 0..1000 {
            errors.add(i < error_count);
        }
        registry.counter("tickets_created").unwrap().add(60);
        registry
    }

    fn thresholds() -> Vec<Threshold> {
        Threshold::parse_all([
            ("http_req_duration", vec!["p(95)<2000"]),
            ("ticket_errors", vec!["rate<0.01"]),
            ("tickets_created", vec!["count>50"]),
        ])
        .unwrap()
    }

    #[test]
    fn parses_selectors_and_comparators() {
        let t = Threshold::parse("http_req_duration", "p(95) <= 2000").unwrap();
        assert_eq!(t.selector, Selector::Percentile(95.0));
        assert_eq!(t.comparator, Comparator::Le);
        assert_eq!(t.literal, 2000.0);

        let t = Threshold::parse("ticket_errors", "rate<0.01").unwrap();
        assert_eq!(t.selector, Selector::Rate);
        assert_eq!(t.comparator, Comparator::Lt);

        let t = Threshold::parse("tickets_created", "count>=50").unwrap();
        assert_eq!(t.comparator, Comparator::Ge);

        assert_eq!(
            Threshold::parse("x", "avg>1").unwrap().selector,
            Selector::Mean
        );
        assert_eq!(
            Threshold::parse("x", "med>1").unwrap().selector,
            Selector::Percentile(50.0)
        );
        assert_eq!(
            Threshold::parse("x", "p(99.9)<1").unwrap().selector,
            Selector::Percentile(99.9)
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        let malformed = [
            "p(95)", "p95<10", "rate<abc", "p(101)<5", "stddev<1", "count==3", "max<inf",
        ];
        for expression in malformed {
            let err = Threshold::parse("m", expression).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidThreshold { .. }),
                "{expression}: {err}"
            );
        }
    }

    #[test]
    fn binding_checks_metric_kind() {
        let registry = registry(0);
        Threshold::parse("http_req_duration", "p(95)<1")
            .unwrap()
            .bind(&registry)
            .unwrap();

        let err = Threshold::parse("ticket_errors", "p(95)<1")
            .unwrap()
            .bind(&registry)
            .unwrap_err();
        assert!(matches!(err, ConfigError::SelectorMismatch { kind: MetricKind::Rate, .. }));

        let err = Threshold::parse("nope", "count>1")
            .unwrap()
            .bind(&registry)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMetric { .. }));
    }

    #[test]
    fn all_thresholds_pass_within_limits() {
        let report = evaluate(&registry(5).snapshot(), &thresholds());
        assert!(report.passed, "{report:?}");
        assert_eq!(report.outcomes[1].observed, Some(0.005));
    }

    #[test]
    fn one_failing_threshold_fails_the_run() {
        let report = evaluate(&registry(20).snapshot(), &thresholds());
        assert!(!report.passed);
        let passed: Vec<bool> = report.outcomes.iter().map(|o| o.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
    }

    #[test]
    fn missing_data_fails_closed() {
        let registry = MetricsRegistry::new();
        registry.trend("http_req_duration").unwrap();
        registry.rate("ticket_errors").unwrap();
        registry.counter("tickets_created").unwrap();

        let thresholds = Threshold::parse_all([
            ("http_req_duration", vec!["p(95)<2000", "max<1", "mean>=0"]),
            ("ticket_errors", vec!["rate<0.01"]),
            ("tickets_created", vec!["count>0"]),
            ("unregistered", vec!["count<1"]),
        ])
        .unwrap();
        let report = evaluate(&registry.snapshot(), &thresholds);

        assert!(!report.passed);
        assert!(report.outcomes.iter().all(|o| !o.passed));
        assert_eq!(report.outcomes[4].observed, Some(0.0));
    }

    #[test]
    fn percentiles_see_the_slow_tail() {
        let registry = MetricsRegistry::new();
        let latency = registry.trend("http_req_duration").unwrap();
        for _ in 0..95 {
            latency.add(100.0);
        }
        for _ in 0..5 {
            latency.add(9_000.0);
        }

        let thresholds = Threshold::parse_all([(
            "http_req_duration",
            vec!["p(50)<2000", "p(90)<2000", "p(99)<2000", "max<2000"],
        )])
        .unwrap();
        let report = evaluate(&registry.snapshot(), &thresholds);

        let passed: Vec<bool> = report.outcomes.iter().map(|o| o.passed).collect();
        assert_eq!(passed, vec![true, true, false, false]);
        let p99 = report.outcomes[2].observed.unwrap();
        assert!((p99 - 9_000.0).abs() <= 9.0, "p99 = {p99}");
    }

    #[test]
    fn one_fast_request_does_not_hide_slow_ones() {
        let registry = MetricsRegistry::new();
        let latency = registry.trend("http_req_duration").unwrap();
        latency.add(10.0);
        for _ in 0..99 {
            latency.add(9_000.0);
        }

        let outcome = Threshold::parse("http_req_duration", "p(95)<2000")
            .unwrap()
            .evaluate(&registry.snapshot());
        assert!(!outcome.passed, "{outcome:?}");
    }

    #[test]
    fn empty_threshold_list_passes() {
        assert!(evaluate(&MetricsSnapshot::default(), &[]).passed);
    }
}
