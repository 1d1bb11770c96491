use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::metric::MetricKind;

/// Problems detected while turning a profile into a runnable test.
///
/// Every variant is raised before the first virtual user starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("vus must be greater than zero")]
    ZeroVus,

    #[error("stages must not be empty")]
    EmptyStages,

    #[error("missing `{0}`: a plan needs either `stages` or both `vus` and `duration`")]
    MissingField(&'static str),

    #[error("tick must be greater than zero")]
    ZeroTick,

    #[error("think_time.min ({min:?}) is greater than think_time.max ({max:?})")]
    ThinkTimeRange { min: Duration, max: Duration },

    #[error("invalid threshold `{expression}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold `{expression}` references unknown metric `{metric}`")]
    UnknownMetric { metric: String, expression: String },

    #[error("threshold `{expression}` cannot be applied to {kind} metric `{metric}`")]
    SelectorMismatch {
        metric: String,
        expression: String,
        kind: MetricKind,
    },

    #[error("metric `{name}` is already registered as a {existing}, not a {requested}")]
    MetricKindConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("failed to allocate histogram for trend `{name}`: {source}")]
    Histogram {
        name: String,
        #[source]
        source: hdrhistogram::CreationError,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top level error of the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("report i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
