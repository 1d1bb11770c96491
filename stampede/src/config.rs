//! Load profiles: the k6-shaped YAML or JSON files a run is described in.
//!
//! ```yaml
//! name: spike-test
//! stages:
//!   - { duration: 2s, target: 50 }
//!   - { duration: 5s, target: 50 }
//!   - { duration: 3s, target: 0 }
//! thresholds:
//!   http_req_duration: "p(95)<5000"
//!   tickets_created: ["count>200"]
//! ```
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::ConfigError,
    executor::{ExecutionPlan, Stage},
    report::TextLayout,
    runner::RunOptions,
    scenario::ScenarioMetrics,
    threshold::Threshold,
    vu::{ThinkTime, WorkloadEnv},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: usize,
}

impl From<StageConfig> for Stage {
    fn from(value: StageConfig) -> Self {
        Stage::new(value.duration, value.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkTimeConfig {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

/// One expression or a list of them, like k6 accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expressions {
    One(String),
    Many(Vec<String>),
}

impl Expressions {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let all: &[String] = match self {
            Expressions::One(e) => std::slice::from_ref(e),
            Expressions::Many(es) => es,
        };
        all.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(flatten)]
    pub layout: TextLayout,
    /// Where to write the JSON summary, if anywhere.
    #[serde(default)]
    pub export: Option<PathBuf>,
}

/// A whole profile. Either `stages` or both `vus` and `duration` describe the
/// plan; `stages` wins when both are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub vus: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub stages: Option<Vec<StageConfig>>,
    #[serde(default)]
    pub think_time: Option<ThinkTimeConfig>,
    #[serde(default, with = "humantime_serde")]
    pub grace_period: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub tick: Option<Duration>,
    #[serde(default)]
    pub metrics: ScenarioMetrics,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Expressions>,
    #[serde(default)]
    pub summary: SummaryConfig,
}

impl RunConfig {
    pub fn plan(&self) -> Result<ExecutionPlan, ConfigError> {
        if let Some(stages) = &self.stages {
            return ExecutionPlan::staged(stages.iter().copied().map(Stage::from).collect());
        }
        match (self.vus, self.duration) {
            (Some(vus), Some(duration)) => ExecutionPlan::constant(vus, duration),
            (None, _) => Err(ConfigError::MissingField("vus")),
            (Some(_), None) => Err(ConfigError::MissingField("duration")),
        }
    }

    pub fn think_time(&self) -> Result<ThinkTime, ConfigError> {
        match self.think_time {
            Some(ThinkTimeConfig { min, max }) => ThinkTime::uniform(min, max),
            None => Ok(ThinkTime::None),
        }
    }

    pub fn thresholds(&self) -> Result<Vec<Threshold>, ConfigError> {
        Threshold::parse_all(
            self.thresholds
                .iter()
                .map(|(metric, expressions)| (metric.as_str(), expressions.iter())),
        )
    }

    /// Workload environment with `BASE_URL` resolved against this profile.
    pub fn env(&self, vars: BTreeMap<String, String>) -> WorkloadEnv {
        WorkloadEnv::resolve(self.base_url.as_deref(), vars)
    }

    /// Validate the profile and turn it into runner options.
    pub fn options(&self) -> Result<RunOptions, ConfigError> {
        let defaults = RunOptions::builder().plan(self.plan()?).build();
        let options = RunOptions {
            thresholds: self.thresholds()?,
            tick: self.tick.unwrap_or(defaults.tick),
            grace_period: self.grace_period.unwrap_or(defaults.grace_period),
            ..defaults
        };
        options.validate()?;
        Ok(options)
    }
}

/// Read a profile from `path`. `.json` files are parsed as JSON, anything else
/// as YAML.
pub fn load_profile<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_owned(),
            source,
        })
    } else {
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_owned(),
            source,
        })
    }
}
