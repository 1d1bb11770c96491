use std::{fmt::Debug, time::Duration};

use crate::error::ConfigError;

/// A stage ramps the number of virtual users to `target` over `duration`.
///
/// Use `Stage::new(Duration::from_secs(2), 50)` to go from the previous target
/// to 50 users in two seconds. A zero `duration` jumps to `target` instantly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    /// Virtual users at the end of the stage
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// How concurrency evolves over the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// `vus` users from the start until `duration` has elapsed.
    Constant { vus: usize, duration: Duration },
    /// Piecewise-linear ramp through `stages`, starting from zero users.
    Staged { stages: Vec<Stage> },
}

impl ExecutionPlan {
    pub fn constant(vus: usize, duration: Duration) -> Result<Self, ConfigError> {
        let plan = ExecutionPlan::Constant { vus, duration };
        plan.validate()?;
        Ok(plan)
    }

    pub fn staged(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        let plan = ExecutionPlan::Staged { stages };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ExecutionPlan::Constant { vus: 0, .. } => Err(ConfigError::ZeroVus),
            ExecutionPlan::Staged { stages } if stages.is_empty() => Err(ConfigError::EmptyStages),
            _ => Ok(()),
        }
    }

    /// Pick the schedule implementation for this plan.
    pub fn schedule(&self) -> Box<dyn Schedule> {
        match self {
            ExecutionPlan::Constant { vus, duration } => Box::new(ConstantVus {
                vus: *vus,
                duration: *duration,
            }),
            ExecutionPlan::Staged { stages } => Box::new(RampingVus {
                stages: stages.clone(),
            }),
        }
    }
}

/// Desired number of virtual users as a function of elapsed time.
pub trait Schedule: Send + Sync + Debug {
    /// Virtual users that should be running `elapsed` after the start.
    fn target_at(&self, elapsed: Duration) -> usize;

    /// Total planned duration; the run ends once it has elapsed.
    fn duration(&self) -> Duration;

    /// Index of the stage active at `elapsed`, for progress logging.
    fn stage_at(&self, _elapsed: Duration) -> Option<usize> {
        None
    }

    fn stage_count(&self) -> usize {
        1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstantVus {
    pub vus: usize,
    pub duration: Duration,
}

impl Schedule for ConstantVus {
    fn target_at(&self, elapsed: Duration) -> usize {
        if elapsed < self.duration { self.vus } else { 0 }
    }

    fn duration(&self) -> Duration {
        self.duration
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RampingVus {
    pub stages: Vec<Stage>,
}

impl RampingVus {
    /// `(stage index, elapsed within the stage, users at stage start)`.
    fn locate(&self, elapsed: Duration) -> Option<(usize, Duration, usize)> {
        let mut stage_start = Duration::ZERO;
        let mut from = 0;
        for (i, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return Some((i, elapsed - stage_start, from));
            }
            from = stage.target;
            stage_start = stage_end;
        }
        None
    }
}

impl Schedule for RampingVus {
    fn target_at(&self, elapsed: Duration) -> usize {
        match self.locate(elapsed) {
            Some((i, in_stage, from)) => {
                let stage = &self.stages[i];
                calc_target_vus(in_stage, stage.duration, from, stage.target)
            }
            None => self.stages.last().map_or(0, |s| s.target),
        }
    }

    fn duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    fn stage_at(&self, elapsed: Duration) -> Option<usize> {
        self.locate(elapsed).map(|(i, ..)| i)
    }

    fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Pure function computing the desired number of users inside one stage.
///
/// Linearly interpolates between `start_vus` and `end_vus` and rounds to the
/// nearest integer. Elapsed time past the stage end is capped at `end_vus`.
pub fn calc_target_vus(
    elapsed: Duration,
    stage_duration: Duration,
    start_vus: usize,
    end_vus: usize,
) -> usize {
    if stage_duration.is_zero() {
        return end_vus;
    }
    // Interpolation factor [0.0..1.0]
    let t = (elapsed.as_secs_f64() / stage_duration.as_secs_f64()).min(1.0);
    let (start, end) = (start_vus as f64, end_vus as f64);
    (start + (end - start) * t).round().max(0.0) as usize
}
