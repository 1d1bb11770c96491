use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    sync::watch::{self, Receiver, Sender},
    task::JoinHandle,
    time::Instant,
};
use typed_builder::TypedBuilder;

use super::{ExecutionReport, Executor, Schedule};
use crate::{
    scenario::{IterationResult, Scenario},
    vu::{IterationRecorder, ThinkTime, VuContext, VuSignals, WorkloadEnv, run_vu},
};

/// How long aborted virtual users get to unwind before the snapshot is taken.
const ABORT_SETTLE: Duration = Duration::from_secs(1);

/// Closed-model executor that keeps `schedule.target_at(elapsed)` virtual users
/// running at every tick.
///
/// - The controller re-evaluates the schedule every `tick` on absolute deadlines,
///   so ticks do not drift with the work done in between.
/// - Growing the pool spawns one tokio task per virtual user.
/// - Shrinking the pool retires the most recently spawned users; they finish
///   the iteration they are in and exit.
/// - When the schedule ends, shutdown is broadcast and every user still alive,
///   retiring ones included, gets `grace_period` to finish.
#[derive(Debug, TypedBuilder)]
pub struct VuExecutor {
    /// The concurrency schedule, picked once from the plan.
    pub schedule: Box<dyn Schedule>,
    /// Granularity of the controller loop.
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
    /// Time given to virtual users to finish after the plan has ended.
    #[builder(default = Duration::from_secs(30))]
    pub grace_period: Duration,
}

impl<F, Fut> Executor<F, Fut> for VuExecutor
where
    Self: Send + Sync + Sized,
    F: Fn(VuContext) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = IterationResult> + Send + 'static,
{
    async fn exec(
        &self,
        scenario: &Scenario<F, Fut>,
        recorder: Arc<IterationRecorder>,
    ) -> ExecutionReport {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut pool = VuPool::new(scenario, recorder, shutdown_rx);
        let total = self.schedule.duration();
        let stages = self.schedule.stage_count();
        let mut stage = None;
        let mut peak_vus = 0;

        tracing::info!("Running scenario: {} for {total:?}!", scenario.name);
        let started = Instant::now();
        let deadline = started + total;
        let mut next_tick = started;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }

            let current = self.schedule.stage_at(elapsed);
            if current != stage {
                if let Some(i) = current {
                    tracing::info!("Starting stage: {}/{stages}", i + 1);
                }
                stage = current;
            }

            pool.reap();
            pool.scale_to(self.schedule.target_at(elapsed));
            peak_vus = peak_vus.max(pool.running());

            next_tick += self.tick;
            tokio::time::sleep_until(next_tick.min(deadline)).await;
        }

        tracing::info!("Plan finished, signaling shutdown to {} VUs...", pool.running());
        shutdown_tx.send_replace(true);
        let interrupted = pool.drain(self.grace_period).await;

        let elapsed = started.elapsed();
        tracing::info!("Done running scenario: {} in {elapsed:?}!", scenario.name);
        ExecutionReport {
            elapsed,
            peak_vus,
            interrupted,
        }
    }
}

/// A running virtual user the scheduler can still retire.
struct VuSlot {
    id: usize,
    retire: Sender<bool>,
}

/// The population of virtual users of one run.
struct VuPool<F> {
    action: F,
    think_time: ThinkTime,
    env: Arc<WorkloadEnv>,
    recorder: Arc<IterationRecorder>,
    shutdown: Receiver<bool>,
    /// Users counted towards the target, oldest first.
    active: Vec<VuSlot>,
    /// Every task not yet known to be finished, retiring ones included.
    handles: Vec<JoinHandle<u64>>,
    next_id: usize,
}

impl<F, Fut> VuPool<F>
where
    F: Fn(VuContext) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = IterationResult> + Send + 'static,
{
    fn new(
        scenario: &Scenario<F, Fut>,
        recorder: Arc<IterationRecorder>,
        shutdown: Receiver<bool>,
    ) -> Self {
        Self {
            action: scenario.action.clone(),
            think_time: scenario.think_time,
            env: Arc::new(scenario.env.clone()),
            recorder,
            shutdown,
            active: Vec::new(),
            handles: Vec::new(),
            next_id: 0,
        }
    }

    fn running(&self) -> usize {
        self.active.len()
    }

    fn scale_to(&mut self, target: usize) {
        while self.active.len() < target {
            self.spawn();
        }
        if self.active.len() > target {
            for slot in self.active.drain(target..) {
                tracing::debug!("Retiring VU {}.", slot.id);
                slot.retire.send_replace(true);
            }
        }
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        let (retire_tx, retire_rx) = watch::channel(false);
        let signals = VuSignals {
            shutdown: self.shutdown.clone(),
            retire: retire_rx,
        };
        self.handles.push(tokio::spawn(run_vu(
            id,
            self.action.clone(),
            self.think_time,
            Arc::clone(&self.recorder),
            Arc::clone(&self.env),
            signals,
        )));
        self.active.push(VuSlot {
            id,
            retire: retire_tx,
        });
    }

    /// Forget tasks that already exited.
    fn reap(&mut self) {
        self.handles.retain(|h| !h.is_finished());
    }

    /// Wait for every task to exit, aborting the ones that outlive `grace`.
    /// Returns the number of aborted virtual users.
    async fn drain(mut self, grace: Duration) -> usize {
        let mut handles = std::mem::take(&mut self.handles);
        tracing::info!("Draining {} VUs...", handles.len());

        let drained = tokio::time::timeout(grace, join_all(handles.iter_mut())).await;
        match drained {
            Ok(results) => {
                for res in results {
                    if let Err(e) = res {
                        tracing::error!("VU panicked with error: {e}");
                    }
                }
                0
            }
            Err(_) => {
                let stuck: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
                for h in &stuck {
                    h.abort();
                }
                tracing::warn!(
                    "{} VUs still running after the {grace:?} grace period were aborted; \
                     their in-flight iterations were discarded",
                    stuck.len()
                );
                let interrupted = stuck.len();
                if tokio::time::timeout(ABORT_SETTLE, join_all(stuck))
                    .await
                    .is_err()
                {
                    tracing::warn!("Aborted VUs did not unwind within {ABORT_SETTLE:?}");
                }
                interrupted
            }
        }
    }
}
