//! Task Controller: the outer poll loop. Claims queued tasks,
//! builds and runs their flow, aggregates the terminal step map into a
//! task-level outcome, and is the sole writer of `Task.status` and
//! `Task.attempts` — everything else in the engine only reads tasks.
//!
//! Each claimed task runs through the Flow Builder + Flow Scheduler +
//! Aggregator pipeline in a per-attempt retry loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::deps::Deps;
use crate::errors::EngineError;
use crate::flow::aggregator::{self, Outcome};
use crate::flow::builder;
use crate::flow::scheduler::{CancelSignal, Scheduler};
use crate::model::flow::{FlowDefinition, FlowRun, RunStatus};
use crate::model::step::FlowJob;
use crate::model::task::Task;
use crate::retry;
use crate::store::tasks::TaskStore;

/// Everything the poll loop needs: a task queue, the flow dependencies,
/// and the scheduling knobs taken from `Config` at construction time.
pub struct Controller {
    config: Config,
    tasks: Arc<dyn TaskStore>,
    deps: Deps,
    scheduler: Scheduler,
}

impl Controller {
    pub fn new(config: Config, tasks: Arc<dyn TaskStore>, deps: Deps) -> Self {
        let scheduler = Scheduler::new(config.scheduler_concurrency);
        Self { config, tasks, deps, scheduler }
    }

    /// Run the poll loop until `cancel` fires.
    pub async fn run(&self, cancel: CancelSignal) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let processed = self.run_once(&cancel).await;
            if processed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }

    /// Drain at most one bounded batch of queued tasks and process each to
    /// a terminal or requeued state. Returns the number of tasks claimed,
    /// so `run` knows whether to sleep before polling again.
    pub async fn run_once(&self, cancel: &CancelSignal) -> usize {
        let mut processed = 0usize;
        for _ in 0..self.config.max_task_batch {
            if cancel.is_cancelled() {
                break;
            }
            let task = match self.tasks.claim_next().await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(err) => {
                    // Loop-level exception: log and let
                    // the caller's poll-interval sleep absorb it.
                    warn!(error = %err, "failed to claim next task");
                    break;
                }
            };
            self.process_task(task, cancel).await;
            processed += 1;
        }
        processed
    }

    async fn process_task(&self, task: Task, cancel: &CancelSignal) {
        let span = tracing::info_span!("task", task_id = %task.id, kind = %task.kind, attempt = task.attempts);
        let _enter = span.enter();
        info!("claimed task");

        match builder::build(&task, &self.config) {
            Ok((flow, job)) => self.run_flow(&task, flow, job, cancel).await,
            Err(err) => {
                // A build failure (e.g. schema-invalid payload) never ran a
                // single step; classify and settle it the same way a
                // terminal step failure would be settled.
                self.settle(&task, err, None).await;
            }
        }
    }

    async fn run_flow(&self, task: &Task, flow: FlowDefinition, job: FlowJob, cancel: &CancelSignal) {
        let run = match &task.flow_results {
            Some(prior) => {
                info!(completed = prior.values().filter(|s| s.status == crate::model::step::StepStatus::Succeeded).count(), "resuming flow from prior attempt");
                FlowRun::resumed(task.id, &flow, prior)
            }
            None => FlowRun::new(task.id, &flow),
        };
        let tasks = Arc::clone(&self.tasks);
        let task_id = task.id;
        let on_progress = move |step: &str, pct: u8| {
            let tasks = Arc::clone(&tasks);
            let step = step.to_string();
            tokio::spawn(async move {
                if let Err(err) = tasks.update_progress(task_id, pct).await {
                    warn!(%step, error = %err, "failed to persist task progress");
                }
            });
        };

        let run = match self.scheduler.run(&flow, run, job, &self.deps, cancel, on_progress).await {
            Ok(run) => run,
            Err(err) => {
                // Scheduler returns Err only for a flow-shape defect
                // (unknown dependency, cycle) — a build-time bug, not a
                // runtime step failure. Terminal: there is no retrying a
                // flow whose DAG does not resolve.
                error!(error = %err, "flow scheduler rejected flow definition");
                self.settle(task, EngineError::terminal(err.reason()), None).await;
                return;
            }
        };

        match run.status {
            RunStatus::Cancelled => {
                // Interrupted by worker shutdown, not a judgment on the
                // task itself: requeue unconditionally so another attempt
                // (by this worker or another) can pick it up, resuming
                // from whatever completed before the cancel landed.
                info!("flow cancelled, requeuing task");
                if let Err(err) = self.tasks.mark_failed(task.id, "cancelled", true, Some(&run.steps)).await {
                    warn!(error = %err, "failed to requeue cancelled task");
                }
            }
            _ => {
                let result = aggregator::aggregate(task.kind, &run.steps);
                self.settle_aggregate(task, result, &run.steps).await;
            }
        }
    }

    /// Apply the Aggregator's verdict.
    async fn settle_aggregate(&self, task: &Task, result: aggregator::AggregateResult, steps: &std::collections::HashMap<String, crate::model::step::StepState>) {
        match result.outcome {
            Outcome::Succeeded => {
                info!(summary = %result.summary, "task succeeded");
                if let Err(err) = self.tasks.mark_succeeded(task.id).await {
                    warn!(error = %err, "failed to persist task success");
                }
            }
            Outcome::Failed => {
                // The scheduler already exhausted step-level retries for
                // every failed step; a whole-flow failure here is the
                // coarser, task-level retry the Retry Policy is asked to
                // judge separately. Carry the step map forward so a
                // requeued attempt resumes from whatever did complete.
                self.settle(task, EngineError::retryable(result.summary), Some(steps)).await;
            }
        }
    }

    /// Run `err` through the task-level Retry Policy and either requeue or
    /// terminally fail the task. `flow_results`, when the flow produced a
    /// step map at all, is persisted on requeue so the next attempt can
    /// resume (§3, §4.7 "Resume"); a terminal failure has no use for it.
    async fn settle(&self, task: &Task, err: EngineError, flow_results: Option<&std::collections::HashMap<String, crate::model::step::StepState>>) {
        let decision = retry::decide(&err, task.attempts, &self.config.task_retry);
        if decision.retry {
            warn!(error = %err, delay_ms = decision.delay.as_millis(), "task failed, retrying");
            tokio::time::sleep(decision.delay).await;
            if let Err(store_err) = self.tasks.mark_failed(task.id, &err.reason(), true, flow_results).await {
                warn!(error = %store_err, "failed to requeue failed task");
            }
        } else {
            error!(error = %err, reason = decision.reason, "task failed terminally");
            if let Err(store_err) = self.tasks.mark_failed(task.id, &err.reason(), false, None).await {
                warn!(error = %store_err, "failed to persist terminal task failure");
            }
        }
    }
}
