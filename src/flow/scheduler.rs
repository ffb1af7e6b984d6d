//! Flow Scheduler: drives one `FlowDefinition`'s DAG of steps
//! to completion against a `FlowRun`'s result map.
//!
//! Phases are computed once via Kahn's algorithm topological sort, a
//! `Semaphore` bounds how many steps run at once, and each step retries
//! with exponential backoff between attempts. Steps run as plain futures
//! under `futures_util::future::join_all` rather than `tokio::spawn`,
//! since the scheduler only ever borrows `Deps` (no `'static` bound to
//! satisfy); a step's `allow_partial_failure` flag lets a failed
//! parent's children stay ready instead of an all-or-nothing
//! dependency-failed skip; cancellation is a hand-rolled
//! `Arc<AtomicBool>` + `Notify` pair.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{info, warn};

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::flow::{FlowDefinition, FlowRun, RunStatus};
use crate::model::step::{FlowJob, StepContext, StepDefinition, StepState, StepStatus};
use crate::retry;
use crate::services::media_tool::ProgressSink;

/// Cooperative cancellation signal shared between a Task Controller and
/// the Scheduler run it owns. Checking `is_cancelled()` is cheap enough to
/// do before scheduling every phase and every step; `cancelled()` is an
/// awaitable the retry-backoff sleep races against so a cancel during a
/// sleep doesn't wait out the full delay.
#[derive(Clone)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Kahn's-algorithm topological sort into parallel-execution phases,
/// keyed by this engine's `depends_on` field.
fn topological_phases(flow: &FlowDefinition) -> Result<Vec<Vec<String>>> {
    let step_names: HashSet<&str> = flow.steps.iter().map(|s| s.name.as_str()).collect();
    for step in &flow.steps {
        for dep in &step.depends_on {
            if !step_names.contains(dep.as_str()) {
                return Err(EngineError::Internal(format!("step '{}' depends on unknown step '{}'", step.name, dep)));
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &flow.steps {
        in_degree.entry(step.name.as_str()).or_insert(0);
        for dep in &step.depends_on {
            dependents.entry(dep.as_str()).or_default().push(step.name.as_str());
            *in_degree.entry(step.name.as_str()).or_insert(0) += 1;
        }
    }

    let mut phases = Vec::new();
    let mut remaining: HashSet<&str> = step_names;

    loop {
        let ready: Vec<&str> = remaining.iter().filter(|name| in_degree.get(*name).copied().unwrap_or(0) == 0).copied().collect();
        if ready.is_empty() {
            if remaining.is_empty() {
                break;
            }
            return Err(EngineError::Internal(format!("cycle detected in flow '{}'", flow.name)));
        }
        for name in &ready {
            remaining.remove(name);
            if let Some(deps) = dependents.get(name) {
                for dep in deps {
                    if let Some(deg) = in_degree.get_mut(dep) {
                        *deg -= 1;
                    }
                }
            }
        }
        phases.push(ready.into_iter().map(|s| s.to_string()).collect());
    }
    Ok(phases)
}

pub struct Scheduler {
    concurrency: usize,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency: concurrency.max(1) }
    }

    /// Run `flow` to completion (or to cancellation) against `run`,
    /// resuming any step already `Succeeded` in `run.steps` from its
    /// cached output instead of re-executing it.
    /// `on_progress(step_name, pct)` is called as steps report progress.
    pub async fn run(
        &self,
        flow: &FlowDefinition,
        mut run: FlowRun,
        job: FlowJob,
        deps: &Deps,
        cancel: &CancelSignal,
        on_progress: impl Fn(&str, u8) + Send + Sync + 'static,
    ) -> Result<FlowRun> {
        let phases = topological_phases(flow)?;
        let step_map: HashMap<&str, &StepDefinition> = flow.steps.iter().map(|s| (s.name.as_str(), s)).collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let on_progress = Arc::new(on_progress);

        let initial_results: HashMap<String, Value> =
            run.steps.iter().filter_map(|(name, state)| state.output.clone().map(|o| (name.clone(), o))).collect();
        let results = Arc::new(Mutex::new(initial_results));

        let mut cancelled = false;
        'phases: for phase in &phases {
            if cancel.is_cancelled() {
                cancelled = true;
                break 'phases;
            }

            let mut pending_futures = Vec::new();
            for step_name in phase {
                let def = step_map[step_name.as_str()];
                let already = run.steps.get(step_name).map(|s| s.status);
                if already == Some(StepStatus::Succeeded) {
                    continue;
                }

                if let Some(reason) = blocked_reason(def, &run.steps, &step_map) {
                    warn!(step = %step_name, reason, "skipping step — dependency unmet");
                    run.steps.insert(step_name.clone(), StepState { status: StepStatus::Skipped, attempts: 0, output: None, error: Some(reason.to_string()) });
                    continue;
                }

                let semaphore = semaphore.clone();
                let results = results.clone();
                let job = job.clone();
                let cancel = cancel.clone();
                let on_progress = on_progress.clone();
                let run_id = run.id;

                pending_futures.push(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    let snapshot = results.lock().await.clone();
                    let ctx = StepContext { flow_run_id: run_id, job, results: snapshot };
                    let state = run_step(def, ctx, deps, &cancel, on_progress).await;
                    (def.name.clone(), state)
                });
            }

            let outcomes = join_all(pending_futures).await;
            for (name, state) in outcomes {
                if state.status == StepStatus::Failed && state.error.as_deref() == Some("cancelled") {
                    cancelled = true;
                }
                if let Some(output) = &state.output {
                    results.lock().await.insert(name.clone(), output.clone());
                }
                info!(step = %name, status = ?state.status, attempts = state.attempts, "step terminal");
                run.steps.insert(name, state);
            }

            if cancelled {
                break 'phases;
            }
        }

        if cancelled || cancel.is_cancelled() {
            for state in run.steps.values_mut() {
                if matches!(state.status, StepStatus::Pending | StepStatus::Running) {
                    state.status = StepStatus::Failed;
                    state.error = Some("cancelled".to_string());
                }
            }
            run.status = RunStatus::Cancelled;
        } else {
            run.status =
                if run.steps.values().all(|s| matches!(s.status, StepStatus::Succeeded | StepStatus::Skipped)) {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Failed
                };
        }
        run.finished_at = Some(Utc::now());
        Ok(run)
    }
}

/// Whether `def` cannot run yet: `Some(reason)` if a non-partial-failure
/// parent has failed or skipped, or a parent hasn't reached a terminal
/// state at all. `None` means every parent is either succeeded, or failed
/// with `allow_partial_failure=true`.
fn blocked_reason<'a>(
    def: &StepDefinition,
    steps: &HashMap<String, StepState>,
    step_map: &HashMap<&str, &'a StepDefinition>,
) -> Option<&'static str> {
    for parent in &def.depends_on {
        let parent_state = steps.get(parent);
        match parent_state.map(|s| s.status) {
            Some(StepStatus::Succeeded) => continue,
            Some(StepStatus::Failed) | Some(StepStatus::Skipped) => {
                let parent_allows_partial = step_map.get(parent.as_str()).is_some_and(|d| d.allow_partial_failure);
                if parent_allows_partial {
                    continue;
                }
                return Some("upstream dependency failed");
            }
            _ => return Some("upstream dependency not yet terminal"),
        }
    }
    None
}

/// Execute one step to a terminal `StepState`, retrying retryable
/// failures per `def.retry` and racing the backoff sleep
/// against `cancel` so a cancel during backoff doesn't wait it out.
async fn run_step(
    def: &StepDefinition,
    ctx: StepContext,
    deps: &Deps,
    cancel: &CancelSignal,
    on_progress: Arc<dyn Fn(&str, u8) + Send + Sync>,
) -> StepState {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if cancel.is_cancelled() {
            return StepState { status: StepStatus::Failed, attempts, output: None, error: Some("cancelled".to_string()) };
        }

        let step_name = def.name.clone();
        let sink = {
            let on_progress = on_progress.clone();
            ProgressSink::new(move |pct| on_progress(&step_name, pct))
        };

        match crate::steps::dispatch(def, &ctx, deps, sink).await {
            Ok(output) => return StepState { status: StepStatus::Succeeded, attempts, output: Some(output), error: None },
            Err(err) => {
                let decision = retry::decide(&err, attempts, &def.retry);
                if !decision.retry {
                    return StepState { status: StepStatus::Failed, attempts, output: None, error: Some(err.reason()) };
                }
                tokio::select! {
                    _ = tokio::time::sleep(decision.delay) => {}
                    _ = cancel.cancelled() => {
                        return StepState { status: StepStatus::Failed, attempts, output: None, error: Some("cancelled".to_string()) };
                    }
                }
            }
        }
    }
}
