//! Flow types: the DAG a Flow Builder assembles for one task kind,
//! and the run-time record a Flow Scheduler drives to completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::step::{StepDefinition, StepState};

/// A fully-built, immutable DAG. `steps` is in declaration order; the
/// scheduler computes execution order itself via `topological_phases`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl FlowDefinition {
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Overall run status, mirroring `TaskStatus` but scoped to one flow
/// execution (a task may be retried into a fresh flow run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    PartialSuccess,
    Failed,
    Cancelled,
}

/// Mutable run-time state for one flow execution. The scheduler owns
/// writes; the aggregator reads `steps` once the run reaches a terminal
/// status to build the final outcome summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: Uuid,
    pub task_id: Uuid,
    pub flow_name: String,
    pub status: RunStatus,
    pub steps: HashMap<String, StepState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FlowRun {
    pub fn new(task_id: Uuid, definition: &FlowDefinition) -> Self {
        let steps = definition
            .steps
            .iter()
            .map(|s| (s.name.clone(), StepState::pending()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            task_id,
            flow_name: definition.name.clone(),
            status: RunStatus::Running,
            steps,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Build a fresh run seeded from a prior attempt's terminal step map:
    /// steps that previously `Succeeded` carry their output forward
    /// untouched so the scheduler skips re-executing them; anything else
    /// (never run, or failed under the old flow shape) starts `pending`.
    /// Steps the current `definition` no longer names (e.g. a disabled
    /// branch) are dropped rather than carried forward.
    pub fn resumed(task_id: Uuid, definition: &FlowDefinition, prior: &HashMap<String, StepState>) -> Self {
        let steps = definition
            .steps
            .iter()
            .map(|s| {
                let state = match prior.get(&s.name) {
                    Some(state) if state.status == crate::model::step::StepStatus::Succeeded => state.clone(),
                    _ => StepState::pending(),
                };
                (s.name.clone(), state)
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            task_id,
            flow_name: definition.name.clone(),
            status: RunStatus::Running,
            steps,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::step::{StepKind, StepStatus};
    use crate::retry::RetryConfig;

    fn def(name: &str, depends_on: &[&str]) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            kind: StepKind::Probe,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            allow_partial_failure: false,
            retry: RetryConfig::default(),
        }
    }

    fn flow() -> FlowDefinition {
        FlowDefinition { name: "test".to_string(), steps: vec![def("a", &[]), def("b", &["a"])] }
    }

    #[test]
    fn resumed_carries_forward_only_succeeded_steps() {
        let mut prior = HashMap::new();
        prior.insert(
            "a".to_string(),
            StepState { status: StepStatus::Succeeded, attempts: 1, output: Some(serde_json::json!({"ok": true})), error: None },
        );
        prior.insert("b".to_string(), StepState { status: StepStatus::Failed, attempts: 3, output: None, error: Some("boom".to_string()) });

        let run = FlowRun::resumed(Uuid::new_v4(), &flow(), &prior);

        assert_eq!(run.steps["a"].status, StepStatus::Succeeded);
        assert_eq!(run.steps["a"].output, Some(serde_json::json!({"ok": true})));
        assert_eq!(run.steps["b"].status, StepStatus::Pending);
        assert_eq!(run.steps["b"].attempts, 0);
    }

    #[test]
    fn resumed_drops_steps_the_new_definition_no_longer_names() {
        let mut prior = HashMap::new();
        prior.insert("a".to_string(), StepState { status: StepStatus::Succeeded, attempts: 1, output: Some(serde_json::json!(1)), error: None });
        prior.insert("stale".to_string(), StepState { status: StepStatus::Succeeded, attempts: 1, output: Some(serde_json::json!(2)), error: None });

        let run = FlowRun::resumed(Uuid::new_v4(), &flow(), &prior);
        assert!(!run.steps.contains_key("stale"));
    }
}
