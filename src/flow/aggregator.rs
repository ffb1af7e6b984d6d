//! Partial-Success Aggregator: a pure function from a flow
//! kind and its terminal `StepResult` map to an overall task outcome —
//! the detect-labels flow tolerates some analysis children failing as
//! long as at least one succeeds and finalization completes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::step::{names, StepState, StepStatus};
use crate::model::task::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub outcome: Outcome,
    pub summary: String,
    pub succeeded_steps: Vec<String>,
    pub failed_steps: Vec<String>,
}

const ANALYSIS_STEP_NAMES: &[&str] =
    &[names::LABEL_DETECTION, names::OBJECT_TRACKING, names::FACE_DETECTION, names::PERSON_DETECTION, names::SPEECH_TRANSCRIPTION];

/// Classify the terminal `StepResult` map of one flow run.
pub fn aggregate(flow_kind: TaskKind, steps: &HashMap<String, StepState>) -> AggregateResult {
    let succeeded_steps: Vec<String> =
        steps.iter().filter(|(_, s)| s.status == StepStatus::Succeeded).map(|(name, _)| name.clone()).collect();
    let failed_steps: Vec<String> =
        steps.iter().filter(|(_, s)| s.status == StepStatus::Failed).map(|(name, _)| name.clone()).collect();

    let outcome = match flow_kind {
        // Transcode flow: success iff every scheduled step completed.
        TaskKind::Transcode => {
            if !steps.is_empty() && steps.values().all(|s| s.status == StepStatus::Succeeded) {
                Outcome::Succeeded
            } else {
                Outcome::Failed
            }
        }
        // Detect-labels flow: success iff at least one analysis child
        // completed AND the normalize (finalization) node completed.
        TaskKind::DetectLabels => {
            let any_analysis_succeeded = ANALYSIS_STEP_NAMES
                .iter()
                .any(|name| steps.get(*name).is_some_and(|s| s.status == StepStatus::Succeeded));
            let normalize_succeeded = steps.get(names::NORMALIZE).is_some_and(|s| s.status == StepStatus::Succeeded);
            if any_analysis_succeeded && normalize_succeeded {
                Outcome::Succeeded
            } else {
                Outcome::Failed
            }
        }
    };

    let summary = match (flow_kind, outcome) {
        (_, Outcome::Succeeded) => format!("{} of {} steps succeeded", succeeded_steps.len(), steps.len()),
        (TaskKind::DetectLabels, Outcome::Failed) if !failed_steps.is_empty() && succeeded_steps.iter().all(|n| n == names::UPLOAD_TO_OBJECT_STORE) => {
            "all enabled processors failed".to_string()
        }
        (_, Outcome::Failed) => format!("{} of {} steps failed: {}", failed_steps.len(), steps.len(), failed_steps.join(", ")),
    };

    AggregateResult { outcome, summary, succeeded_steps, failed_steps }
}
