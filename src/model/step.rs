//! Step types: a closed set of step kinds
//! modeled as tagged variants rather than a trait-object plugin registry,
//! since the engine only ever dispatches to the steps named below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::task::{DetectLabelsPayload, TranscodePayload};
use crate::retry::RetryConfig;

/// One node of a flow's DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub kind: StepKind,
    pub depends_on: Vec<String>,
    /// Whether *this step's* failure is allowed to block its children's
    /// readiness.
    pub allow_partial_failure: bool,
    pub retry: RetryConfig,
}

/// The closed set of step implementations this engine carries. Adding a
/// step kind means adding a variant here and a dispatch arm in
/// `crate::steps::dispatch`, not registering a new trait object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Probe,
    Thumbnail,
    Sprite,
    Transcode,
    Upload,
    Finalize,
    UploadToObjectStore,
    Analysis { provider: String },
    Normalize,
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Probe => "probe",
            StepKind::Thumbnail => "thumbnail",
            StepKind::Sprite => "sprite",
            StepKind::Transcode => "transcode",
            StepKind::Upload => "upload",
            StepKind::Finalize => "finalize",
            StepKind::UploadToObjectStore => "upload-to-object-store",
            StepKind::Analysis { .. } => "analysis",
            StepKind::Normalize => "normalize",
        }
    }
}

/// Status of one step within one flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Per-step run state tracked by the Flow Scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    pub attempts: u32,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StepState {
    pub fn pending() -> Self {
        Self { status: StepStatus::Pending, attempts: 0, output: None, error: None }
    }
}

/// The input handed to one step's dispatch call: the flow's shared job
/// payload plus every already-completed step's output, so a step can read
/// upstream results by name.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub flow_run_id: Uuid,
    pub job: FlowJob,
    pub results: HashMap<String, serde_json::Value>,
}

impl StepContext {
    pub fn output_of(&self, step_name: &str) -> Option<&serde_json::Value> {
        self.results.get(step_name)
    }
}

/// The task payload, unwrapped to its concrete kind, carried through a flow
/// run. Built once by the Flow Builder from `Task.payload`.
#[derive(Debug, Clone)]
pub enum FlowJob {
    Transcode(TranscodePayload),
    DetectLabels(DetectLabelsPayload),
}

/// Well-known step names, shared between the Flow Builder (which wires
/// edges by these names) and the Step Executors (which look up a
/// named parent's output from `StepContext`). Kept as plain string
/// constants rather than an enum since they key into `StepContext::results`,
/// a `HashMap<String, _>`.
pub mod names {
    pub const PROBE: &str = "probe";
    pub const THUMBNAIL: &str = "thumbnail";
    pub const SPRITE: &str = "sprite";
    pub const TRANSCODE: &str = "transcode";
    pub const FINALIZE: &str = "finalize";
    pub const UPLOAD: &str = "upload";
    pub const UPLOAD_TO_OBJECT_STORE: &str = "upload-to-object-store";
    pub const LABEL_DETECTION: &str = "label-detection";
    pub const OBJECT_TRACKING: &str = "object-tracking";
    pub const FACE_DETECTION: &str = "face-detection";
    pub const PERSON_DETECTION: &str = "person-detection";
    pub const SPEECH_TRANSCRIPTION: &str = "speech-transcription";
    pub const NORMALIZE: &str = "normalize";
}
