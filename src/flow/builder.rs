//! Flow Builder: for a given task, materializes the DAG of
//! StepJobs a Flow Scheduler will execute — the edge set, the per-step
//! `allow_partial_failure` flag, and the per-step retry configuration.
//!
//! The two flow shapes below are fixed Rust functions rather than an
//! externally-authored flow description language: the set of task kinds
//! this worker understands is closed and small.

use crate::config::Config;
use crate::errors::Result;
use crate::model::flow::FlowDefinition;
use crate::model::step::{names, FlowJob, StepDefinition, StepKind};
use crate::model::task::{DetectLabelsPayload, Task, TaskKind, TranscodePayload};
use crate::validation;

/// One processor name paired with the step name the scheduler/executors
/// use for it.
const ANALYSIS_PROCESSORS: &[&str] = &[
    names::LABEL_DETECTION,
    names::OBJECT_TRACKING,
    names::FACE_DETECTION,
    names::PERSON_DETECTION,
    names::SPEECH_TRANSCRIPTION,
];

/// Build the DAG and the flow-scoped job payload for `task`. The payload
/// is validated against its kind's schema first: "Invalid
/// input is terminal" — applied once up front rather than once per step,
/// since every step in a flow shares the same task payload).
pub fn build(task: &Task, config: &Config) -> Result<(FlowDefinition, FlowJob)> {
    match task.kind {
        TaskKind::Transcode => build_transcode(task, config),
        TaskKind::DetectLabels => build_detect_labels(task, config),
    }
}

fn step(name: &str, kind: StepKind, depends_on: &[&str], config: &Config) -> StepDefinition {
    StepDefinition {
        name: name.to_string(),
        kind,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        allow_partial_failure: false,
        retry: config.step_retry,
    }
}

/// Transcode flow: probe → thumbnail → sprite →
/// transcode → finalize, strictly linear, no partial failure allowed.
/// `transcode` (and the blob-store upload that follows it) are omitted
/// entirely when the payload disables transcoding, rather than scheduled
/// and then skipped.
fn build_transcode(task: &Task, config: &Config) -> Result<(FlowDefinition, FlowJob)> {
    validation::validate_transcode_payload(&task.payload)?;
    let payload: TranscodePayload = serde_json::from_value(task.payload.clone())?;

    let mut steps = vec![
        step(names::PROBE, StepKind::Probe, &[], config),
        step(names::THUMBNAIL, StepKind::Thumbnail, &[names::PROBE], config),
        step(names::SPRITE, StepKind::Sprite, &[names::THUMBNAIL], config),
    ];

    let finalize_parent = if payload.transcode.enabled {
        steps.push(step(names::TRANSCODE, StepKind::Transcode, &[names::SPRITE], config));
        steps.push(step(names::UPLOAD, StepKind::Upload, &[names::TRANSCODE], config));
        names::UPLOAD
    } else {
        names::SPRITE
    };
    steps.push(step(names::FINALIZE, StepKind::Finalize, &[finalize_parent], config));

    let definition = FlowDefinition { name: "transcode".to_string(), steps };
    Ok((definition, FlowJob::Transcode(payload)))
}

/// Whether `processor` runs for this task: the task payload's own
/// `enabled_processors` map overrides the corresponding `Config` flag
/// when it names the processor explicitly.
fn processor_enabled(processor: &str, payload: &DetectLabelsPayload, config: &Config) -> bool {
    payload.enabled_processors.get(processor).copied().unwrap_or_else(|| config.providers.default_for(processor))
}

/// Detect-labels flow: `upload-to-object-store` roots a
/// fan-out of enabled analysis children, each `allow_partial_failure`,
/// joined by a `normalize` node that waits on every one of them and does
/// not tolerate failure itself.
fn build_detect_labels(task: &Task, config: &Config) -> Result<(FlowDefinition, FlowJob)> {
    validation::validate_detect_labels_payload(&task.payload)?;
    let payload: DetectLabelsPayload = serde_json::from_value(task.payload.clone())?;

    let mut steps = vec![step(names::UPLOAD_TO_OBJECT_STORE, StepKind::UploadToObjectStore, &[], config)];

    let mut enabled_children = Vec::new();
    for processor in ANALYSIS_PROCESSORS {
        if !processor_enabled(processor, &payload, config) {
            continue;
        }
        let mut def = step(
            processor,
            StepKind::Analysis { provider: processor.to_string() },
            &[names::UPLOAD_TO_OBJECT_STORE],
            config,
        );
        def.allow_partial_failure = true;
        steps.push(def);
        enabled_children.push(*processor);
    }

    let normalize_deps: Vec<&str> = if enabled_children.is_empty() {
        vec![names::UPLOAD_TO_OBJECT_STORE]
    } else {
        enabled_children.clone()
    };
    steps.push(step(names::NORMALIZE, StepKind::Normalize, &normalize_deps, config));

    let definition = FlowDefinition { name: "detect-labels".to_string(), steps };
    Ok((definition, FlowJob::DetectLabels(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskKind;
    use std::collections::HashMap;

    fn transcode_task(enabled: bool) -> Task {
        Task::new(
            TaskKind::Transcode,
            serde_json::json!({
                "upload_id": "u1",
                "sprite": {"fps": 1.0, "cols": 5, "rows": 5, "tile_width": 160, "tile_height": 90},
                "thumbnail": {"timestamp": "midpoint", "width": 320, "height": 180},
                "transcode": {"enabled": enabled, "codec": "h264", "resolution": "720p"}
            }),
        )
    }

    fn detect_labels_task(enabled_processors: HashMap<String, bool>) -> Task {
        Task::new(
            TaskKind::DetectLabels,
            serde_json::json!({
                "media_id": "m1",
                "file_ref": "s3://bucket/m1.mp4",
                "workspace_ref": "ws1",
                "version": 1,
                "enabled_processors": enabled_processors
            }),
        )
    }

    #[test]
    fn transcode_flow_is_a_strict_linear_chain() {
        let (flow, _job) = build(&transcode_task(true), &Config::default()).unwrap();
        let names: Vec<&str> = flow.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["probe", "thumbnail", "sprite", "transcode", "upload", "finalize"]);
        assert!(flow.steps.iter().all(|s| !s.allow_partial_failure));
        assert_eq!(flow.step("thumbnail").unwrap().depends_on, vec!["probe"]);
        assert_eq!(flow.step("finalize").unwrap().depends_on, vec!["upload"]);
    }

    #[test]
    fn transcode_disabled_skips_transcode_and_upload() {
        let (flow, _job) = build(&transcode_task(false), &Config::default()).unwrap();
        let names: Vec<&str> = flow.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["probe", "thumbnail", "sprite", "finalize"]);
        assert_eq!(flow.step("finalize").unwrap().depends_on, vec!["sprite"]);
    }

    #[test]
    fn detect_labels_fans_out_enabled_processors_in_parallel() {
        let mut enabled = HashMap::new();
        enabled.insert("label-detection".to_string(), true);
        enabled.insert("object-tracking".to_string(), true);
        enabled.insert("face-detection".to_string(), false);
        enabled.insert("person-detection".to_string(), false);
        enabled.insert("speech-transcription".to_string(), true);

        let (flow, _job) = build(&detect_labels_task(enabled), &Config::default()).unwrap();
        let names: Vec<&str> = flow.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["upload-to-object-store", "label-detection", "object-tracking", "speech-transcription", "normalize"]);

        for child in ["label-detection", "object-tracking", "speech-transcription"] {
            let def = flow.step(child).unwrap();
            assert!(def.allow_partial_failure);
            assert_eq!(def.depends_on, vec!["upload-to-object-store"]);
        }

        let normalize = flow.step("normalize").unwrap();
        assert!(!normalize.allow_partial_failure);
        let mut deps = normalize.depends_on.clone();
        deps.sort();
        assert_eq!(deps, vec!["label-detection", "object-tracking", "speech-transcription"]);
    }

    #[test]
    fn invalid_transcode_payload_is_rejected_before_any_step_runs() {
        let task = Task::new(TaskKind::Transcode, serde_json::json!({"sprite": {}}));
        let err = build(&task, &Config::default()).unwrap_err();
        assert!(!err.is_retryable());
    }
}
