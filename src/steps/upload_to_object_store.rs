//! Upload-to-object-store: the detect-labels flow's root
//! step. Makes sure every analysis provider call downstream has a stable
//! object-store URI to work against, whether the task was handed one
//! directly or only a local file reference.

use serde::{Deserialize, Serialize};

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::step::{FlowJob, StepContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadToObjectStoreStepOutput {
    pub object_uri: String,
    pub uploaded: bool,
    pub already_existed: bool,
}

const OBJECT_STORE_SCHEMES: &[&str] = &["gs://", "s3://", "mem://"];

fn is_object_store_uri(s: &str) -> bool {
    OBJECT_STORE_SCHEMES.iter().any(|scheme| s.starts_with(scheme))
}

pub async fn execute(ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::DetectLabels(payload) = &ctx.job else {
        return Err(EngineError::Internal("upload-to-object-store step requires a detect-labels job".into()));
    };

    if is_object_store_uri(&payload.file_ref) {
        return Ok(serde_json::to_value(UploadToObjectStoreStepOutput {
            object_uri: payload.file_ref.clone(),
            uploaded: false,
            already_existed: true,
        })?);
    }

    let extension =
        std::path::Path::new(&payload.file_ref).extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    let remote_path = deps.config.media_path(&payload.media_id, &format!("source.{extension}"));

    if deps.blob.exists(&remote_path).await? {
        return Ok(serde_json::to_value(UploadToObjectStoreStepOutput {
            object_uri: deps.blob.uri_for(&remote_path),
            uploaded: false,
            already_existed: true,
        })?);
    }

    let object_uri = deps.blob.put(std::path::Path::new(&payload.file_ref), &remote_path).await?;
    Ok(serde_json::to_value(UploadToObjectStoreStepOutput { object_uri, uploaded: true, already_existed: false })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deps::fakes;
    use std::collections::HashMap;

    fn payload(file_ref: &str) -> crate::model::task::DetectLabelsPayload {
        crate::model::task::DetectLabelsPayload {
            media_id: "m1".into(),
            file_ref: file_ref.into(),
            workspace_ref: "ws1".into(),
            version: 1,
            enabled_processors: HashMap::new(),
            config: serde_json::json!({}),
        }
    }

    fn ctx(job: FlowJob) -> StepContext {
        StepContext { flow_run_id: uuid::Uuid::new_v4(), job, results: Default::default() }
    }

    #[tokio::test]
    async fn already_an_object_store_uri_is_returned_unchanged() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        let out = execute(&ctx(FlowJob::DetectLabels(payload("gs://bucket/m1.mp4"))), &deps).await.unwrap();
        let out: UploadToObjectStoreStepOutput = serde_json::from_value(out).unwrap();
        assert_eq!(out.object_uri, "gs://bucket/m1.mp4");
        assert!(!out.uploaded);
        assert!(out.already_existed);
    }

    #[tokio::test]
    async fn local_ref_uploads_once_then_reports_already_existed() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(tmp.path(), b"source-bytes").await.unwrap();
        let local = tmp.path().with_extension("mp4");
        tokio::fs::copy(tmp.path(), &local).await.unwrap();

        let p = payload(local.to_str().unwrap());
        let first = execute(&ctx(FlowJob::DetectLabels(p.clone())), &deps).await.unwrap();
        let first: UploadToObjectStoreStepOutput = serde_json::from_value(first).unwrap();
        assert!(first.uploaded);
        assert!(!first.already_existed);

        let second = execute(&ctx(FlowJob::DetectLabels(p)), &deps).await.unwrap();
        let second: UploadToObjectStoreStepOutput = serde_json::from_value(second).unwrap();
        assert!(!second.uploaded);
        assert!(second.already_existed);
        assert_eq!(first.object_uri, second.object_uri);

        let _ = tokio::fs::remove_file(&local).await;
    }
}
