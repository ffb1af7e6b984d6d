//! Upload-to-object-store: pushes the transcoded proxy to
//! the blob store at a deterministic, content-addressed path so a
//! resumed flow run never re-uploads a render a prior attempt already
//! placed. Only present in the transcode flow's DAG when the Transcode
//! step ran.

use serde::{Deserialize, Serialize};

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::step::{names, FlowJob, StepContext};
use crate::steps::{parent_output, transcode::TranscodeStepOutput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStepOutput {
    pub blob_ref: String,
    pub already_existed: bool,
}

pub async fn execute(ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::Transcode(payload) = &ctx.job else {
        return Err(EngineError::Internal("upload step requires a transcode job".into()));
    };

    let proxy: TranscodeStepOutput = parent_output(ctx, names::TRANSCODE)?;
    let extension = std::path::Path::new(&proxy.local_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    let remote_path = deps.config.media_path(&payload.upload_id, &format!("proxy.{extension}"));

    if deps.blob.exists(&remote_path).await? {
        return Ok(serde_json::to_value(UploadStepOutput {
            blob_ref: deps.blob.uri_for(&remote_path),
            already_existed: true,
        })?);
    }

    let blob_ref = deps.blob.put(std::path::Path::new(&proxy.local_path), &remote_path).await?;
    Ok(serde_json::to_value(UploadStepOutput { blob_ref, already_existed: false })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deps::fakes;
    use crate::model::task::{MidpointMarker, TranscodePayload};

    fn payload() -> TranscodePayload {
        TranscodePayload {
            upload_id: "u1".into(),
            sprite: crate::model::task::SpriteConfig { fps: 1.0, cols: 5, rows: 5, tile_width: 160, tile_height: 90 },
            thumbnail: crate::model::task::ThumbnailConfig {
                timestamp: crate::model::task::TimestampSpec::Midpoint(MidpointMarker::Midpoint),
                width: 320,
                height: 180,
            },
            transcode: crate::model::task::TranscodeConfig {
                enabled: true,
                codec: "h264".into(),
                resolution: crate::model::task::Resolution::R1080p,
                bitrate: None,
            },
        }
    }

    fn ctx_with_proxy(job: FlowJob, local_path: &str) -> StepContext {
        let mut results = std::collections::HashMap::new();
        results.insert(
            names::TRANSCODE.to_string(),
            serde_json::to_value(TranscodeStepOutput {
                local_path: local_path.to_string(),
                width: 1920,
                height: 1080,
                codec: "h264".into(),
            })
            .unwrap(),
        );
        StepContext { flow_run_id: uuid::Uuid::new_v4(), job, results }
    }

    #[tokio::test]
    async fn uploads_when_absent_then_skips_on_retry() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(tmp.path(), b"proxy-bytes").await.unwrap();
        let local = tmp.path().with_extension("mp4");
        tokio::fs::copy(tmp.path(), &local).await.unwrap();

        let p = payload();
        let ctx = ctx_with_proxy(FlowJob::Transcode(p), local.to_str().unwrap());

        let first = execute(&ctx, &deps).await.unwrap();
        let first: UploadStepOutput = serde_json::from_value(first).unwrap();
        assert!(!first.already_existed);

        let second = execute(&ctx, &deps).await.unwrap();
        let second: UploadStepOutput = serde_json::from_value(second).unwrap();
        assert!(second.already_existed);
        assert_eq!(first.blob_ref, second.blob_ref);

        let _ = tokio::fs::remove_file(&local).await;
    }
}
