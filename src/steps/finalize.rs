//! Finalize: the transcode flow's terminal step. Registers
//! one blob record per render the upstream steps produced, threads the
//! resulting attachment ids onto the Media record, and cleans up the
//! local scratch files those steps wrote.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::media::{Media, ProbeOutput};
use crate::model::step::{names, FlowJob, StepContext};
use crate::steps::sprite::SpriteStepOutput;
use crate::steps::thumbnail::ThumbnailStepOutput;
use crate::steps::transcode::TranscodeStepOutput;
use crate::steps::upload::UploadStepOutput;
use crate::steps::{optional_parent_output, parent_output};
use crate::upsert::{self, Upsertable};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeStepOutput {
    pub media_id: String,
    pub thumbnail_file_id: Option<Uuid>,
    pub sprite_file_id: Option<Uuid>,
    pub proxy_file_id: Option<Uuid>,
    pub processor_version: String,
    pub probe: ProbeOutput,
}

pub async fn execute(ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::Transcode(payload) = &ctx.job else {
        return Err(EngineError::Internal("finalize step requires a transcode job".into()));
    };

    let thumbnail: ThumbnailStepOutput = parent_output(ctx, names::THUMBNAIL)?;
    let sprite: SpriteStepOutput = parent_output(ctx, names::SPRITE)?;
    let transcode: Option<TranscodeStepOutput> = optional_parent_output(ctx, names::TRANSCODE)?;
    let upload: Option<UploadStepOutput> = optional_parent_output(ctx, names::UPLOAD)?;
    let probe: ProbeOutput = parent_output::<crate::steps::probe::ProbeStepOutput>(ctx, names::PROBE)?.probe;

    let existing = deps.media_store.find_by_dedup_key(Media::kind(), &payload.upload_id).await?;
    let want_proxy = transcode.is_some();

    // A prior attempt that already attached every render this run wants
    // reuses those ids instead of calling `attach` again.
    let reuse = existing.as_ref().is_some_and(|m| m.has_all_refs(true, true, want_proxy));

    let (thumbnail_file_id, sprite_file_id, proxy_file_id) = if reuse {
        let m = existing.as_ref().unwrap();
        (m.thumbnail_file_id, m.sprite_file_id, m.proxy_file_id)
    } else {
        let thumbnail_id = deps
            .files
            .attach(
                std::path::Path::new(&thumbnail.local_path),
                serde_json::json!({"kind": "thumbnail", "width": thumbnail.width, "height": thumbnail.height}),
            )
            .await?;
        let sprite_id = deps
            .files
            .attach(
                std::path::Path::new(&sprite.local_path),
                serde_json::json!({"kind": "sprite", "cols": sprite.cols, "rows": sprite.rows}),
            )
            .await?;
        let proxy_id = match (&transcode, &upload) {
            (Some(t), Some(u)) => Some(
                deps.files
                    .attach(
                        std::path::Path::new(&t.local_path),
                        serde_json::json!({"kind": "proxy", "codec": t.codec, "blob_ref": u.blob_ref}),
                    )
                    .await?,
            ),
            (Some(_), None) => {
                return Err(EngineError::Internal("transcode ran but upload output is missing".into()));
            }
            (None, _) => None,
        };
        (Some(thumbnail_id), Some(sprite_id), proxy_id)
    };

    let media = Media {
        thumbnail_file_id,
        sprite_file_id,
        proxy_file_id,
        processor_version: Some(deps.config.processor_version.clone()),
        ..existing.ok_or_else(|| EngineError::Internal("finalize ran before probe created a Media record".into()))?
    };
    let result = upsert::upsert(deps.media_store.as_ref(), media).await?;

    if !reuse {
        deps.blob.unlink(std::path::Path::new(&thumbnail.local_path)).await?;
        deps.blob.unlink(std::path::Path::new(&sprite.local_path)).await?;
        if let Some(t) = &transcode {
            deps.blob.unlink(std::path::Path::new(&t.local_path)).await?;
        }
    }

    Ok(serde_json::to_value(FinalizeStepOutput {
        media_id: result.id.to_string(),
        thumbnail_file_id,
        sprite_file_id,
        proxy_file_id,
        processor_version: deps.config.processor_version.clone(),
        probe,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deps::fakes;
    use crate::model::media::ProbeOutput;
    use crate::model::task::{MidpointMarker, TranscodePayload};
    use std::collections::HashMap;

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
                enabled: false,
                codec: "h264".into(),
                resolution: crate::model::task::Resolution::R1080p,
                bitrate: None,
            },
        }
    }

    async fn seed_media(deps: &Deps, upload_id: &str) {
        let probe = ProbeOutput {
            duration: 10.0,
            width: 100,
            height: 50,
            codec: "h264".into(),
            fps: 30.0,
            bitrate: None,
            format: None,
            size: None,
            has_audio: None,
        };
        upsert::upsert(deps.media_store.as_ref(), Media::from_probe(upload_id, &probe)).await.unwrap();
    }

    fn probe_output() -> ProbeOutput {
        ProbeOutput {
            duration: 10.0,
            width: 100,
            height: 50,
            codec: "h264".into(),
            fps: 30.0,
            bitrate: None,
            format: None,
            size: None,
            has_audio: None,
        }
    }

    fn ctx_without_transcode(job: FlowJob) -> StepContext {
        let mut results = HashMap::new();
        results.insert(
            names::THUMBNAIL.to_string(),
            serde_json::to_value(ThumbnailStepOutput { local_path: "/tmp/thumb.jpg".into(), width: 320, height: 180 })
                .unwrap(),
        );
        results.insert(
            names::SPRITE.to_string(),
            serde_json::to_value(SpriteStepOutput { local_path: "/tmp/sprite.jpg".into(), cols: 5, rows: 5 }).unwrap(),
        );
        results.insert(
            names::PROBE.to_string(),
            serde_json::to_value(crate::steps::probe::ProbeStepOutput { probe: probe_output(), media_id: "m1".into() })
                .unwrap(),
        );
        StepContext { flow_run_id: uuid::Uuid::new_v4(), job, results }
    }

    #[tokio::test]
    async fn attaches_renders_and_updates_media() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        seed_media(&deps, "u1").await;
        let ctx = ctx_without_transcode(FlowJob::Transcode(payload()));

        let out = execute(&ctx, &deps).await.unwrap();
        let out: FinalizeStepOutput = serde_json::from_value(out).unwrap();
        assert!(out.thumbnail_file_id.is_some());
        assert!(out.sprite_file_id.is_some());
        assert!(out.proxy_file_id.is_none());

        let media = deps.media_store.find_by_dedup_key(Media::kind(), "u1").await.unwrap().unwrap();
        assert_eq!(media.thumbnail_file_id, out.thumbnail_file_id);
    }

    #[tokio::test]
    async fn retry_reuses_existing_attachment_ids() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        seed_media(&deps, "u1").await;
        let ctx = ctx_without_transcode(FlowJob::Transcode(payload()));

        let first = execute(&ctx, &deps).await.unwrap();
        let first: FinalizeStepOutput = serde_json::from_value(first).unwrap();
        let second = execute(&ctx, &deps).await.unwrap();
        let second: FinalizeStepOutput = serde_json::from_value(second).unwrap();

        assert_eq!(first.thumbnail_file_id, second.thumbnail_file_id);
        assert_eq!(first.sprite_file_id, second.sprite_file_id);
    }
}
