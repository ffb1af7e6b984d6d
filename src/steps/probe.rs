//! Probe: the transcode flow's entry point — resolves the
//! uploaded source to a local path, inspects it with the media tool, and
//! upserts the Media record the rest of the flow builds on.

use serde::{Deserialize, Serialize};

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::media::{Media, ProbeOutput};
use crate::model::step::{FlowJob, StepContext};
use crate::upsert::{self, Upsertable};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeStepOutput {
    pub probe: ProbeOutput,
    pub media_id: String,
}

pub async fn execute(ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::Transcode(payload) = &ctx.job else {
        return Err(EngineError::Internal("probe step requires a transcode job".into()));
    };

    let local_path = deps.blob.resolve(&payload.upload_id).await?;
    let probe = deps.media_tool.probe(&local_path).await?;

    if probe.width == 0 || probe.height == 0 {
        return Err(EngineError::terminal("probe reported no video stream"));
    }
    if !probe.duration.is_finite() || probe.duration < 0.0 {
        return Err(EngineError::terminal(format!("probe reported an invalid duration: {}", probe.duration)));
    }

    // Preserve any render references a prior attempt's Finalize already
    // wrote.
    let existing = deps.media_store.find_by_dedup_key(Media::kind(), &payload.upload_id).await?;
    let media = match existing {
        Some(existing) => Media {
            duration: probe.duration,
            width: probe.width,
            height: probe.height,
            codec: probe.codec.clone(),
            fps: probe.fps,
            ..existing
        },
        None => Media::from_probe(payload.upload_id.clone(), &probe),
    };

    let result = upsert::upsert(deps.media_store.as_ref(), media).await?;

    Ok(serde_json::to_value(ProbeStepOutput { probe, media_id: result.id.to_string() })?)
}
