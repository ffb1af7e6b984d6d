//! Thumbnail: a single still frame pulled from the probed
//! source, at either a literal timestamp or the clip's midpoint.

use serde::{Deserialize, Serialize};

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::media::ProbeOutput;
use crate::model::step::{names, FlowJob, StepContext};
use crate::services::media_tool::ThumbnailOpts;
use crate::steps::parent_output;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailStepOutput {
    pub local_path: String,
    pub width: u32,
    pub height: u32,
}

/// Resolve a `TimestampSpec` against the probed duration: `t` is either
/// the literal offset or `duration / 2` for midpoint, then clamped to
/// `[0, duration - 1]` so a config value at or past the end of a short
/// clip doesn't hand ffmpeg a seek past (or right at) EOF.
fn resolve_timestamp(spec: &crate::model::task::TimestampSpec, duration: f64) -> f64 {
    let t = match spec {
        crate::model::task::TimestampSpec::Literal(t) => *t,
        crate::model::task::TimestampSpec::Midpoint(_) => duration / 2.0,
    };
    t.max(0.0).min(duration - 1.0)
}

pub async fn execute(ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::Transcode(payload) = &ctx.job else {
        return Err(EngineError::Internal("thumbnail step requires a transcode job".into()));
    };

    let probe: ProbeOutput = parent_output::<crate::steps::probe::ProbeStepOutput>(ctx, names::PROBE)?.probe;
    let local_path = deps.blob.resolve(&payload.upload_id).await?;

    let timestamp_s = resolve_timestamp(&payload.thumbnail.timestamp, probe.duration);
    let h = crate::hashing::short_config_hash(&serde_json::json!({
        "timestamp": payload.thumbnail.timestamp,
        "width": payload.thumbnail.width,
        "height": payload.thumbnail.height,
    }));
    let out_path = deps.blob.scratch_path(&format!("thumbnail_{}_{}.jpg", payload.upload_id, h)).await?;

    let opts = ThumbnailOpts { timestamp_s, width: payload.thumbnail.width, height: payload.thumbnail.height };
    deps.media_tool.generate_thumbnail(&local_path, &out_path, &opts).await?;

    Ok(serde_json::to_value(ThumbnailStepOutput {
        local_path: out_path.to_string_lossy().into_owned(),
        width: payload.thumbnail.width,
        height: payload.thumbnail.height,
    })?)
}
