//! Sprite sheet: a grid of thumbnails sampled at a fixed
//! fps across the whole source, used for scrubbing previews.

use serde::{Deserialize, Serialize};

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::step::{FlowJob, StepContext};
use crate::services::media_tool::SpriteOpts;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteStepOutput {
    pub local_path: String,
    pub cols: u32,
    pub rows: u32,
}

pub async fn execute(ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::Transcode(payload) = &ctx.job else {
        return Err(EngineError::Internal("sprite step requires a transcode job".into()));
    };

    let local_path = deps.blob.resolve(&payload.upload_id).await?;
    let h = crate::hashing::short_config_hash(&serde_json::json!({
        "fps": payload.sprite.fps,
        "cols": payload.sprite.cols,
        "rows": payload.sprite.rows,
        "tile_width": payload.sprite.tile_width,
        "tile_height": payload.sprite.tile_height,
    }));
    let out_path = deps.blob.scratch_path(&format!("sprite_{}_{}.jpg", payload.upload_id, h)).await?;

    let opts = SpriteOpts {
        fps: payload.sprite.fps,
        cols: payload.sprite.cols,
        rows: payload.sprite.rows,
        tile_width: payload.sprite.tile_width,
        tile_height: payload.sprite.tile_height,
    };
    deps.media_tool.generate_sprite(&local_path, &out_path, &opts).await?;

    Ok(serde_json::to_value(SpriteStepOutput {
        local_path: out_path.to_string_lossy().into_owned(),
        cols: payload.sprite.cols,
        rows: payload.sprite.rows,
    })?)
}
