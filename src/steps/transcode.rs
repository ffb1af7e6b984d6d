//! Transcode: renders a proxy at a fixed resolution/codec.
//! Only present in a flow's DAG when `payload.transcode.enabled`.

use serde::{Deserialize, Serialize};

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::media::ProbeOutput;
use crate::model::step::{names, FlowJob, StepContext};
use crate::model::task::Resolution;
use crate::services::media_tool::{ProgressSink, TranscodeOpts};
use crate::steps::parent_output;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeStepOutput {
    pub local_path: String,
    pub width: u32,
    pub height: u32,
    pub codec: String,
}

const KNOWN_CODECS: &[&str] = &["h264", "h265", "hevc", "vp9", "av1"];

/// Resolve the target frame dimensions for `resolution`, falling back to
/// the probed source dimensions for `Original`.
fn target_dimensions(resolution: Resolution, probe: &ProbeOutput) -> (u32, u32) {
    match resolution {
        Resolution::R720p => (1280, 720),
        Resolution::R1080p => (1920, 1080),
        Resolution::Original => (probe.width, probe.height),
    }
}

pub async fn execute(ctx: &StepContext, deps: &Deps, progress: ProgressSink) -> Result<serde_json::Value> {
    let FlowJob::Transcode(payload) = &ctx.job else {
        return Err(EngineError::Internal("transcode step requires a transcode job".into()));
    };
    if !payload.transcode.enabled {
        return Err(EngineError::Internal("transcode step dispatched but disabled in payload".into()));
    }

    let codec = payload.transcode.codec.to_lowercase();
    if !KNOWN_CODECS.contains(&codec.as_str()) {
        return Err(EngineError::terminal(format!("unknown transcode codec '{}'", payload.transcode.codec)));
    }

    let probe: ProbeOutput = parent_output::<crate::steps::probe::ProbeStepOutput>(ctx, names::PROBE)?.probe;
    let (width, height) = target_dimensions(payload.transcode.resolution, &probe);

    let local_path = deps.blob.resolve(&payload.upload_id).await?;
    let dir = deps.blob.temp_dir("transcode").await?;
    let out_path = dir.join(format!("proxy.{}", if codec == "vp9" { "webm" } else { "mp4" }));

    let opts = TranscodeOpts { codec, width, height, bitrate: payload.transcode.bitrate, duration_s: probe.duration };
    deps.media_tool.transcode(&local_path, &out_path, &opts, progress).await?;

    Ok(serde_json::to_value(TranscodeStepOutput {
        local_path: out_path.to_string_lossy().into_owned(),
        width,
        height,
        codec: payload.transcode.codec.clone(),
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deps::fakes;
    use crate::model::task::{MidpointMarker, TranscodePayload};

    fn payload(resolution: Resolution, codec: &str) -> TranscodePayload {
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
                codec: codec.to_string(),
                resolution,
                bitrate: None,
            },
        }
    }

    fn probe_output() -> ProbeOutput {
        ProbeOutput {
            duration: 100.0,
            width: 3840,
            height: 2160,
            codec: "h264".into(),
            fps: 30.0,
            bitrate: None,
            format: None,
            size: None,
            has_audio: Some(true),
        }
    }

    fn ctx_with_probe(job: FlowJob, probe: ProbeOutput) -> StepContext {
        let mut results = std::collections::HashMap::new();
        results.insert(
            names::PROBE.to_string(),
            serde_json::to_value(crate::steps::probe::ProbeStepOutput { probe, media_id: "m1".into() }).unwrap(),
        );
        StepContext { flow_run_id: uuid::Uuid::new_v4(), job, results }
    }

    #[tokio::test]
    async fn resolution_720p_maps_to_fixed_dimensions() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        let p = payload(Resolution::R720p, "h264");
        let ctx = ctx_with_probe(FlowJob::Transcode(p), probe_output());
        let out = execute(&ctx, &deps, ProgressSink::noop()).await.unwrap();
        let out: TranscodeStepOutput = serde_json::from_value(out).unwrap();
        assert_eq!((out.width, out.height), (1280, 720));
    }

    #[tokio::test]
    async fn resolution_original_keeps_probed_dimensions() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        let p = payload(Resolution::Original, "h264");
        let ctx = ctx_with_probe(FlowJob::Transcode(p), probe_output());
        let out = execute(&ctx, &deps, ProgressSink::noop()).await.unwrap();
        let out: TranscodeStepOutput = serde_json::from_value(out).unwrap();
        assert_eq!((out.width, out.height), (3840, 2160));
    }

    #[tokio::test]
    async fn unknown_codec_is_terminal() {
        let (deps, _handles) = fakes::in_memory_with_handles(Config::default());
        let p = payload(Resolution::R1080p, "xvid");
        let ctx = ctx_with_probe(FlowJob::Transcode(p), probe_output());
        let err = execute(&ctx, &deps, ProgressSink::noop()).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
