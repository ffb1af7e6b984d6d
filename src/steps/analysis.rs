//! Analysis: the five analysis-provider step kinds share one
//! executor, parameterized by `provider` name. Checks the Artifact Cache
//! before calling out, normalizes the provider's response into
//! Entity/Track/Clip records (applying the quality filter), and upserts
//! them in entity -> track -> clip order so every clip's entity
//! reference always resolves to an already-committed row.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, CacheKey};
use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::artifact::{AnalysisSummary, ClipRecord, EntityRecord, TrackRecord};
use crate::model::step::{names, FlowJob, StepContext};
use crate::model::task::DetectLabelsPayload;
use crate::steps::parent_output;
use crate::steps::upload_to_object_store::UploadToObjectStoreStepOutput;
use crate::upsert;
use crate::validation::passes_quality_filter;

const VIDEO_PROCESSORS: &[&str] = &["label-detection", "object-tracking", "face-detection", "person-detection"];

fn feature_name(processor: &str) -> &'static str {
    match processor {
        "label-detection" => "LABEL_DETECTION",
        "object-tracking" => "OBJECT_TRACKING",
        "face-detection" => "FACE_DETECTION",
        "person-detection" => "PERSON_DETECTION",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawClip {
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawEntity {
    pub canonical_name: String,
    pub label_type: String,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub clips: Vec<RawClip>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct VideoAnalysisResponse {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
}

pub(crate) const VIDEO_PROCESSOR_NAMES: &[&str] = VIDEO_PROCESSORS;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSegment {
    text: String,
    start: f64,
    end: f64,
    confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TranscriptionResponse {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

pub async fn execute(provider: &str, ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::DetectLabels(payload) = &ctx.job else {
        return Err(EngineError::Internal("analysis step requires a detect-labels job".into()));
    };

    let cache_key = CacheKey { media_id: payload.media_id.clone(), version: payload.version, provider: provider.to_string() };
    let processor_version = deps.config.processor_version.clone();

    let cached = deps.cache.get(&cache_key, &processor_version).await?;
    let cache_hit = cached.is_some();
    let response = match cached {
        Some(value) => value,
        None => {
            let object_uri: UploadToObjectStoreStepOutput = parent_output(ctx, names::UPLOAD_TO_OBJECT_STORE)?;
            let fetched = fetch(provider, payload, &object_uri.object_uri, deps).await?;
            deps.cache
                .put(cache_key, CacheEntry { processor_version: processor_version.clone(), output: fetched.clone() })
                .await?;
            fetched
        }
    };

    let summary = if VIDEO_PROCESSORS.contains(&provider) {
        normalize_video(payload, provider, &response, cache_hit, deps).await?
    } else if provider == "speech-transcription" {
        normalize_speech(payload, provider, &response, cache_hit, deps).await?
    } else {
        return Err(EngineError::terminal(format!("unknown analysis provider '{provider}'")));
    };

    Ok(serde_json::to_value(summary)?)
}

async fn fetch(provider: &str, payload: &DetectLabelsPayload, object_uri: &str, deps: &Deps) -> Result<serde_json::Value> {
    if provider == "speech-transcription" {
        let options = payload.config.get(provider).cloned().unwrap_or_else(|| serde_json::json!({}));
        deps.analysis.transcribe_audio(object_uri, &options).await
    } else {
        let features = vec![feature_name(provider).to_string()];
        deps.analysis.analyze_video(object_uri, &features).await
    }
}

async fn normalize_video(
    payload: &DetectLabelsPayload,
    provider: &str,
    response: &serde_json::Value,
    cache_hit: bool,
    deps: &Deps,
) -> Result<AnalysisSummary> {
    let parsed: VideoAnalysisResponse = serde_json::from_value(response.clone())
        .map_err(|e| EngineError::terminal(format!("malformed {provider} response: {e}")))?;

    let mut entities_upserted = 0u32;
    let mut tracks_upserted = 0u32;
    let mut clips_upserted = 0u32;

    for raw in &parsed.entities {
        let entity = EntityRecord {
            id: None,
            workspace: payload.workspace_ref.clone(),
            label_type: raw.label_type.clone(),
            canonical_name: raw.canonical_name.clone(),
            provider: provider.to_string(),
            metadata: serde_json::json!({}),
        };
        let entity_result = upsert::upsert(deps.entity_store.as_ref(), entity).await?;
        entities_upserted += 1;

        if let Some(track_id) = &raw.track_id {
            let track = TrackRecord {
                id: None,
                media_id: payload.media_id.clone(),
                track_id: track_id.clone(),
                version: payload.version,
                processor: provider.to_string(),
                data: serde_json::json!({"entity": raw.canonical_name}),
            };
            upsert::upsert(deps.track_store.as_ref(), track).await?;
            tracks_upserted += 1;
        }

        let track_derived = raw.track_id.is_some();
        for clip in &raw.clips {
            if !passes_quality_filter(clip.start, clip.end, clip.confidence, track_derived, &deps.config.quality) {
                continue;
            }
            let record = ClipRecord {
                id: None,
                media_id: payload.media_id.clone(),
                entity_id: entity_result.id,
                label_type: raw.label_type.clone(),
                label: raw.canonical_name.clone(),
                start: clip.start,
                end: clip.end,
                version: payload.version,
                confidence: clip.confidence,
            };
            upsert::upsert(deps.clip_store.as_ref(), record).await?;
            clips_upserted += 1;
        }
    }

    Ok(AnalysisSummary {
        processor: provider.to_string(),
        succeeded: true,
        cache_hit,
        entities_upserted,
        clips_upserted,
        tracks_upserted,
        error: None,
    })
}

/// Speech transcription has no notion of a detected "entity" distinct
/// from the transcript itself, so every segment hangs off one shared
/// `transcript` entity per workspace+provider.
async fn normalize_speech(
    payload: &DetectLabelsPayload,
    provider: &str,
    response: &serde_json::Value,
    cache_hit: bool,
    deps: &Deps,
) -> Result<AnalysisSummary> {
    let parsed: TranscriptionResponse = serde_json::from_value(response.clone())
        .map_err(|e| EngineError::terminal(format!("malformed {provider} response: {e}")))?;

    let entity = EntityRecord {
        id: None,
        workspace: payload.workspace_ref.clone(),
        label_type: "transcript".to_string(),
        canonical_name: "transcript".to_string(),
        provider: provider.to_string(),
        metadata: serde_json::json!({}),
    };
    let entity_result = upsert::upsert(deps.entity_store.as_ref(), entity).await?;

    let mut clips_upserted = 0u32;
    for segment in &parsed.segments {
        if !passes_quality_filter(segment.start, segment.end, segment.confidence, false, &deps.config.quality) {
            continue;
        }
        let record = ClipRecord {
            id: None,
            media_id: payload.media_id.clone(),
            entity_id: entity_result.id,
            label_type: "transcript".to_string(),
            label: segment.text.clone(),
            start: segment.start,
            end: segment.end,
            version: payload.version,
            confidence: segment.confidence,
        };
        upsert::upsert(deps.clip_store.as_ref(), record).await?;
        clips_upserted += 1;
    }

    Ok(AnalysisSummary {
        processor: provider.to_string(),
        succeeded: true,
        cache_hit,
        entities_upserted: 1,
        clips_upserted,
        tracks_upserted: 0,
        error: None,
    })
}
