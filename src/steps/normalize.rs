//! Normalize: the detect-labels flow's finalization node.
//! Rolls up whichever analysis children actually ran into a single
//! outcome summary, and — when the legacy sub-path is enabled — also
//! merges clips across processors into coarser per-second shot segments.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::hashing;
use crate::model::artifact::{AnalysisSummary, ClipRecord, EntityRecord};
use crate::model::step::{names, FlowJob, StepContext};
use crate::model::task::DetectLabelsPayload;
use crate::steps::analysis::{VideoAnalysisResponse, VIDEO_PROCESSOR_NAMES};
use crate::steps::optional_parent_output;
use crate::upsert::Upsertable;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectLabelsOutcome {
    pub processors: Vec<AnalysisSummary>,
    pub legacy_segments_merged: Option<u32>,
}

const ANALYSIS_STEP_NAMES: &[&str] = &[
    names::LABEL_DETECTION,
    names::OBJECT_TRACKING,
    names::FACE_DETECTION,
    names::PERSON_DETECTION,
    names::SPEECH_TRANSCRIPTION,
];

pub async fn execute(ctx: &StepContext, deps: &Deps) -> Result<serde_json::Value> {
    let FlowJob::DetectLabels(payload) = &ctx.job else {
        return Err(EngineError::Internal("normalize step requires a detect-labels job".into()));
    };

    let mut processors = Vec::new();
    for name in ANALYSIS_STEP_NAMES {
        if let Some(summary) = optional_parent_output::<AnalysisSummary>(ctx, name)? {
            processors.push(summary);
        }
    }

    let legacy_segments_merged = if deps.config.legacy_normalize_enabled {
        Some(legacy_merge_segments(payload, deps).await?)
    } else {
        None
    };

    Ok(serde_json::to_value(DetectLabelsOutcome { processors, legacy_segments_merged })?)
}

/// One coarse "shot" bucket: every clip whose `(label_type, floor(start),
/// floor(end))` match collapses into the highest-confidence observation
/// seen across every processor, per `hashing::segment_hash`'s coarser key.
async fn legacy_merge_segments(payload: &DetectLabelsPayload, deps: &Deps) -> Result<u32> {
    let processor_version = deps.config.processor_version.clone();
    let mut buckets: HashMap<String, (String, f64, f64, f64)> = HashMap::new();

    for provider in VIDEO_PROCESSOR_NAMES {
        let cache_key = CacheKey { media_id: payload.media_id.clone(), version: payload.version, provider: provider.to_string() };
        let Some(response) = deps.cache.get(&cache_key, &processor_version).await? else { continue };
        let Ok(parsed) = serde_json::from_value::<VideoAnalysisResponse>(response) else { continue };

        for entity in parsed.entities {
            for clip in entity.clips {
                let key = hashing::segment_hash(&payload.workspace_ref, &payload.media_id, &entity.label_type, clip.start, clip.end);
                let bucket = buckets.entry(key).or_insert((entity.label_type.clone(), clip.start.floor(), clip.end.floor(), 0.0));
                bucket.3 = bucket.3.max(clip.confidence);
            }
        }
    }

    if buckets.is_empty() {
        return Ok(0);
    }

    let segment_entity = EntityRecord {
        id: None,
        workspace: payload.workspace_ref.clone(),
        label_type: "segment".to_string(),
        canonical_name: "segment".to_string(),
        provider: "legacy-normalize".to_string(),
        metadata: serde_json::json!({}),
    };
    let entity_result = crate::upsert::upsert(deps.entity_store.as_ref(), segment_entity).await?;

    // Skip-if-present rather than update-in-place: `MetadataStore::update`
    // re-keys by `Upsertable::dedup_key` (the fine-grained `clip_hash`),
    // which would silently move a record written under this segment's
    // coarser hash. First observation of a given segment wins.
    let mut merged = 0u32;
    for (key, (label_type, start, end, confidence)) in buckets {
        if deps.clip_store.find_by_dedup_key(ClipRecord::kind(), &key).await?.is_some() {
            continue;
        }
        let record = ClipRecord {
            id: None,
            media_id: payload.media_id.clone(),
            entity_id: entity_result.id,
            label_type,
            label: "segment".to_string(),
            start,
            end,
            version: payload.version,
            confidence,
        };
        deps.clip_store.create(ClipRecord::kind(), &key, &record).await?;
        merged += 1;
    }
    Ok(merged)
}
