//! Derived artifacts: the records analysis steps
//! upsert into the metadata store, and the media/render records the
//! transcode flow produces.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hashing;
use crate::upsert::Upsertable;

/// A detected entity (person, object, logo, ...), deduplicated within a
/// workspace/label-type/provider scope regardless of how many clips
/// reference it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub id: Option<Uuid>,
    pub workspace: String,
    pub label_type: String,
    pub canonical_name: String,
    pub provider: String,
    pub metadata: serde_json::Value,
}

impl Upsertable for EntityRecord {
    fn dedup_key(&self) -> String {
        hashing::entity_hash(&self.workspace, &self.label_type, &self.canonical_name, &self.provider)
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    fn kind() -> &'static str {
        "entity"
    }
}

/// A time-bounded occurrence of an entity within a media item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipRecord {
    pub id: Option<Uuid>,
    pub media_id: String,
    pub entity_id: Uuid,
    pub label_type: String,
    pub label: String,
    pub start: f64,
    pub end: f64,
    pub version: u32,
    pub confidence: f64,
}

impl Upsertable for ClipRecord {
    fn dedup_key(&self) -> String {
        hashing::clip_hash(&self.media_id, &self.label_type, &self.label, self.start, self.end, self.version)
    }

    fn content_eq(&self, other: &Self) -> bool {
        (self.confidence - other.confidence).abs() < f64::EPSILON && self.entity_id == other.entity_id
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    fn kind() -> &'static str {
        "clip"
    }
}

/// A processor's derived track (e.g. a speaker-diarization track, a
/// scene-segmentation track) for one media item at one processor version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackRecord {
    pub id: Option<Uuid>,
    pub media_id: String,
    pub track_id: String,
    pub version: u32,
    pub processor: String,
    pub data: serde_json::Value,
}

impl Upsertable for TrackRecord {
    fn dedup_key(&self) -> String {
        hashing::track_hash(&self.media_id, &self.track_id, self.version, &self.processor)
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    fn kind() -> &'static str {
        "track"
    }
}

/// Per-processor roll-up the Partial-Success Aggregator emits to the
/// flow's final result summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub processor: String,
    pub succeeded: bool,
    /// Whether this result was served from the Artifact Cache rather
    /// than calling the provider.
    pub cache_hit: bool,
    pub entities_upserted: u32,
    pub clips_upserted: u32,
    pub tracks_upserted: u32,
    pub error: Option<String>,
}

/// A render the transcode flow hands off to the blob store and records
/// against the media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderArtifact {
    pub kind: RenderKind,
    pub blob_ref: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    Thumbnail,
    Sprite,
    Video,
}
