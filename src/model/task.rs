//! Task: the externally-created unit of work the Controller
//! drains from the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::step::StepState;

/// The set of flow kinds this engine knows how to build and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Transcode,
    DetectLabels,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Transcode => write!(f, "transcode"),
            TaskKind::DetectLabels => write!(f, "detect-labels"),
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// A Task as owned by the metadata store. The Controller is the only
/// writer of `status`, `attempts`, `progress`, and `last_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub attempts: u32,
    pub priority: i32,
    /// Opaque, kind-specific payload (e.g. `TranscodePayload`/`DetectLabelsPayload`
    /// serialized to JSON at the storage boundary).
    pub payload: serde_json::Value,
    pub progress: u8,
    pub last_error: Option<String>,
    /// The prior attempt's terminal `FlowRun.steps` map, persisted on
    /// requeue so the next attempt's scheduler can skip steps already
    /// `Succeeded` (§3 FlowJob: "Persisted back to the job queue's
    /// parent-job record so retries can skip completed children"). `None`
    /// for a task that has never been attempted.
    #[serde(default)]
    pub flow_results: Option<HashMap<String, StepState>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: TaskStatus::Queued,
            attempts: 0,
            priority: 0,
            payload,
            progress: 0,
            last_error: None,
            flow_results: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Transcode flow payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodePayload {
    pub upload_id: String,
    pub sprite: SpriteConfig,
    pub thumbnail: ThumbnailConfig,
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Either a literal seconds offset or the string `"midpoint"`.
    pub timestamp: TimestampSpec,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampSpec {
    Literal(f64),
    Midpoint(MidpointMarker),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MidpointMarker {
    Midpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteConfig {
    pub fps: f64,
    pub cols: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
    Original,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    pub enabled: bool,
    pub codec: String,
    pub resolution: Resolution,
    #[serde(default)]
    pub bitrate: Option<u32>,
}

/// Detect-labels flow payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectLabelsPayload {
    pub media_id: String,
    pub file_ref: String,
    pub workspace_ref: String,
    pub version: u32,
    pub enabled_processors: HashMap<String, bool>,
    #[serde(default)]
    pub config: serde_json::Value,
}
