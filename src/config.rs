//! Configuration: every tuning knob the engine exposes, loaded from an
//! optional YAML file with typed defaults for every field, plus `dotenvy`
//! for local secrets.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{EngineError, Result};
use crate::retry::RetryConfig;

fn default_task_retry() -> RetryConfig {
    RetryConfig { max_attempts: 3, base_delay_ms: 5_000, max_delay_ms: 300_000, jitter_factor: 0.1 }
}

fn default_step_retry() -> RetryConfig {
    RetryConfig { max_attempts: 3, base_delay_ms: 2_000, max_delay_ms: 60_000, jitter_factor: 0.1 }
}

/// Per-processor enable flags. A task's own `enabled_processors` payload map (if
/// it names a processor) always overrides the corresponding flag here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderFlags {
    pub label_detection: bool,
    pub object_tracking: bool,
    pub face_detection: bool,
    pub person_detection: bool,
    pub speech_transcription: bool,
}

impl Default for ProviderFlags {
    fn default() -> Self {
        Self {
            label_detection: true,
            object_tracking: true,
            face_detection: false,
            person_detection: false,
            speech_transcription: true,
        }
    }
}

impl ProviderFlags {
    pub fn default_for(&self, processor: &str) -> bool {
        match processor {
            "label-detection" => self.label_detection,
            "object-tracking" => self.object_tracking,
            "face-detection" => self.face_detection,
            "person-detection" => self.person_detection,
            "speech-transcription" => self.speech_transcription,
            _ => false,
        }
    }
}

/// Quality filters at normalization time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub track_clip_min_duration_s: f64,
    pub track_clip_min_confidence: f64,
    pub segment_clip_min_duration_s: f64,
    pub segment_clip_min_confidence: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            track_clip_min_duration_s: 0.5,
            track_clip_min_confidence: 0.5,
            segment_clip_min_duration_s: 5.0,
            segment_clip_min_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_ms: u64,
    pub max_task_batch: usize,
    pub scheduler_concurrency: usize,
    #[serde(rename = "task_retry")]
    pub task_retry: RetryConfig,
    #[serde(rename = "step_retry")]
    pub step_retry: RetryConfig,
    pub providers: ProviderFlags,
    pub quality: QualityThresholds,
    pub blob_bucket: String,
    pub media_path_template: String,
    pub processor_version: String,
    /// Open Question 2 (DESIGN.md): the legacy detect-labels
    /// normalize+store sub-path coexists with per-analysis persistence,
    /// off by default.
    pub legacy_normalize_enabled: bool,
    pub metadata_store_url: Option<String>,
    pub blob_store_region: Option<String>,
    pub analysis_provider_url: Option<String>,
    /// Arbitrary per-processor settings forwarded to `AnalysisProvider`
    /// calls (language codes, feature toggles beyond the enable flags).
    pub processor_settings: HashMap<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_task_batch: 10,
            scheduler_concurrency: num_cpus::get(),
            task_retry: default_task_retry(),
            step_retry: default_step_retry(),
            providers: ProviderFlags::default(),
            quality: QualityThresholds::default(),
            blob_bucket: "media".to_string(),
            media_path_template: "media/{mediaId}/{name}".to_string(),
            processor_version: "1.0.0".to_string(),
            legacy_normalize_enabled: false,
            metadata_store_url: None,
            blob_store_region: None,
            analysis_provider_url: None,
            processor_settings: HashMap::new(),
        }
    }
}

impl Config {
    /// Render the deterministic blob path template for a media render.
    pub fn media_path(&self, media_id: &str, name: &str) -> String {
        self.media_path_template.replace("{mediaId}", media_id).replace("{name}", name)
    }

    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `mediaflow.yaml` in cwd; return
    ///   defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(EngineError::terminal(format!("config file not found: {}", p.display())));
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("mediaflow.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| EngineError::terminal(format!("failed to parse config file: {e}")))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.poll_interval_ms, 5_000);
        assert_eq!(cfg.max_task_batch, 10);
        assert_eq!(cfg.task_retry.max_attempts, 3);
    }

    #[test]
    fn media_path_template_substitutes_placeholders() {
        let cfg = Config::default();
        assert_eq!(cfg.media_path("m1", "thumb.jpg"), "media/m1/thumb.jpg");
    }

    #[test]
    fn missing_explicit_config_path_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/mediaflow.yaml"))).unwrap_err();
        assert!(!err.is_retryable());
    }
}
