//! Payload validation: compiles a `jsonschema::JSONSchema` once and
//! validates a value against it. Used by the Flow Builder to reject a
//! malformed task payload before any step runs, rather than failing
//! partway through a flow.

use jsonschema::JSONSchema;
use std::sync::OnceLock;

use crate::errors::EngineError;

fn transcode_schema() -> &'static JSONSchema {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let raw = serde_json::json!({
            "type": "object",
            "required": ["upload_id", "sprite", "thumbnail", "transcode"],
            "properties": {
                "upload_id": { "type": "string", "minLength": 1 },
                "sprite": {
                    "type": "object",
                    "required": ["fps", "cols", "rows", "tile_width", "tile_height"]
                },
                "thumbnail": {
                    "type": "object",
                    "required": ["timestamp", "width", "height"]
                },
                "transcode": {
                    "type": "object",
                    "required": ["enabled", "codec", "resolution"]
                }
            }
        });
        JSONSchema::compile(&raw).expect("transcode schema is valid")
    })
}

fn detect_labels_schema() -> &'static JSONSchema {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let raw = serde_json::json!({
            "type": "object",
            "required": ["media_id", "file_ref", "workspace_ref", "version", "enabled_processors"],
            "properties": {
                "media_id": { "type": "string", "minLength": 1 },
                "file_ref": { "type": "string", "minLength": 1 },
                "workspace_ref": { "type": "string", "minLength": 1 },
                "version": { "type": "integer", "minimum": 1 },
                "enabled_processors": { "type": "object" }
            }
        });
        JSONSchema::compile(&raw).expect("detect-labels schema is valid")
    })
}

/// Validate a task payload against its kind's schema. Returns a
/// [`EngineError::Terminal`] listing every violation found, since a schema
/// mismatch can never be fixed by retrying.
pub fn validate_transcode_payload(payload: &serde_json::Value) -> Result<(), EngineError> {
    validate(transcode_schema(), payload)
}

pub fn validate_detect_labels_payload(payload: &serde_json::Value) -> Result<(), EngineError> {
    validate(detect_labels_schema(), payload)
}

fn validate(schema: &JSONSchema, payload: &serde_json::Value) -> Result<(), EngineError> {
    let result = schema.validate(payload);
    if let Err(errors) = result {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(EngineError::terminal(format!("payload validation failed: {}", messages.join("; "))));
    }
    Ok(())
}

/// Quality filter for one analysis clip: rejects a clip
/// with a non-finite or inverted time range, confidence outside `[0, 1]`,
/// or below its kind's duration/confidence threshold. `track_derived`
/// distinguishes the looser tracks-derived thresholds from the stricter
/// segment/shot-label thresholds.
pub fn passes_quality_filter(
    start: f64,
    end: f64,
    confidence: f64,
    track_derived: bool,
    quality: &crate::config::QualityThresholds,
) -> bool {
    if !start.is_finite() || !end.is_finite() || !confidence.is_finite() {
        return false;
    }
    if start < 0.0 || end <= start {
        return false;
    }
    if !(0.0..=1.0).contains(&confidence) {
        return false;
    }

    let duration = end - start;
    let (min_duration, min_confidence) = if track_derived {
        (quality.track_clip_min_duration_s, quality.track_clip_min_confidence)
    } else {
        (quality.segment_clip_min_duration_s, quality.segment_clip_min_confidence)
    };

    duration >= min_duration && confidence >= min_confidence
}

#[cfg(test)]
mod quality_tests {
    use super::*;
    use crate::config::QualityThresholds;

    fn quality() -> QualityThresholds {
        QualityThresholds::default()
    }

    #[test]
    fn track_derived_clip_at_threshold_passes() {
        assert!(passes_quality_filter(1.0, 1.5, 0.5, true, &quality()));
    }

    #[test]
    fn track_derived_clip_below_duration_threshold_fails() {
        assert!(!passes_quality_filter(1.0, 1.2, 0.9, true, &quality()));
    }

    #[test]
    fn segment_clip_needs_higher_confidence_and_duration() {
        assert!(!passes_quality_filter(1.0, 4.0, 0.8, false, &quality()));
        assert!(passes_quality_filter(1.0, 6.0, 0.8, false, &quality()));
    }

    #[test]
    fn rejects_inverted_or_nonfinite_range() {
        assert!(!passes_quality_filter(2.0, 1.0, 0.9, true, &quality()));
        assert!(!passes_quality_filter(0.0, f64::INFINITY, 0.9, true, &quality()));
    }

    #[test]
    fn rejects_confidence_outside_unit_range() {
        assert!(!passes_quality_filter(1.0, 2.0, 1.5, true, &quality()));
        assert!(!passes_quality_filter(1.0, 2.0, -0.1, true, &quality()));
    }
}
