//! Hashing: deterministic identifiers for cache keys, entity
//! dedup keys, and track/clip dedup keys.
//!
//! Every function below documents its canonical field order. That order
//! must never change for a given artifact kind — changing it orphans every
//! existing artifact of that kind (they become unreachable for upsert).

use sha2::{Digest, Sha256};

/// Field separator. Callers must not let any field contain this byte; all
/// fields here are either pre-normalized identifiers/enums or numbers
/// formatted with a fixed number of decimals, so this holds in practice.
const SEP: &str = "\u{1}";

fn digest(parts: &[&str]) -> String {
    let joined = parts.join(SEP);
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase + trim, used for any human-entered name/label field before
/// hashing so that whitespace and casing differences collapse to the same
/// dedup key.
pub fn normalize_name(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Entity dedup hash: `workspace | labelType | lower(trim(canonicalName)) | provider`.
pub fn entity_hash(workspace: &str, label_type: &str, canonical_name: &str, provider: &str) -> String {
    let name = normalize_name(canonical_name);
    digest(&[workspace, label_type, &name, provider])
}

/// Analysis-clip dedup hash:
/// `mediaId | labelType | lower(trim(label)) | start.toFixed(3) | end.toFixed(3) | version`.
pub fn clip_hash(media_id: &str, label_type: &str, label: &str, start: f64, end: f64, version: u32) -> String {
    let name = normalize_name(label);
    let start_s = format!("{:.3}", start);
    let end_s = format!("{:.3}", end);
    let version_s = version.to_string();
    digest(&[media_id, label_type, &name, &start_s, &end_s, &version_s])
}

/// Coarser segment/shot dedup hash: `workspace | mediaId | labelType | floor(start) | floor(end)`.
pub fn segment_hash(workspace: &str, media_id: &str, label_type: &str, start: f64, end: f64) -> String {
    let start_s = start.floor().to_string();
    let end_s = end.floor().to_string();
    digest(&[workspace, media_id, label_type, &start_s, &end_s])
}

/// Track dedup hash: `mediaId | trackId | version | processor`.
pub fn track_hash(media_id: &str, track_id: &str, version: u32, processor: &str) -> String {
    let version_s = version.to_string();
    digest(&[media_id, track_id, &version_s, processor])
}

/// Generic content hash for anything JSON-serializable (cache entries,
/// step output fingerprints). Canonicalizes key order via
/// `serde_json::Value`'s `BTreeMap`-backed object representation being
/// unavailable by default, so we re-serialize through a sorted map.
pub fn content_hash(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short fingerprint of a render config, used for deterministic scratch
/// filenames (`thumbnail_{uploadId}_{h}.jpg` and friends) — long enough
/// that two different configs for the same upload don't collide, short
/// enough to stay a readable filename.
pub fn short_config_hash(value: &serde_json::Value) -> String {
    content_hash(value)[..16].to_string()
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        serde_json::Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_hash_ignores_case_and_whitespace() {
        let a = entity_hash("ws", "person", "Jane Doe", "video-intel");
        let b = entity_hash("ws", "person", "  jane doe  ", "video-intel");
        assert_eq!(a, b);
    }

    #[test]
    fn entity_hash_differs_on_unrelated_field_change_only_when_key_fields_differ() {
        let a = entity_hash("ws", "person", "Jane Doe", "video-intel");
        let b = entity_hash("ws", "person", "Jane Doe", "speech");
        assert_ne!(a, b);
    }

    #[test]
    fn clip_hash_is_stable_for_equivalent_inputs() {
        let a = clip_hash("m1", "object", "Dog", 1.0005, 2.0, 1);
        let b = clip_hash("m1", "object", " dog ", 1.0005, 2.0, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn clip_hash_rounds_to_three_decimals_consistently() {
        let a = clip_hash("m1", "object", "dog", 1.00049, 2.0, 1);
        let b = clip_hash("m1", "object", "dog", 1.00051, 2.0, 1);
        // Both format to "1.000" and "1.001" respectively under three
        // fixed decimals, so these are expected to differ.
        assert_ne!(a, b);
    }

    #[test]
    fn track_hash_stable() {
        let a = track_hash("m1", "t1", 2, "video-intel@1.2.0");
        let b = track_hash("m1", "t1", 2, "video-intel@1.2.0");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_ignores_json_key_order() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn content_hash_changes_with_value() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn short_config_hash_is_stable_and_a_prefix_of_content_hash() {
        let v = serde_json::json!({"width": 320, "height": 180});
        let h = short_config_hash(&v);
        assert_eq!(h.len(), 16);
        assert_eq!(h, content_hash(&v)[..16]);
        assert_eq!(h, short_config_hash(&v));
    }

    #[test]
    fn short_config_hash_differs_on_config_change() {
        let a = serde_json::json!({"width": 320, "height": 180});
        let b = serde_json::json!({"width": 640, "height": 360});
        assert_ne!(short_config_hash(&a), short_config_hash(&b));
    }
}
