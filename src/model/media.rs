//! Media record: the probe
//! and finalize steps of the transcode flow are the only writers, and
//! both go through the Idempotent Upsert component so retries never
//! duplicate a Media row per upload.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::upsert::Upsertable;

/// Probe output shape, carried verbatim into the Media
/// record and into every downstream step's input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeOutput {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub fps: f64,
    pub bitrate: Option<u64>,
    pub format: Option<String>,
    pub size: Option<u64>,
    pub has_audio: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Media {
    pub id: Option<Uuid>,
    pub upload_id: String,
    /// Open Question 1 (DESIGN.md): bumped only when the referenced
    /// upload changes, not on every reprocessing attempt.
    pub version: u32,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub fps: f64,
    pub processor_version: Option<String>,
    pub thumbnail_file_id: Option<Uuid>,
    pub sprite_file_id: Option<Uuid>,
    pub proxy_file_id: Option<Uuid>,
}

impl Media {
    pub fn from_probe(upload_id: impl Into<String>, probe: &ProbeOutput) -> Self {
        Self {
            id: None,
            upload_id: upload_id.into(),
            version: 1,
            duration: probe.duration,
            width: probe.width,
            height: probe.height,
            codec: probe.codec.clone(),
            fps: probe.fps,
            processor_version: None,
            thumbnail_file_id: None,
            sprite_file_id: None,
            proxy_file_id: None,
        }
    }

    pub fn has_all_refs(&self, want_thumbnail: bool, want_sprite: bool, want_proxy: bool) -> bool {
        (!want_thumbnail || self.thumbnail_file_id.is_some())
            && (!want_sprite || self.sprite_file_id.is_some())
            && (!want_proxy || self.proxy_file_id.is_some())
    }
}

impl Upsertable for Media {
    fn dedup_key(&self) -> String {
        self.upload_id.clone()
    }

    /// Probe fields and render references both participate: a Media row
    /// is "unchanged" only when nothing about the source or its renders
    /// has moved, so a retry that adds the proxy reference still issues
    /// an update against a Media row a prior attempt already created.
    fn content_eq(&self, other: &Self) -> bool {
        self.duration == other.duration
            && self.width == other.width
            && self.height == other.height
            && self.codec == other.codec
            && self.fps == other.fps
            && self.processor_version == other.processor_version
            && self.thumbnail_file_id == other.thumbnail_file_id
            && self.sprite_file_id == other.sprite_file_id
            && self.proxy_file_id == other.proxy_file_id
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    fn kind() -> &'static str {
        "media"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_eq_ignores_id() {
        let probe = ProbeOutput {
            duration: 1.0,
            width: 10,
            height: 10,
            codec: "h264".into(),
            fps: 30.0,
            bitrate: None,
            format: None,
            size: None,
            has_audio: None,
        };
        let a = Media::from_probe("u1", &probe);
        let mut b = a.clone();
        b.id = Some(Uuid::new_v4());
        assert!(a.content_eq(&b));
    }
}
