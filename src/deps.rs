//! `Deps`: the explicit dependency bag every step executor and the Flow
//! Scheduler are handed.

use std::sync::Arc;

use crate::cache::ArtifactCache;
use crate::config::Config;
use crate::model::{ClipRecord, EntityRecord, Media, TrackRecord};
use crate::services::{AnalysisProvider, MediaTool};
use crate::store::{BlobStore, FileAttachmentStore, MetadataStore};

pub struct Deps {
    pub config: Config,
    pub blob: Arc<dyn BlobStore>,
    pub files: Arc<dyn FileAttachmentStore>,
    pub media_tool: Arc<dyn MediaTool>,
    pub analysis: Arc<dyn AnalysisProvider>,
    pub cache: Arc<dyn ArtifactCache>,
    pub media_store: Arc<dyn MetadataStore<Media>>,
    pub entity_store: Arc<dyn MetadataStore<EntityRecord>>,
    pub track_store: Arc<dyn MetadataStore<TrackRecord>>,
    pub clip_store: Arc<dyn MetadataStore<ClipRecord>>,
}

/// Wire up the real adapters the worker binary runs against, falling back
/// to the in-memory ones wherever `Config` leaves the corresponding
/// backing service unconfigured (useful for `mediaflow-worker once` runs
/// against a local scratch directory with no metadata service behind it).
pub async fn from_config(config: Config) -> crate::errors::Result<Deps> {
    use crate::cache::{MemoryArtifactCache, StoreArtifactCache};
    use crate::services::{HttpAnalysisProvider, ProcessMediaTool, StubAnalysisProvider};
    use crate::store::blob::{MemoryBlobStore, S3BlobStore};
    use crate::store::files::{HttpFileAttachmentStore, InMemoryFileAttachmentStore};
    use crate::store::memory::InMemoryMetadataStore;
    use crate::store::metadata::HttpMetadataStore;

    let blob: Arc<dyn BlobStore> = match &config.blob_store_region {
        Some(_) => Arc::new(
            S3BlobStore::connect(config.blob_bucket.clone(), config.blob_store_region.clone(), std::env::temp_dir().join("mediaflow"))
                .await,
        ),
        None => Arc::new(MemoryBlobStore::new()),
    };

    let media_tool: Arc<dyn MediaTool> = Arc::new(ProcessMediaTool::default());

    let analysis: Arc<dyn AnalysisProvider> = match &config.analysis_provider_url {
        Some(url) => Arc::new(HttpAnalysisProvider::new(url.clone())?),
        None => Arc::new(StubAnalysisProvider::new()),
    };

    let (files, media_store, entity_store, track_store, clip_store, cache): (
        Arc<dyn FileAttachmentStore>,
        Arc<dyn MetadataStore<Media>>,
        Arc<dyn MetadataStore<EntityRecord>>,
        Arc<dyn MetadataStore<TrackRecord>>,
        Arc<dyn MetadataStore<ClipRecord>>,
        Arc<dyn ArtifactCache>,
    ) = match &config.metadata_store_url {
        Some(url) => (
            Arc::new(HttpFileAttachmentStore::new(url.clone())?),
            Arc::new(HttpMetadataStore::new(url.clone())?),
            Arc::new(HttpMetadataStore::new(url.clone())?),
            Arc::new(HttpMetadataStore::new(url.clone())?),
            Arc::new(HttpMetadataStore::new(url.clone())?),
            Arc::new(StoreArtifactCache::new(HttpMetadataStore::new(url.clone())?)),
        ),
        None => (
            Arc::new(InMemoryFileAttachmentStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(MemoryArtifactCache::new()),
        ),
    };

    Ok(Deps { config, blob, files, media_tool, analysis, cache, media_store, entity_store, track_store, clip_store })
}

/// In-memory stand-ins for every external collaborator — a real,
/// always-compiled fallback rather than a test-only shim. Used by the
/// test suite and by the worker CLI when no real backing service is
/// configured.
pub mod fakes {
    use super::*;
    use crate::services::{StubAnalysisProvider, StubMediaTool};
    use crate::store::files::InMemoryFileAttachmentStore;
    use crate::store::memory::InMemoryMetadataStore;
    use crate::store::blob::MemoryBlobStore;
    use crate::cache::MemoryArtifactCache;

    /// Fully in-memory `Deps` for tests: no step executor in the suite
    /// touches real I/O.
    pub fn in_memory(config: Config) -> Deps {
        in_memory_with_handles(config).0
    }

    /// Concrete stub handles alongside the `Deps` that wraps them behind
    /// trait objects, so a test can stage canned responses/failures (e.g.
    /// `handles.media_tool.stage_probe(...)`) without downcasting.
    pub struct Handles {
        pub blob: Arc<MemoryBlobStore>,
        pub files: Arc<InMemoryFileAttachmentStore>,
        pub media_tool: Arc<StubMediaTool>,
        pub analysis: Arc<StubAnalysisProvider>,
        pub cache: Arc<MemoryArtifactCache>,
        pub media_store: Arc<InMemoryMetadataStore<Media>>,
        pub entity_store: Arc<InMemoryMetadataStore<EntityRecord>>,
        pub track_store: Arc<InMemoryMetadataStore<TrackRecord>>,
        pub clip_store: Arc<InMemoryMetadataStore<ClipRecord>>,
    }

    pub fn in_memory_with_handles(config: Config) -> (Deps, Handles) {
        let blob = Arc::new(MemoryBlobStore::new());
        let files = Arc::new(InMemoryFileAttachmentStore::new());
        let media_tool = Arc::new(StubMediaTool::new());
        let analysis = Arc::new(StubAnalysisProvider::new());
        let cache = Arc::new(MemoryArtifactCache::new());
        let media_store = Arc::new(InMemoryMetadataStore::new());
        let entity_store = Arc::new(InMemoryMetadataStore::new());
        let track_store = Arc::new(InMemoryMetadataStore::new());
        let clip_store = Arc::new(InMemoryMetadataStore::new());

        let deps = Deps {
            config,
            blob: blob.clone(),
            files: files.clone(),
            media_tool: media_tool.clone(),
            analysis: analysis.clone(),
            cache: cache.clone(),
            media_store: media_store.clone(),
            entity_store: entity_store.clone(),
            track_store: track_store.clone(),
            clip_store: clip_store.clone(),
        };
        (deps, Handles { blob, files, media_tool, analysis, cache, media_store, entity_store, track_store, clip_store })
    }
}
