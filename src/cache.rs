//! Artifact Cache: lets an analysis step skip re-running a
//! processor against a media item it has already processed at the same
//! processor version.
//!
//! This cache has no TTL: a cached entry stays valid until the processor
//! version changes, at which point its equality check simply stops
//! matching (see `CACHE INVALIDATION` decision in DESIGN.md).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::Result;
use crate::upsert::Upsertable;

/// Key identifying one cacheable unit of analysis work. At most one
/// `CacheEntry` exists for a given (media, version, provider) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub media_id: String,
    pub version: u32,
    pub provider: String,
}

impl CacheKey {
    fn dedup_string(&self) -> String {
        format!("{}\u{1}{}\u{1}{}", self.media_id, self.version, self.provider)
    }
}

/// A cached processor result, tagged with the exact processor version
/// string that produced it. A hit requires this to equal the caller's
/// current processor version exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub processor_version: String,
    pub output: serde_json::Value,
}

#[async_trait]
pub trait ArtifactCache: Send + Sync {
    async fn get(&self, key: &CacheKey, processor_version: &str) -> Result<Option<serde_json::Value>>;
    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<()>;
}

/// Process-local cache, held in a plain in-memory map.
/// Suitable for a single worker process; a multi-worker deployment should
/// back this with the metadata store instead (`StoreBackedArtifactCache`).
pub struct MemoryArtifactCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryArtifactCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl Default for MemoryArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactCache for MemoryArtifactCache {
    async fn get(&self, key: &CacheKey, processor_version: &str) -> Result<Option<serde_json::Value>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).and_then(|entry| {
            if entry.processor_version == processor_version {
                Some(entry.output.clone())
            } else {
                None
            }
        }))
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<()> {
        self.entries.lock().unwrap().insert(key, entry);
        Ok(())
    }
}

/// A [`CacheEntry`] reshaped as an [`Upsertable`] record so
/// [`StoreArtifactCache`] can persist it through the same Idempotent
/// Upsert path every other derived record uses, rather than inventing a
/// second persistence mechanism.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord {
    pub id: Option<Uuid>,
    pub media_id: String,
    pub version: u32,
    pub provider: String,
    pub processor_version: String,
    pub response: serde_json::Value,
    pub features: Vec<String>,
}

impl Upsertable for CacheRecord {
    fn dedup_key(&self) -> String {
        CacheKey { media_id: self.media_id.clone(), version: self.version, provider: self.provider.clone() }
            .dedup_string()
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.processor_version == other.processor_version && self.response == other.response
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    fn kind() -> &'static str {
        "cache_entry"
    }
}

/// Metadata-store-backed cache: how a multi-worker deployment actually
/// shares provider responses across process restarts.
pub struct StoreArtifactCache<S> {
    store: S,
}

impl<S> StoreArtifactCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> ArtifactCache for StoreArtifactCache<S>
where
    S: crate::store::MetadataStore<CacheRecord>,
{
    async fn get(&self, key: &CacheKey, processor_version: &str) -> Result<Option<serde_json::Value>> {
        let found = self.store.find_by_dedup_key(CacheRecord::kind(), &key.dedup_string()).await?;
        Ok(found.and_then(|row| (row.processor_version == processor_version).then_some(row.response)))
    }

    async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<()> {
        let record = CacheRecord {
            id: None,
            media_id: key.media_id,
            version: key.version,
            provider: key.provider,
            processor_version: entry.processor_version,
            response: entry.output,
            features: Vec::new(),
        };
        crate::upsert::upsert(&self.store, record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey { media_id: "m1".into(), version: 1, provider: "video-intel".into() }
    }

    #[tokio::test]
    async fn miss_on_empty_cache() {
        let cache = MemoryArtifactCache::new();
        assert!(cache.get(&key(), "1.0.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hit_when_processor_version_matches() {
        let cache = MemoryArtifactCache::new();
        let entry = CacheEntry { processor_version: "1.0.0".into(), output: serde_json::json!({"a": 1}) };
        cache.put(key(), entry).await.unwrap();
        let hit = cache.get(&key(), "1.0.0").await.unwrap();
        assert_eq!(hit, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn miss_when_processor_version_differs() {
        let cache = MemoryArtifactCache::new();
        let entry = CacheEntry { processor_version: "1.0.0".into(), output: serde_json::json!({"a": 1}) };
        cache.put(key(), entry).await.unwrap();
        assert!(cache.get(&key(), "1.1.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_backed_cache_round_trips_through_upsert() {
        let store = crate::store::memory::InMemoryMetadataStore::<CacheRecord>::new();
        let cache = StoreArtifactCache::new(store);
        let entry = CacheEntry { processor_version: "2.0.0".into(), output: serde_json::json!({"ok": true}) };
        cache.put(key(), entry).await.unwrap();
        let hit = cache.get(&key(), "2.0.0").await.unwrap();
        assert_eq!(hit, Some(serde_json::json!({"ok": true})));
        assert!(cache.get(&key(), "1.0.0").await.unwrap().is_none());
    }
}
