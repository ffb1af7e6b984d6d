//! In-memory store adapters: fast, dependency-free stand-ins used by
//! unit tests and the `once` CLI subcommand's dry-run mode.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::store::MetadataStore;
use crate::upsert::Upsertable;

/// Keyed by dedup key so `find_by_dedup_key` is O(1); `create` fails with a
/// `not_unique`-tagged `Terminal` error if the key already exists, mirroring
/// a real store's unique-constraint rejection so `crate::upsert::upsert`'s
/// race-handling path is exercisable without a real database.
pub struct InMemoryMetadataStore<T> {
    rows: Mutex<HashMap<String, T>>,
}

impl<T> InMemoryMetadataStore<T> {
    pub fn new() -> Self {
        Self { rows: Mutex::new(HashMap::new()) }
    }

    pub async fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

impl<T> Default for InMemoryMetadataStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> MetadataStore<T> for InMemoryMetadataStore<T>
where
    T: Upsertable + 'static,
{
    async fn find_by_dedup_key(&self, _kind: &str, key: &str) -> Result<Option<T>> {
        Ok(self.rows.lock().unwrap().get(key).cloned())
    }

    async fn create(&self, _kind: &str, key: &str, record: &T) -> Result<Uuid> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(key) {
            return Err(EngineError::terminal(format!(
                "not_unique: {} row already exists for key {key}",
                T::kind()
            )));
        }
        let id = Uuid::new_v4();
        rows.insert(key.to_string(), record.clone().with_id(id));
        Ok(id)
    }

    async fn update(&self, _kind: &str, record: &T) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let key = record.dedup_key();
        rows.insert(key, record.clone());
        Ok(())
    }
}
