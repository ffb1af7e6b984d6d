//! Idempotent Upsert: a single routine every analysis step
//! funnels its derived records through so retries and re-runs never
//! duplicate an entity, clip, or track.
//!
//! Generalized over any record implementing [`Upsertable`] and routed
//! through [`crate::store::MetadataStore`].

use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::store::MetadataStore;

/// A record shape the Idempotent Upsert routine knows how to reconcile.
///
/// `dedup_key` must be stable for a given logical record and must collide
/// exactly when two attempts describe "the same" record (see
/// `crate::hashing` for the canonical per-kind hash functions).
pub trait Upsertable: Clone + serde::Serialize + Send + Sync {
    /// The field(s) a unique constraint is keyed on, pre-hashed.
    fn dedup_key(&self) -> String;

    /// Whether `self` and an existing row with the same dedup key carry
    /// the same payload (an `unchanged` outcome) or differ (an `update`).
    fn content_eq(&self, existing: &Self) -> bool;

    fn id(&self) -> Option<Uuid>;
    fn with_id(self, id: Uuid) -> Self;

    /// Record kind name, used only for store routing and logging.
    fn kind() -> &'static str;
}

/// Outcome of one upsert call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub id: Uuid,
    pub action: UpsertAction,
}

/// Upsert `record` against `store`:
///
/// 1. Query by dedup key.
/// 2. Zero rows: attempt create. If create reports a unique-constraint
///    violation (another attempt won the race), re-query and fall through
///    to step 3 with the winner's row.
/// 3. One row: if the payload differs, update; otherwise leave it alone.
pub async fn upsert<T, S>(store: &S, record: T) -> Result<UpsertResult>
where
    T: Upsertable,
    S: MetadataStore<T> + ?Sized,
{
    let key = record.dedup_key();

    match store.find_by_dedup_key(T::kind(), &key).await? {
        Some(existing) => reconcile(store, record, existing).await,
        None => match store.create(T::kind(), &key, &record).await {
            Ok(id) => Ok(UpsertResult { id, action: UpsertAction::Created }),
            Err(EngineError::Terminal { reason }) if reason.contains("not_unique") => {
                let existing = store
                    .find_by_dedup_key(T::kind(), &key)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Internal(format!(
                            "upsert race on {} key {key}: unique-constraint conflict reported but re-query found no row",
                            T::kind()
                        ))
                    })?;
                reconcile(store, record, existing).await
            }
            Err(other) => Err(other),
        },
    }
}

async fn reconcile<T, S>(store: &S, record: T, existing: T) -> Result<UpsertResult>
where
    T: Upsertable,
    S: MetadataStore<T> + ?Sized,
{
    let id = existing.id().ok_or_else(|| {
        EngineError::Internal(format!("{} row returned by store has no id", T::kind()))
    })?;

    if record.content_eq(&existing) {
        return Ok(UpsertResult { id, action: UpsertAction::Unchanged });
    }

    let updated = record.with_id(id);
    store.update(T::kind(), &updated).await?;
    Ok(UpsertResult { id, action: UpsertAction::Updated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryMetadataStore;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize, PartialEq)]
    struct Widget {
        id: Option<Uuid>,
        key: String,
        value: i32,
    }

    impl Upsertable for Widget {
        fn dedup_key(&self) -> String {
            self.key.clone()
        }
        fn content_eq(&self, existing: &Self) -> bool {
            self.value == existing.value
        }
        fn id(&self) -> Option<Uuid> {
            self.id
        }
        fn with_id(mut self, id: Uuid) -> Self {
            self.id = Some(id);
            self
        }
        fn kind() -> &'static str {
            "widget"
        }
    }

    #[tokio::test]
    async fn first_upsert_creates() {
        let store = InMemoryMetadataStore::<Widget>::new();
        let w = Widget { id: None, key: "a".into(), value: 1 };
        let result = upsert(&store, w).await.unwrap();
        assert_eq!(result.action, UpsertAction::Created);
    }

    #[tokio::test]
    async fn repeated_upsert_with_same_payload_is_unchanged() {
        let store = InMemoryMetadataStore::<Widget>::new();
        let w = Widget { id: None, key: "a".into(), value: 1 };
        let first = upsert(&store, w.clone()).await.unwrap();
        let second = upsert(&store, w).await.unwrap();
        assert_eq!(second.action, UpsertAction::Unchanged);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn upsert_with_changed_payload_updates() {
        let store = InMemoryMetadataStore::<Widget>::new();
        let w1 = Widget { id: None, key: "a".into(), value: 1 };
        let w2 = Widget { id: None, key: "a".into(), value: 2 };
        let first = upsert(&store, w1).await.unwrap();
        let second = upsert(&store, w2).await.unwrap();
        assert_eq!(second.action, UpsertAction::Updated);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_across_many_repeats() {
        let store = InMemoryMetadataStore::<Widget>::new();
        let w = Widget { id: None, key: "stable".into(), value: 42 };
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(upsert(&store, w.clone()).await.unwrap().id);
        }
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(store.count().await, 1);
    }
}
