//! External interfaces: every outbound dependency the engine has
//! is a trait here, with a real adapter backed by the actual service and an
//! in-memory adapter for tests.

pub mod blob;
pub mod files;
pub mod memory;
pub mod metadata;
pub mod tasks;

pub use blob::BlobStore;
pub use files::FileAttachmentStore;
pub use tasks::TaskStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;

/// Generic backing store for any [`crate::upsert::Upsertable`] record kind.
/// `kind` is the record's `Upsertable::kind()`, carried explicitly so a
/// single store implementation can multiplex several record tables.
#[async_trait]
pub trait MetadataStore<T>: Send + Sync
where
    T: Send + Sync,
{
    async fn find_by_dedup_key(&self, kind: &str, key: &str) -> Result<Option<T>>;
    async fn create(&self, kind: &str, key: &str, record: &T) -> Result<Uuid>;
    async fn update(&self, kind: &str, record: &T) -> Result<()>;
}
