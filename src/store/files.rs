//! File attachment uploads: "File attachment create: accepts
//! a local file path + metadata; returns a record with an id." Finalize
//! calls this once per render path it was handed, then threads the
//! returned ids onto the Media record.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{EngineError, Result};

#[async_trait]
pub trait FileAttachmentStore: Send + Sync {
    async fn attach(&self, local_path: &Path, metadata: serde_json::Value) -> Result<Uuid>;
}

/// REST-backed adapter assuming a metadata service exposing
/// `POST /files` (multipart: `file`, `metadata`).
pub struct HttpFileAttachmentStore {
    client: Client,
    base_url: String,
}

impl HttpFileAttachmentStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[derive(serde::Deserialize)]
struct IdEnvelope {
    id: Uuid,
}

#[async_trait]
impl FileAttachmentStore for HttpFileAttachmentStore {
    async fn attach(&self, local_path: &Path, metadata: serde_json::Value) -> Result<Uuid> {
        let bytes = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("metadata", metadata.to_string());

        let url = format!("{}/files", self.base_url);
        let resp = self.client.post(&url).multipart(form).send().await?;
        let resp = resp.error_for_status()?;
        let envelope: IdEnvelope = resp.json().await?;
        Ok(envelope.id)
    }
}

/// In-memory adapter for tests: records which local paths were attached
/// and with what metadata, so step-executor tests can assert on it.
pub struct InMemoryFileAttachmentStore {
    attached: Mutex<HashMap<Uuid, (PathBuf, serde_json::Value)>>,
}

impl InMemoryFileAttachmentStore {
    pub fn new() -> Self {
        Self { attached: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, id: Uuid) -> Option<(PathBuf, serde_json::Value)> {
        self.attached.lock().unwrap().get(&id).cloned()
    }
}

impl Default for InMemoryFileAttachmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileAttachmentStore for InMemoryFileAttachmentStore {
    async fn attach(&self, local_path: &Path, metadata: serde_json::Value) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.attached.lock().unwrap().insert(id, (local_path.to_path_buf(), metadata));
        Ok(id)
    }
}
