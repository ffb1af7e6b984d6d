//! Blob storage: where renders (thumbnails, sprites,
//! transcoded video) and source uploads live.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::{EngineError, Result};

/// `exists`/`put`/`resolve` cover object lifecycle; `temp_dir`/`scratch_path`/`unlink`
/// cover scratch files step executors write intermediate renders to
/// before they're handed to `put`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<String>;
    /// Download `remote_ref` to a local path if it isn't one already, and
    /// return that local path.
    async fn resolve(&self, remote_ref: &str) -> Result<PathBuf>;
    async fn temp_dir(&self, tag: &str) -> Result<PathBuf>;
    /// A scratch-file path under the scratch root named exactly `name`,
    /// with no entropy mixed in. Used where the caller needs two attempts
    /// (retries, or concurrent workers racing the same upload) to land on
    /// the same destination rather than each minting its own directory —
    /// callers are responsible for making `name` a deterministic function
    /// of whatever content would otherwise collide.
    async fn scratch_path(&self, name: &str) -> Result<PathBuf>;
    async fn unlink(&self, path: &Path) -> Result<()>;
    /// The URI an object at `remote_path` has (or would have) once
    /// written — pure and synchronous, since every adapter's URI shape is
    /// a deterministic function of bucket/prefix + path. Lets a caller
    /// that has already confirmed existence via `exists` avoid
    /// re-uploading just to learn the URI.
    fn uri_for(&self, remote_path: &str) -> String;
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    scratch_root: PathBuf,
}

impl S3BlobStore {
    pub async fn connect(bucket: impl Into<String>, region: Option<String>, scratch_root: PathBuf) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self { client: aws_sdk_s3::Client::new(&config), bucket: bucket.into(), scratch_root }
    }

    fn key_of(&self, remote_ref: &str) -> &str {
        remote_ref.strip_prefix(&format!("s3://{}/", self.bucket)).unwrap_or(remote_ref)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(path).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(EngineError::retryable(format!("s3 head_object failed: {e}"))),
        }
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<String> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| EngineError::terminal(format!("cannot read {}: {e}", local_path.display())))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(remote_path)
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::retryable(format!("s3 put_object failed: {e}")))?;
        Ok(format!("s3://{}/{}", self.bucket, remote_path))
    }

    async fn resolve(&self, remote_ref: &str) -> Result<PathBuf> {
        if !remote_ref.starts_with("s3://") {
            return Ok(PathBuf::from(remote_ref));
        }
        let key = self.key_of(remote_ref);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EngineError::retryable(format!("s3 get_object failed: {e}")))?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| EngineError::retryable(format!("s3 body read failed: {e}")))?;
        let local = self.scratch_root.join(Uuid::new_v4().to_string()).join(key);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, data.into_bytes()).await?;
        Ok(local)
    }

    async fn temp_dir(&self, tag: &str) -> Result<PathBuf> {
        let dir = self.scratch_root.join(format!("{tag}-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn scratch_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.scratch_root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn uri_for(&self, remote_path: &str) -> String {
        format!("s3://{}/{}", self.bucket, remote_path)
    }
}

/// In-memory blob store for tests and the `once` CLI subcommand. Objects
/// are indexed by remote path; `resolve` on a local path that wasn't
/// `put` simply passes it through unchanged, matching a source file that
/// has never left local disk.
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, PathBuf>>,
    scratch_root: PathBuf,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self { objects: Mutex::new(HashMap::new()), scratch_root: std::env::temp_dir() }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<String> {
        self.objects.lock().unwrap().insert(remote_path.to_string(), local_path.to_path_buf());
        Ok(format!("mem://{remote_path}"))
    }

    async fn resolve(&self, remote_ref: &str) -> Result<PathBuf> {
        if let Some(key) = remote_ref.strip_prefix("mem://") {
            return self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| EngineError::terminal(format!("no object at key {key}")));
        }
        Ok(PathBuf::from(remote_ref))
    }

    async fn temp_dir(&self, tag: &str) -> Result<PathBuf> {
        let dir = self.scratch_root.join(format!("{tag}-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn scratch_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.scratch_root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }

    async fn unlink(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn uri_for(&self, remote_path: &str) -> String {
        format!("mem://{remote_path}")
    }
}
