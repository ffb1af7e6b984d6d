//! REST-backed [`MetadataStore`] adapter: a reqwest client builder,
//! JSON bodies, and status-to-error mapping. The metadata service is
//! assumed to expose, per record kind, `GET /{kind}?dedupKey=...`,
//! `POST /{kind}`, and `PUT /{kind}/{id}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::store::MetadataStore;
use crate::upsert::Upsertable;

pub struct HttpMetadataStore<T> {
    client: Client,
    base_url: String,
    _marker: PhantomData<T>,
}

impl<T> HttpMetadataStore<T> {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url: base_url.into(), _marker: PhantomData })
    }
}

#[derive(serde::Serialize)]
struct CreateEnvelope<'a, T> {
    dedup_key: &'a str,
    record: &'a T,
}

#[derive(serde::Deserialize)]
struct IdEnvelope {
    id: Uuid,
}

#[async_trait]
impl<T> MetadataStore<T> for HttpMetadataStore<T>
where
    T: Upsertable + DeserializeOwned + 'static,
{
    async fn find_by_dedup_key(&self, kind: &str, key: &str) -> Result<Option<T>> {
        let url = format!("{}/{kind}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("dedupKey", key)])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let record: Option<T> = resp.json().await?;
        Ok(record)
    }

    async fn create(&self, kind: &str, key: &str, record: &T) -> Result<Uuid> {
        let url = format!("{}/{kind}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&CreateEnvelope { dedup_key: key, record })
            .send()
            .await?;

        if resp.status() == StatusCode::CONFLICT {
            return Err(EngineError::terminal(format!("not_unique: {kind} key {key} already exists")));
        }
        let resp = resp.error_for_status()?;
        let envelope: IdEnvelope = resp.json().await?;
        Ok(envelope.id)
    }

    async fn update(&self, kind: &str, record: &T) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| EngineError::Internal(format!("update called on {kind} record with no id")))?;
        let url = format!("{}/{kind}/{id}", self.base_url);
        self.client.put(&url).json(record).send().await?.error_for_status()?;
        Ok(())
    }
}
