//! Analysis providers: video-intelligence-style
//! `analyzeVideo` and speech-to-text `transcribeAudio`, both plain HTTP
//! clients with status-to-error mapping.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::{EngineError, Result};

#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze_video(&self, uri: &str, features: &[String]) -> Result<serde_json::Value>;
    async fn transcribe_audio(&self, uri: &str, options: &serde_json::Value) -> Result<serde_json::Value>;
}

pub struct HttpAnalysisProvider {
    client: Client,
    base_url: String,
}

impl HttpAnalysisProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn analyze_video(&self, uri: &str, features: &[String]) -> Result<serde_json::Value> {
        let url = format!("{}/analyze-video", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "uri": uri, "features": features }))
            .send()
            .await?;
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn transcribe_audio(&self, uri: &str, options: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/transcribe-audio", self.base_url);
        let mut body = options.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("uri".to_string(), serde_json::Value::String(uri.to_string()));
        }
        let resp = self.client.post(&url).json(&body).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }
}

/// Canned-response test double keyed by provider name, letting a
/// scenario stage "this processor succeeds with X" / "this processor
/// always fails retryably" independently per provider.
pub struct StubAnalysisProvider {
    video_responses: Mutex<HashMap<String, Result<serde_json::Value>>>,
    audio_responses: Mutex<HashMap<String, Result<serde_json::Value>>>,
}

impl StubAnalysisProvider {
    pub fn new() -> Self {
        Self { video_responses: Mutex::new(HashMap::new()), audio_responses: Mutex::new(HashMap::new()) }
    }

    pub fn stage_video(&self, key: impl Into<String>, response: Result<serde_json::Value>) {
        self.video_responses.lock().unwrap().insert(key.into(), response);
    }

    pub fn stage_audio(&self, key: impl Into<String>, response: Result<serde_json::Value>) {
        self.audio_responses.lock().unwrap().insert(key.into(), response);
    }
}

impl Default for StubAnalysisProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisProvider for StubAnalysisProvider {
    async fn analyze_video(&self, uri: &str, _features: &[String]) -> Result<serde_json::Value> {
        self.video_responses
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or_else(|| Err(EngineError::terminal(format!("no staged video analysis for {uri}"))))
    }

    async fn transcribe_audio(&self, uri: &str, _options: &serde_json::Value) -> Result<serde_json::Value> {
        self.audio_responses
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or_else(|| Err(EngineError::terminal(format!("no staged transcription for {uri}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_returns_staged_response() {
        let provider = StubAnalysisProvider::new();
        provider.stage_video("gs://b/m1.mp4", Ok(serde_json::json!({"entities": []})));
        let got = provider.analyze_video("gs://b/m1.mp4", &["LABEL_DETECTION".to_string()]).await.unwrap();
        assert_eq!(got["entities"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn stub_returns_staged_failure() {
        let provider = StubAnalysisProvider::new();
        provider.stage_video("gs://b/m1.mp4", Err(EngineError::retryable("provider unavailable")));
        let err = provider.analyze_video("gs://b/m1.mp4", &[]).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
