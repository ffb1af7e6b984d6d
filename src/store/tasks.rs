//! Task queue access: the Task Controller's only window
//! onto the outside world for claiming and reporting on tasks.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::model::step::StepState;
use crate::model::{Task, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Atomically claim the next queued task (ordered by priority, then
    /// creation time) and mark it `running`. Returns `None` when the queue
    /// is empty. Must not hand the same task to two concurrent callers.
    /// The returned task's `flow_results`, if any, is the prior attempt's
    /// terminal step map, persisted for resume (§3, §4.7 "Resume").
    async fn claim_next(&self) -> Result<Option<Task>>;

    async fn update_progress(&self, task_id: Uuid, progress: u8) -> Result<()>;

    async fn mark_succeeded(&self, task_id: Uuid) -> Result<()>;

    /// Record a failed attempt. `requeue` is `true` when the Retry &
    /// Backoff Policy decided to retry: the task goes back to `queued`
    /// with `attempts` incremented; `false` means terminal failure.
    /// `flow_results`, when present, is persisted onto the task so the
    /// next `claim_next` hands it back for resume; `None` means the flow
    /// never produced a step map (e.g. a build-time rejection).
    async fn mark_failed(
        &self,
        task_id: Uuid,
        error: &str,
        requeue: bool,
        flow_results: Option<&HashMap<String, StepState>>,
    ) -> Result<()>;
}

/// REST-backed adapter assuming a metadata service exposing
/// `POST /tasks/claim`, `PATCH /tasks/{id}`.
pub struct HttpTaskStore {
    client: Client,
    base_url: String,
}

impl HttpTaskStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[derive(serde::Serialize)]
struct PatchTask<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requeue: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow_results: Option<&'a HashMap<String, StepState>>,
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn claim_next(&self) -> Result<Option<Task>> {
        let url = format!("{}/tasks/claim", self.base_url);
        let resp = self.client.post(&url).send().await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let task: Task = resp.json().await?;
        Ok(Some(task))
    }

    async fn update_progress(&self, task_id: Uuid, progress: u8) -> Result<()> {
        let url = format!("{}/tasks/{task_id}", self.base_url);
        let body = PatchTask { status: None, progress: Some(progress), last_error: None, requeue: None, flow_results: None };
        self.client.patch(&url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }

    async fn mark_succeeded(&self, task_id: Uuid) -> Result<()> {
        let url = format!("{}/tasks/{task_id}", self.base_url);
        let body = PatchTask {
            status: Some(TaskStatus::Succeeded),
            progress: Some(100),
            last_error: None,
            requeue: None,
            flow_results: None,
        };
        self.client.patch(&url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: Uuid,
        error: &str,
        requeue: bool,
        flow_results: Option<&HashMap<String, StepState>>,
    ) -> Result<()> {
        let url = format!("{}/tasks/{task_id}", self.base_url);
        let body = PatchTask {
            status: Some(if requeue { TaskStatus::Queued } else { TaskStatus::Failed }),
            progress: None,
            last_error: Some(error),
            requeue: Some(requeue),
            flow_results,
        };
        self.client.patch(&url).json(&body).send().await?.error_for_status()?;
        Ok(())
    }
}

/// In-memory task store for tests and the `once` CLI subcommand.
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
    order: Mutex<Vec<Uuid>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()), order: Mutex::new(Vec::new()) }
    }

    pub fn seed(&self, task: Task) {
        let id = task.id;
        self.tasks.lock().unwrap().insert(id, task);
        self.order.lock().unwrap().push(id);
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn claim_next(&self) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().unwrap();
        let order = self.order.lock().unwrap();

        let mut candidates: Vec<&Uuid> =
            order.iter().filter(|id| matches!(tasks.get(*id).map(|t| t.status), Some(TaskStatus::Queued))).collect();
        candidates.sort_by_key(|id| std::cmp::Reverse(tasks.get(*id).map(|t| t.priority).unwrap_or(0)));

        let Some(&id) = candidates.first() else { return Ok(None) };
        let task = tasks.get_mut(&id).unwrap();
        task.status = TaskStatus::Running;
        task.attempts += 1;
        task.updated_at = chrono::Utc::now();
        Ok(Some(task.clone()))
    }

    async fn update_progress(&self, task_id: Uuid, progress: u8) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&task_id) {
            task.progress = progress;
            task.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn mark_succeeded(&self, task_id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&task_id) {
            task.status = TaskStatus::Succeeded;
            task.progress = 100;
            task.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: Uuid,
        error: &str,
        requeue: bool,
        flow_results: Option<&HashMap<String, StepState>>,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&task_id) {
            task.status = if requeue { TaskStatus::Queued } else { TaskStatus::Failed };
            task.last_error = Some(error.to_string());
            task.flow_results = flow_results.cloned();
            task.updated_at = chrono::Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskKind;

    #[tokio::test]
    async fn claim_next_returns_highest_priority_queued_task() {
        let store = InMemoryTaskStore::new();
        let mut low = Task::new(TaskKind::Transcode, serde_json::json!({}));
        low.priority = 1;
        let mut high = Task::new(TaskKind::Transcode, serde_json::json!({}));
        high.priority = 5;
        store.seed(low);
        store.seed(high.clone());

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn claim_next_is_empty_when_nothing_queued() {
        let store = InMemoryTaskStore::new();
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_failed_with_requeue_returns_task_to_queued() {
        let store = InMemoryTaskStore::new();
        let task = Task::new(TaskKind::Transcode, serde_json::json!({}));
        let id = task.id;
        store.seed(task);
        store.claim_next().await.unwrap();
        store.mark_failed(id, "timeout", true, None).await.unwrap();
        assert_eq!(store.get(id).unwrap().status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn mark_failed_persists_flow_results_for_resume() {
        let store = InMemoryTaskStore::new();
        let task = Task::new(TaskKind::Transcode, serde_json::json!({}));
        let id = task.id;
        store.seed(task);
        store.claim_next().await.unwrap();

        let mut results = HashMap::new();
        results.insert(
            "probe".to_string(),
            StepState { status: crate::model::step::StepStatus::Succeeded, attempts: 1, output: Some(serde_json::json!({"ok": true})), error: None },
        );
        store.mark_failed(id, "transcode tool crashed", true, Some(&results)).await.unwrap();

        let requeued = store.get(id).unwrap();
        assert_eq!(requeued.status, TaskStatus::Queued);
        let carried = requeued.flow_results.unwrap();
        assert_eq!(carried["probe"].status, crate::model::step::StepStatus::Succeeded);
    }
}
