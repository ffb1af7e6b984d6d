//! Step Executors: one function per step kind, dispatched by
//! `StepKind` through a plain `match` rather than a trait-object registry.
//!
//! Every executor shares the same shape: read its input off `StepContext`
//! (the flow's job payload plus already-completed parents' outputs),
//! consult the cache where applicable, call an external collaborator
//! through `Deps`, normalize the response, persist via the Idempotent
//! Upsert component, and return a JSON-serializable output that the
//! scheduler stores verbatim in the step's result.

pub mod analysis;
pub mod finalize;
pub mod normalize;
pub mod probe;
pub mod sprite;
pub mod thumbnail;
pub mod transcode;
pub mod upload;
pub mod upload_to_object_store;

use serde::de::DeserializeOwned;

use crate::deps::Deps;
use crate::errors::{EngineError, Result};
use crate::model::step::{StepContext, StepDefinition, StepKind};
use crate::services::media_tool::ProgressSink;

/// Dispatch one step to its executor. `progress` is only consumed by
/// steps that report incremental progress (currently just Transcode);
/// every other executor ignores it.
pub async fn dispatch(def: &StepDefinition, ctx: &StepContext, deps: &Deps, progress: ProgressSink) -> Result<serde_json::Value> {
    match &def.kind {
        StepKind::Probe => probe::execute(ctx, deps).await,
        StepKind::Thumbnail => thumbnail::execute(ctx, deps).await,
        StepKind::Sprite => sprite::execute(ctx, deps).await,
        StepKind::Transcode => transcode::execute(ctx, deps, progress).await,
        StepKind::Upload => upload::execute(ctx, deps).await,
        StepKind::Finalize => finalize::execute(ctx, deps).await,
        StepKind::UploadToObjectStore => upload_to_object_store::execute(ctx, deps).await,
        StepKind::Analysis { provider } => analysis::execute(provider, ctx, deps).await,
        StepKind::Normalize => normalize::execute(ctx, deps).await,
    }
}

/// Deserialize a named parent step's already-completed output. Every
/// executor downstream of another step uses this instead of re-deriving
/// the value, so it always sees the parent's committed result.
pub(crate) fn parent_output<T: DeserializeOwned>(ctx: &StepContext, name: &str) -> Result<T> {
    let value = ctx
        .output_of(name)
        .ok_or_else(|| EngineError::Internal(format!("missing output of upstream step '{name}'")))?;
    serde_json::from_value(value.clone()).map_err(EngineError::from)
}

/// Same as [`parent_output`] but the parent may not have run (e.g. an
/// optional step like Transcode when `transcode.enabled=false`).
pub(crate) fn optional_parent_output<T: DeserializeOwned>(ctx: &StepContext, name: &str) -> Result<Option<T>> {
    match ctx.output_of(name) {
        None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}
