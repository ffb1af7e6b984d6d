//! Domain model shared by every component: tasks, steps, flows, and the
//! derived artifacts analysis steps upsert.

pub mod artifact;
pub mod flow;
pub mod media;
pub mod step;
pub mod task;

pub use artifact::{AnalysisSummary, ClipRecord, EntityRecord, RenderArtifact, RenderKind, TrackRecord};
pub use flow::{FlowDefinition, FlowRun, RunStatus};
pub use media::{Media, ProbeOutput};
pub use step::{FlowJob, StepContext, StepDefinition, StepKind, StepState, StepStatus};
pub use task::{
    DetectLabelsPayload, MidpointMarker, Resolution, SpriteConfig, Task, TaskKind, TaskStatus,
    ThumbnailConfig, TimestampSpec, TranscodeConfig, TranscodePayload,
};
