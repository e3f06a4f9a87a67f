//! The dump pipeline: tool command lines, stage execution and the
//! coordinator driving a run from state resolution to cleanup.

pub mod command;
pub mod coordinator;
pub mod stages;

pub use command::CommandBuilder;
pub use coordinator::{
    CreateRequest, PgDumpRequest, PipelineCoordinator, PipelinePhase, PipelineRun, PublishTarget,
    RunOutcome,
};
pub use stages::{ArtifactInfo, DumpStageRunner, InfoCollector, StageRequest, StageResult};
