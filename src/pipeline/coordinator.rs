//! The dump run state machine.
//!
//! ```text
//! Idle -> ResolvingState -> (Locking) -> RunningPrimaryStage -> RunningConversionStage
//!      -> (CollectingInfo) -> Publishing -> (Notifying) -> Cleanup -> Succeeded | Failed
//! ```
//!
//! A failure in any phase jumps straight to `Cleanup`. The lock is released
//! and the cleanup policy applied on both paths; their own failures are
//! logged and never replace the error that ended the run.

use super::command::CommandBuilder;
use super::stages::{ArtifactInfo, DumpStageRunner, InfoCollector, StageRequest, StageResult};
use crate::notifications::{ActionStatus, ActionTracker, DumpServerClient};
use crate::sequence::SequenceStateResolver;
use crate::storage::{ArtifactPublisher, CannedAcl, ObjectStore, ResourceLock, UploadOptions};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use planet_dumper_common::{CleanupMode, DumpMetadata, Error, Result, SequenceNumber};
use planet_dumper_exec::{
    primary_artifact_name, render_name, ProcessRegistry, ProcessRunner, RunDirectories,
    WorkspaceManager,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Idle,
    ResolvingState,
    Locking,
    RunningPrimaryStage,
    RunningConversionStage,
    CollectingInfo,
    Publishing,
    Notifying,
    Cleanup,
    Succeeded,
    Failed,
}

/// Destination of the final artifact.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub bucket: String,
    pub acl: Option<CannedAcl>,
}

/// Input of a full `create` run.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Name template of the artifact, see [`render_name`].
    pub output_format: String,
    pub cleanup_mode: CleanupMode,
    pub resume: bool,
    /// Run the info tool on the converted artifact.
    pub collect_info: bool,
    /// Bucket holding the advisory lock for the duration of the dump stages.
    pub lock_bucket: Option<String>,
    pub target: PublishTarget,
    pub description: Option<String>,
}

/// Input of a `pg-dump` run, which stops after the primary dump.
#[derive(Debug, Clone)]
pub struct PgDumpRequest {
    pub output_format: String,
    pub cleanup_mode: CleanupMode,
    pub resume: bool,
    pub lock_bucket: Option<String>,
}

/// Everything fixed for a run once its state is known.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    /// Rendered output name, also the object key.
    pub name: String,
    pub cleanup_mode: CleanupMode,
    pub resume: bool,
    pub dirs: RunDirectories,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: PipelineRun,
    /// The last artifact produced.
    pub artifact: PathBuf,
    pub stages: Vec<StageResult>,
    /// Set once the artifact has been published.
    pub metadata: Option<DumpMetadata>,
    pub info: Option<ArtifactInfo>,
}

/// What the finish path needs to know about a run in progress.
#[derive(Default)]
struct RunGuard {
    state: Option<SequenceNumber>,
    lock: Option<ResourceLock>,
    action_created: bool,
}

pub struct PipelineCoordinator {
    resolver: SequenceStateResolver,
    workspace: WorkspaceManager,
    primary: DumpStageRunner,
    conversion: DumpStageRunner,
    info: InfoCollector,
    registry: Option<Arc<ProcessRegistry>>,
    store: Option<Arc<dyn ObjectStore>>,
    publisher: Option<ArtifactPublisher>,
    dump_server: Option<DumpServerClient>,
    tracker: Option<Arc<dyn ActionTracker>>,
    phases: Mutex<Vec<PipelinePhase>>,
}

impl PipelineCoordinator {
    pub fn new(
        resolver: SequenceStateResolver,
        workspace: WorkspaceManager,
        runner: Arc<dyn ProcessRunner>,
        commands: Arc<CommandBuilder>,
    ) -> Self {
        Self {
            resolver,
            workspace,
            primary: DumpStageRunner::primary(Arc::clone(&runner), Arc::clone(&commands)),
            conversion: DumpStageRunner::conversion(Arc::clone(&runner), Arc::clone(&commands)),
            info: InfoCollector::new(runner, commands),
            registry: None,
            store: None,
            publisher: None,
            dump_server: None,
            tracker: None,
            phases: Mutex::new(vec![PipelinePhase::Idle]),
        }
    }

    /// Registry consulted to tell a signal-terminated run from a failed one.
    pub fn with_registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Object store used for locking and publishing.
    pub fn with_object_store(
        mut self,
        store: Arc<dyn ObjectStore>,
        upload: UploadOptions,
        log_progress: bool,
    ) -> Self {
        let publisher = ArtifactPublisher::new(Arc::clone(&store), upload);
        self.publisher = Some(if log_progress {
            publisher.with_progress_logging()
        } else {
            publisher
        });
        self.store = Some(store);
        self
    }

    pub fn with_dump_server(mut self, client: DumpServerClient) -> Self {
        self.dump_server = Some(client);
        self
    }

    pub fn with_action_tracker(mut self, tracker: Arc<dyn ActionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Phases entered so far, starting with `Idle`.
    pub fn phase_history(&self) -> Vec<PipelinePhase> {
        self.phases.lock().clone()
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phases.lock().last().copied().unwrap_or(PipelinePhase::Idle)
    }

    fn transition(&self, phase: PipelinePhase) {
        debug!(from = ?self.phase(), to = ?phase, "pipeline transition");
        self.phases.lock().push(phase);
    }

    fn ensure_not_terminated(&self) -> Result<()> {
        match &self.registry {
            Some(registry) if registry.is_terminated() => Err(Error::Terminated),
            _ => Ok(()),
        }
    }

    /// Dump, convert, publish and register one state.
    pub async fn create(&self, request: &CreateRequest) -> Result<RunOutcome> {
        let mut guard = RunGuard::default();
        let result = self.run_create(request, &mut guard).await;
        self.finish(result, guard, request.cleanup_mode).await
    }

    /// Produce the primary dump of one state only.
    pub async fn pg_dump(&self, request: &PgDumpRequest) -> Result<RunOutcome> {
        if !request.cleanup_mode.is_basic() {
            return Err(Error::config(format!(
                "cleanup mode {} is not available for pg-dump",
                request.cleanup_mode
            )));
        }

        let mut guard = RunGuard::default();
        let result = self.run_pg_dump(request, &mut guard).await;
        self.finish(result, guard, request.cleanup_mode).await
    }

    async fn start_run(
        &self,
        output_format: &str,
        cleanup_mode: CleanupMode,
        resume: bool,
        lock_bucket: Option<&str>,
        guard: &mut RunGuard,
    ) -> Result<PipelineRun> {
        self.transition(PipelinePhase::ResolvingState);
        let state = self.resolver.resolve().await?;
        guard.state = Some(state);

        let timestamp = Utc::now();
        let name = render_name(output_format, state, timestamp);

        if let Some(tracker) = &self.tracker {
            tracker.create_action(state, json!({ "name": name })).await?;
            guard.action_created = true;
        }

        if let Some(bucket) = lock_bucket {
            self.transition(PipelinePhase::Locking);
            let store = self.require_store()?;
            let lock = ResourceLock::new(store, bucket);
            lock.acquire().await?;
            guard.lock = Some(lock);
        }

        self.workspace.apply_pre_cleanup(cleanup_mode, state).await?;
        let dirs = self.workspace.prepare(state).await?;

        info!(state = %state, name = %name, workdir = %dirs.state_dir.display(), "starting run");
        Ok(PipelineRun {
            state,
            timestamp,
            name,
            cleanup_mode,
            resume,
            dirs,
        })
    }

    async fn run_primary(&self, run: &PipelineRun) -> Result<StageResult> {
        self.ensure_not_terminated()?;
        self.transition(PipelinePhase::RunningPrimaryStage);
        self.primary
            .run(&StageRequest {
                output_dir: run.dirs.primary_dir.clone(),
                output_name: primary_artifact_name(&run.name),
                input: None,
                resume: run.resume,
            })
            .await
    }

    async fn run_create(
        &self,
        request: &CreateRequest,
        guard: &mut RunGuard,
    ) -> Result<RunOutcome> {
        let run = self
            .start_run(
                &request.output_format,
                request.cleanup_mode,
                request.resume,
                request.lock_bucket.as_deref(),
                guard,
            )
            .await?;

        let primary = self.run_primary(&run).await?;

        self.ensure_not_terminated()?;
        self.transition(PipelinePhase::RunningConversionStage);
        let converted = self
            .conversion
            .run(&StageRequest {
                output_dir: run.dirs.conversion_dir.clone(),
                output_name: run.name.clone(),
                input: Some(primary.artifact.clone()),
                resume: run.resume,
            })
            .await?;

        let info = if request.collect_info {
            self.ensure_not_terminated()?;
            self.transition(PipelinePhase::CollectingInfo);
            let info = self.info.collect(&converted.artifact).await?;
            info!(
                artifact = %converted.artifact.display(),
                info = %info.info,
                "collected artifact info"
            );
            Some(info)
        } else {
            None
        };

        self.release_lock(guard).await;

        self.ensure_not_terminated()?;
        self.transition(PipelinePhase::Publishing);
        let publisher = self
            .publisher
            .as_ref()
            .ok_or_else(|| Error::config("no object store configured for publishing"))?;
        publisher
            .publish(
                &converted.artifact,
                &request.target.bucket,
                &run.name,
                request.target.acl,
            )
            .await?;

        let mut metadata = DumpMetadata::new(&run.name, &request.target.bucket, run.timestamp)
            .with_sequence_number(run.state);
        if let Some(description) = &request.description {
            metadata = metadata.with_description(description);
        }

        if let Some(dump_server) = &self.dump_server {
            self.ensure_not_terminated()?;
            self.transition(PipelinePhase::Notifying);
            dump_server.register(&metadata).await?;
        }

        if let Some(tracker) = &self.tracker {
            self.ensure_not_terminated()?;
            tracker
                .update_action(
                    ActionStatus::Completed,
                    json!({ "dumpServerPayload": metadata, "info": info }),
                )
                .await?;
        }

        Ok(RunOutcome {
            artifact: converted.artifact.clone(),
            stages: vec![primary, converted],
            metadata: Some(metadata),
            info,
            run,
        })
    }

    async fn run_pg_dump(
        &self,
        request: &PgDumpRequest,
        guard: &mut RunGuard,
    ) -> Result<RunOutcome> {
        let run = self
            .start_run(
                &request.output_format,
                request.cleanup_mode,
                request.resume,
                request.lock_bucket.as_deref(),
                guard,
            )
            .await?;

        let primary = self.run_primary(&run).await?;
        self.release_lock(guard).await;

        if let Some(tracker) = &self.tracker {
            self.ensure_not_terminated()?;
            tracker
                .update_action(
                    ActionStatus::Completed,
                    json!({
                        "pgDumpOutputPath": primary.artifact,
                        "sizeBytes": primary.size_bytes,
                    }),
                )
                .await?;
        }

        Ok(RunOutcome {
            artifact: primary.artifact.clone(),
            stages: vec![primary],
            metadata: None,
            info: None,
            run,
        })
    }

    fn require_store(&self) -> Result<Arc<dyn ObjectStore>> {
        self.store
            .clone()
            .ok_or_else(|| Error::config("no object store configured for locking"))
    }

    async fn release_lock(&self, guard: &mut RunGuard) {
        if let Some(lock) = guard.lock.take() {
            if let Err(e) = lock.release().await {
                warn!(
                    bucket = %lock.bucket(),
                    key = %lock.key(),
                    error = %e,
                    "failed to release lock"
                );
            }
        }
    }

    async fn finish(
        &self,
        result: Result<RunOutcome>,
        mut guard: RunGuard,
        cleanup_mode: CleanupMode,
    ) -> Result<RunOutcome> {
        self.transition(PipelinePhase::Cleanup);

        self.release_lock(&mut guard).await;

        if let Some(state) = guard.state {
            if let Err(e) = self.workspace.apply_post_cleanup(cleanup_mode, state).await {
                warn!(state = %state, mode = %cleanup_mode, error = %e, "cleanup failed");
            }
        }

        // A signalled run is reported as terminated even if its last step
        // happened to complete.
        let result = match result {
            Err(Error::Terminated) => Err(Error::Terminated),
            other if self.ensure_not_terminated().is_err() => {
                match &other {
                    Ok(_) => warn!("run completed after a termination signal"),
                    Err(e) => warn!(error = %e, "run was interrupted by a termination signal"),
                }
                Err(Error::Terminated)
            }
            other => other,
        };

        match &result {
            Ok(outcome) => {
                self.transition(PipelinePhase::Succeeded);
                info!(
                    state = %outcome.run.state,
                    artifact = %outcome.artifact.display(),
                    "finished command execution successfully"
                );
            }
            Err(e) => {
                if guard.action_created {
                    if let Some(tracker) = &self.tracker {
                        let metadata = json!({ "error": e.to_string() });
                        let update = tracker.update_action(ActionStatus::Failed, metadata).await;
                        if let Err(update) = update {
                            warn!(error = %update, "failed to report failed action");
                        }
                    }
                }
                self.transition(PipelinePhase::Failed);
                error!(
                    error = %e,
                    exit_code = e.exit_code().code(),
                    "an error occurred while executing command"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sequence::StateSource;
    use crate::storage::{
        FileUpload, MemoryObjectStore, StoreOperation, UploadProgressCallback, LOCK_KEY,
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bytes::Bytes;
    use planet_dumper_exec::{ScriptedRunner, TerminationSignal};
    use std::path::Path;
    use tempfile::TempDir;

    /// Store that delivers a termination signal while the artifact uploads.
    struct SignalDuringUpload {
        inner: MemoryObjectStore,
        registry: Arc<ProcessRegistry>,
    }

    #[async_trait]
    impl ObjectStore for SignalDuringUpload {
        async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
            self.inner.bucket_exists(bucket).await
        }

        async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
            self.inner.object_exists(bucket, key).await
        }

        async fn get_object_text(&self, bucket: &str, key: &str) -> Result<String> {
            self.inner.get_object_text(bucket, key).await
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            acl: Option<CannedAcl>,
        ) -> Result<()> {
            self.inner.put_object(bucket, key, body, acl).await
        }

        async fn upload_file(
            &self,
            upload: &FileUpload,
            progress: Option<&UploadProgressCallback>,
        ) -> Result<()> {
            self.registry.terminate_all(TerminationSignal::Interrupt, None);
            self.inner.upload_file(upload, progress).await
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
            self.inner.delete_object(bucket, key).await
        }
    }

    struct Harness {
        root: TempDir,
        runner: Arc<ScriptedRunner>,
        store: Arc<MemoryObjectStore>,
    }

    impl Harness {
        fn new(runner: ScriptedRunner, store: MemoryObjectStore) -> Self {
            Self {
                root: TempDir::new().unwrap(),
                runner: Arc::new(runner),
                store: Arc::new(store),
            }
        }

        fn coordinator(&self, source: &str) -> PipelineCoordinator {
            let source = source.parse::<StateSource>().unwrap();
            let resolver = SequenceStateResolver::new(source, reqwest::Client::new());
            PipelineCoordinator::new(
                resolver,
                WorkspaceManager::new(self.root.path()),
                self.runner.clone(),
                Arc::new(CommandBuilder::from_config(&Config::default())),
            )
            .with_object_store(self.store.clone(), UploadOptions::default(), false)
        }
    }

    fn create_request() -> CreateRequest {
        CreateRequest {
            output_format: "{state}.pbf".to_string(),
            cleanup_mode: CleanupMode::None,
            resume: false,
            collect_info: false,
            lock_bucket: Some("geo-dumps".to_string()),
            target: PublishTarget {
                bucket: "geo-dumps".to_string(),
                acl: Some(CannedAcl::PublicRead),
            },
            description: None,
        }
    }

    #[tokio::test]
    async fn test_create_success_walks_all_phases() {
        let harness = Harness::new(
            ScriptedRunner::new(),
            MemoryObjectStore::new().with_bucket("geo-dumps"),
        );
        let coordinator = harness.coordinator("42");

        let outcome = coordinator.create(&create_request()).await.unwrap();

        assert_eq!(outcome.run.state, SequenceNumber::new(42));
        assert_eq!(outcome.artifact, harness.root.path().join("42/ng/42.pbf"));
        assert_eq!(outcome.stages[0].artifact, harness.root.path().join("42/pg/42.dmp"));
        assert_eq!(outcome.metadata.unwrap().sequence_number, Some(SequenceNumber::new(42)));
        assert!(harness.store.object("geo-dumps", "42.pbf").is_some());
        assert!(harness.store.object("geo-dumps", LOCK_KEY).is_none());
        assert_eq!(
            coordinator.phase_history(),
            vec![
                PipelinePhase::Idle,
                PipelinePhase::ResolvingState,
                PipelinePhase::Locking,
                PipelinePhase::RunningPrimaryStage,
                PipelinePhase::RunningConversionStage,
                PipelinePhase::Publishing,
                PipelinePhase::Cleanup,
                PipelinePhase::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn test_conversion_failure_releases_lock_and_skips_publish() {
        let harness = Harness::new(
            ScriptedRunner::new().exit_with("planet-dump-ng", 2),
            MemoryObjectStore::new().with_bucket("geo-dumps"),
        );
        let coordinator = harness.coordinator("42");

        let err = coordinator.create(&create_request()).await.unwrap_err();

        assert_eq!(err.exit_code().code(), 101);
        assert!(harness.store.object("geo-dumps", LOCK_KEY).is_none());
        assert_eq!(harness.store.calls_of(StoreOperation::DeleteObject).len(), 1);
        assert!(harness.store.calls_of(StoreOperation::UploadFile).is_empty());
        assert_eq!(coordinator.phase(), PipelinePhase::Failed);
        assert!(!coordinator.phase_history().contains(&PipelinePhase::Publishing));
    }

    #[tokio::test]
    async fn test_existing_key_fails_with_collision_code() {
        let harness = Harness::new(
            ScriptedRunner::new(),
            MemoryObjectStore::new().with_object("geo-dumps", "42.pbf", "old"),
        );
        let err = harness.coordinator("42").create(&create_request()).await.unwrap_err();
        assert_matches!(err, Error::ObjectAlreadyExists { .. });
    }

    #[tokio::test]
    async fn test_lock_release_failure_does_not_mask_success() {
        let harness = Harness::new(
            ScriptedRunner::new(),
            MemoryObjectStore::new()
                .with_bucket("geo-dumps")
                .failing(StoreOperation::DeleteObject),
        );
        let outcome = harness.coordinator("42").create(&create_request()).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_post_clean_workdir_runs_on_failure() {
        let harness = Harness::new(
            ScriptedRunner::new().exit_with("planet-dump-ng", 1),
            MemoryObjectStore::new().with_bucket("geo-dumps"),
        );
        let request = CreateRequest {
            cleanup_mode: CleanupMode::PostCleanWorkdir,
            ..create_request()
        };

        harness.coordinator("42").create(&request).await.unwrap_err();
        assert!(!harness.root.path().join("42").exists());
    }

    #[tokio::test]
    async fn test_pg_dump_rejects_extended_cleanup() {
        let harness = Harness::new(ScriptedRunner::new(), MemoryObjectStore::new());
        let request = PgDumpRequest {
            output_format: "{state}.pbf".to_string(),
            cleanup_mode: CleanupMode::PostCleanAll,
            resume: false,
            lock_bucket: None,
        };
        let err = harness.coordinator("42").pg_dump(&request).await.unwrap_err();
        assert_matches!(err, Error::Config(_));
        assert!(harness.runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_pg_dump_stops_after_primary_stage() {
        let harness = Harness::new(ScriptedRunner::new(), MemoryObjectStore::new());
        let request = PgDumpRequest {
            output_format: "planet-{state}.pbf".to_string(),
            cleanup_mode: CleanupMode::None,
            resume: false,
            lock_bucket: None,
        };

        let outcome = harness.coordinator("7").pg_dump(&request).await.unwrap();

        assert_eq!(outcome.artifact, harness.root.path().join("7/pg/planet-7.dmp"));
        assert!(harness.runner.invocations_of("planet-dump-ng").is_empty());
        assert!(outcome.metadata.is_none());
    }

    #[tokio::test]
    async fn test_terminated_run_reports_terminated() {
        let registry = Arc::new(ProcessRegistry::new());
        registry.terminate_all(planet_dumper_exec::TerminationSignal::Interrupt, None);

        let harness = Harness::new(
            ScriptedRunner::new(),
            MemoryObjectStore::new().with_bucket("geo-dumps"),
        );
        let coordinator = harness.coordinator("42").with_registry(registry);

        let err = coordinator.create(&create_request()).await.unwrap_err();
        assert_matches!(err, Error::Terminated);
        assert!(harness.runner.invocations().is_empty());
        assert!(harness.store.object("geo-dumps", LOCK_KEY).is_none());
    }

    #[tokio::test]
    async fn test_signal_during_upload_reports_terminated() {
        let registry = Arc::new(ProcessRegistry::new());
        let store = Arc::new(SignalDuringUpload {
            inner: MemoryObjectStore::new().with_bucket("geo-dumps"),
            registry: Arc::clone(&registry),
        });
        let root = TempDir::new().unwrap();
        let resolver = SequenceStateResolver::new("42".parse().unwrap(), reqwest::Client::new());
        let coordinator = PipelineCoordinator::new(
            resolver,
            WorkspaceManager::new(root.path()),
            Arc::new(ScriptedRunner::new()),
            Arc::new(CommandBuilder::from_config(&Config::default())),
        )
        .with_registry(Arc::clone(&registry))
        .with_object_store(store.clone(), UploadOptions::default(), false);

        let err = coordinator.create(&create_request()).await.unwrap_err();

        assert_matches!(err, Error::Terminated);
        assert_eq!(err.exit_code().code(), 130);
        assert!(store.inner.object("geo-dumps", "42.pbf").is_some());
        assert_eq!(coordinator.phase(), PipelinePhase::Failed);
    }

    #[tokio::test]
    async fn test_relative_working_root() {
        let root = tempfile::Builder::new()
            .prefix("relative-root")
            .tempdir_in(".")
            .unwrap();
        assert!(root.path().is_relative());

        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(MemoryObjectStore::new().with_bucket("geo-dumps"));
        let resolver = SequenceStateResolver::new("42".parse().unwrap(), reqwest::Client::new());
        let coordinator = PipelineCoordinator::new(
            resolver,
            WorkspaceManager::new(root.path()),
            runner.clone(),
            Arc::new(CommandBuilder::from_config(&Config::default())),
        )
        .with_object_store(store.clone(), UploadOptions::default(), false);

        let outcome = coordinator.create(&create_request()).await.unwrap();

        let expected = std::env::current_dir()
            .unwrap()
            .join(root.path().file_name().unwrap())
            .join("42/ng/42.pbf");
        assert_eq!(outcome.artifact, expected);
        assert!(expected.exists());

        let conversion = &runner.invocations_of("planet-dump-ng")[0];
        let dump_file = conversion.flag_value("--dump-file").unwrap();
        assert!(Path::new(dump_file).is_absolute());
        assert!(Path::new(dump_file).exists());
        assert!(store.object("geo-dumps", "42.pbf").is_some());
    }
}
