//! Running the external tool stages.

use super::command::CommandBuilder;
use planet_dumper_common::{Error, Result, StageKind};
use planet_dumper_exec::{
    clear_directory, find_latest_artifact, ProcessOutput, ProcessRunner, PRIMARY_EXTENSION,
};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONVERSION_EXTENSION: &str = "pbf";

/// What a stage should produce.
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Directory the artifact is written to.
    pub output_dir: PathBuf,
    /// File name of the artifact inside `output_dir`.
    pub output_name: String,
    /// Artifact of the previous stage, if the stage consumes one.
    pub input: Option<PathBuf>,
    /// Reuse an artifact left by an earlier run instead of running the tool.
    pub resume: bool,
}

impl StageRequest {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_name)
    }
}

/// Outcome of a successful stage.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub kind: StageKind,
    /// `Some(0)` for a stage that ran; also `Some(0)` for a resumed stage.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub artifact: PathBuf,
    pub size_bytes: Option<u64>,
    /// The artifact came from an earlier run and the tool was not invoked.
    pub resumed: bool,
}

/// Runs the primary dump or the conversion stage.
pub struct DumpStageRunner {
    kind: StageKind,
    runner: Arc<dyn ProcessRunner>,
    commands: Arc<CommandBuilder>,
}

impl DumpStageRunner {
    pub fn new(
        kind: StageKind,
        runner: Arc<dyn ProcessRunner>,
        commands: Arc<CommandBuilder>,
    ) -> Self {
        Self { kind, runner, commands }
    }

    pub fn primary(runner: Arc<dyn ProcessRunner>, commands: Arc<CommandBuilder>) -> Self {
        Self::new(StageKind::PrimaryDump, runner, commands)
    }

    pub fn conversion(runner: Arc<dyn ProcessRunner>, commands: Arc<CommandBuilder>) -> Self {
        Self::new(StageKind::Conversion, runner, commands)
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    fn artifact_extension(&self, request: &StageRequest) -> String {
        match self.kind {
            StageKind::PrimaryDump => PRIMARY_EXTENSION.to_string(),
            _ => Path::new(&request.output_name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or(DEFAULT_CONVERSION_EXTENSION)
                .to_string(),
        }
    }

    /// Run the stage, or reuse the newest matching artifact when resuming.
    ///
    /// Without `resume` the output directory is emptied first.
    pub async fn run(&self, request: &StageRequest) -> Result<StageResult> {
        let extension = self.artifact_extension(request);

        if request.resume {
            if let Some(existing) = find_latest_artifact(&request.output_dir, &extension).await? {
                info!(
                    stage = %self.kind,
                    artifact = %existing.display(),
                    "resuming from existing artifact"
                );
                return Ok(StageResult {
                    kind: self.kind,
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                    size_bytes: file_size(&existing).await,
                    artifact: existing,
                    resumed: true,
                });
            }
        } else {
            clear_directory(&request.output_dir, &[]).await?;
        }
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let artifact = request.output_path();
        let invocation = match self.kind {
            StageKind::PrimaryDump => self.commands.primary_dump(&artifact),
            StageKind::Conversion => {
                let input = request.input.as_deref().ok_or_else(|| {
                    Error::general("the conversion stage needs the primary dump as input")
                })?;
                self.commands.conversion(input, &artifact, request.resume)
            }
            StageKind::Info => return Err(Error::general("the info stage is run by InfoCollector")),
        };

        info!(
            stage = %self.kind,
            executable = %invocation.executable,
            args = ?invocation.argv(),
            "executing command"
        );
        let output = self.runner.run(&invocation).await?;
        check_exit(self.kind, &invocation.executable, &invocation.argv(), &output)?;

        let size_bytes = file_size(&artifact).await;
        if size_bytes.is_none() {
            warn!(
                stage = %self.kind,
                artifact = %artifact.display(),
                "tool succeeded but its artifact is missing"
            );
        }
        info!(stage = %self.kind, artifact = %artifact.display(), size_bytes, "stage finished");

        Ok(StageResult {
            kind: self.kind,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            artifact,
            size_bytes,
            resumed: false,
        })
    }
}

/// Structural information about the final artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size_bytes: Option<u64>,
    /// JSON printed by the info tool.
    pub info: Value,
}

/// Runs the info tool against an artifact.
pub struct InfoCollector {
    runner: Arc<dyn ProcessRunner>,
    commands: Arc<CommandBuilder>,
}

impl InfoCollector {
    pub fn new(runner: Arc<dyn ProcessRunner>, commands: Arc<CommandBuilder>) -> Self {
        Self { runner, commands }
    }

    pub async fn collect(&self, artifact: &Path) -> Result<ArtifactInfo> {
        let invocation = self.commands.info(artifact);
        info!(
            executable = %invocation.executable,
            args = ?invocation.argv(),
            "collecting artifact info"
        );

        let output = self.runner.run(&invocation).await?;
        check_exit(StageKind::Info, &invocation.executable, &invocation.argv(), &output)?;

        let info: Value = serde_json::from_str(&output.stdout).map_err(|e| {
            Error::general(format!("{} printed invalid JSON: {e}", invocation.executable))
        })?;

        Ok(ArtifactInfo {
            path: artifact.to_path_buf(),
            size_bytes: file_size(artifact).await,
            info,
        })
    }
}

fn check_exit(
    kind: StageKind,
    executable: &str,
    args: &[String],
    output: &ProcessOutput,
) -> Result<()> {
    if output.success() {
        return Ok(());
    }

    error!(
        stage = %kind,
        executable,
        ?args,
        exit_code = ?output.exit_code,
        stderr = %output.stderr.trim_end(),
        "failure occurred during the execution of command"
    );
    Err(Error::stage_failed(kind, executable, output.exit_code))
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_matches::assert_matches;
    use planet_dumper_exec::ScriptedRunner;
    use tempfile::TempDir;

    fn commands() -> Arc<CommandBuilder> {
        Arc::new(CommandBuilder::from_config(&Config::default()))
    }

    fn request(dir: &Path, name: &str, resume: bool) -> StageRequest {
        StageRequest {
            output_dir: dir.to_path_buf(),
            output_name: name.to_string(),
            input: None,
            resume,
        }
    }

    #[tokio::test]
    async fn test_primary_stage_produces_artifact() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let stage = DumpStageRunner::primary(runner.clone(), commands());

        let result = stage.run(&request(dir.path(), "42.dmp", false)).await.unwrap();

        assert_eq!(result.artifact, dir.path().join("42.dmp"));
        assert!(!result.resumed);
        assert!(result.size_bytes.unwrap() > 0);
        assert_eq!(runner.invocations_of("pg_dump").len(), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_stage_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().exit_with("planet-dump-ng", 2));
        let stage = DumpStageRunner::conversion(runner, commands());

        let mut req = request(dir.path(), "42.pbf", false);
        req.input = Some(dir.path().join("42.dmp"));
        let err = stage.run(&req).await.unwrap_err();

        assert_matches!(
            err,
            Error::StageExecution { stage: StageKind::Conversion, exit_code: Some(2), .. }
        );
    }

    #[tokio::test]
    async fn test_resume_reuses_newest_artifact() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("old.dmp"), b"old").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::fs::write(dir.path().join("new.dmp"), b"newer").await.unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let stage = DumpStageRunner::primary(runner.clone(), commands());
        let result = stage.run(&request(dir.path(), "42.dmp", true)).await.unwrap();

        assert!(result.resumed);
        assert_eq!(result.artifact, dir.path().join("new.dmp"));
        assert_eq!(result.size_bytes, Some(5));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_without_resume_directory_is_cleared() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("stale.dmp"), b"stale").await.unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let stage = DumpStageRunner::primary(runner.clone(), commands());
        stage.run(&request(dir.path(), "42.dmp", false)).await.unwrap();

        assert!(!dir.path().join("stale.dmp").exists());
        assert!(dir.path().join("42.dmp").exists());
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_without_artifact_passes_resume_flag() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let stage = DumpStageRunner::conversion(runner.clone(), commands());

        let mut req = request(dir.path(), "42.pbf", true);
        req.input = Some(PathBuf::from("/work/42/pg/42.dmp"));
        let result = stage.run(&req).await.unwrap();

        assert!(!result.resumed);
        let invocation = &runner.invocations_of("planet-dump-ng")[0];
        assert!(invocation.args.contains(&"--resume".to_string()));
        assert_eq!(invocation.current_dir.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_info_collector_parses_json() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("42.pbf");
        tokio::fs::write(&artifact, b"pbf").await.unwrap();

        let runner = Arc::new(ScriptedRunner::new().stdout_for("osmium", r#"{"file":{"size":3}}"#));
        let info = InfoCollector::new(runner, commands()).collect(&artifact).await.unwrap();

        assert_eq!(info.info["file"]["size"], 3);
        assert_eq!(info.size_bytes, Some(3));
    }

    #[tokio::test]
    async fn test_info_collector_failures() {
        let artifact = PathBuf::from("/nonexistent/42.pbf");

        let runner = Arc::new(ScriptedRunner::new().exit_with("osmium", 1));
        let err = InfoCollector::new(runner, commands()).collect(&artifact).await.unwrap_err();
        assert_eq!(err.exit_code().code(), 108);

        let runner = Arc::new(ScriptedRunner::new().stdout_for("osmium", "not json"));
        let err = InfoCollector::new(runner, commands()).collect(&artifact).await.unwrap_err();
        assert_matches!(err, Error::General(_));
    }
}
