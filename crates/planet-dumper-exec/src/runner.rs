//! Spawning external tools with live output forwarding.

use crate::registry::ProcessRegistry;
use async_trait::async_trait;
use planet_dumper_common::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// A fully resolved external tool invocation.
///
/// Arguments are passed to the child as an array, never through a shell.
///
/// # Example
///
/// ```
/// use planet_dumper_exec::Invocation;
///
/// let invocation = Invocation::new("pg_dump")
///     .arg("--format=custom")
///     .arg("--file=/work/42/pg/42.dmp");
/// assert_eq!(invocation.argv(), vec!["--format=custom", "--file=/work/42/pg/42.dmp"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub executable: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    /// Forward stdout lines to the log as well as capturing them.
    pub log_stdout: bool,
}

impl Invocation {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Subcommand placed before all other arguments.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Environment override layered on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn log_stdout(mut self, enabled: bool) -> Self {
        self.log_stdout = enabled;
        self
    }

    /// The argument vector handed to the child (subcommand first).
    pub fn argv(&self) -> Vec<String> {
        self.command
            .iter()
            .cloned()
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Find the value of a `--name=value` style argument.
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        let prefix = format!("{name}=");
        self.args.iter().find_map(|a| a.strip_prefix(prefix.as_str()))
    }
}

/// Output captured from a finished process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external tools.
///
/// A clean non-zero exit is reported through [`ProcessOutput::exit_code`];
/// only failure to start the child is an `Err`.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}

/// [`ProcessRunner`] backed by tokio child processes.
pub struct SystemProcessRunner {
    registry: Arc<ProcessRegistry>,
}

impl SystemProcessRunner {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let executable = invocation.executable.as_str();
        let argv = invocation.argv();
        debug!(executable, args = ?argv, "running command");

        let mut cmd = Command::new(executable);
        cmd.args(&argv)
            .envs(invocation.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = invocation.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| Error::Dispatch {
            executable: executable.to_string(),
            source,
        })?;

        let pid = child.id();
        let _tracked = pid.map(|pid| self.registry.register(pid, executable));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr, status) = tokio::join!(
            collect_lines(stdout, executable, pid, OutputStream::Stdout, invocation.log_stdout),
            collect_lines(stderr, executable, pid, OutputStream::Stderr, true),
            child.wait(),
        );

        let status = status?;
        let output = ProcessOutput {
            exit_code: status.code(),
            stdout: stdout?,
            stderr: stderr?,
        };

        debug!(executable, pid, exit_code = ?output.exit_code, "command exited");
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Read a child stream to the end, forwarding each non-empty line to the log.
async fn collect_lines<R>(
    reader: Option<R>,
    executable: &str,
    pid: Option<u32>,
    stream: OutputStream,
    forward: bool,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let chunk = String::from_utf8_lossy(&buf);
        let line = chunk.trim_end_matches(['\r', '\n']);
        if forward && !line.is_empty() {
            match stream {
                OutputStream::Stderr => info!(executable, pid, stream = "stderr", "{line}"),
                OutputStream::Stdout => debug!(executable, pid, stream = "stdout", "{line}"),
            }
        }
        captured.push_str(&chunk);
    }

    Ok(captured)
}
