//! In-process [`ProcessRunner`] that plays back scripted results.
//!
//! Used to drive the pipeline without the real dump tools installed. Each
//! executable can be given an exit code and stdout; successful invocations
//! create the files named by their `--file=` and `--pbf=` arguments.

use crate::runner::{Invocation, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use planet_dumper_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

const OUTPUT_FLAGS: [&str; 2] = ["--file", "--pbf"];

#[derive(Debug, Default)]
pub struct ScriptedRunner {
    exit_codes: Mutex<HashMap<String, i32>>,
    stdout: Mutex<HashMap<String, String>>,
    undispatchable: Mutex<HashSet<String>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `executable` exit with `code`. Unscripted executables exit 0.
    pub fn exit_with(self, executable: &str, code: i32) -> Self {
        self.exit_codes.lock().insert(executable.to_string(), code);
        self
    }

    pub fn stdout_for(self, executable: &str, stdout: &str) -> Self {
        self.stdout
            .lock()
            .insert(executable.to_string(), stdout.to_string());
        self
    }

    /// Make `executable` fail to spawn.
    pub fn fail_dispatch(self, executable: &str) -> Self {
        self.undispatchable.lock().insert(executable.to_string());
        self
    }

    /// Every invocation seen so far, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn invocations_of(&self, executable: &str) -> Vec<Invocation> {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.executable == executable)
            .cloned()
            .collect()
    }

    fn output_paths(invocation: &Invocation) -> Vec<PathBuf> {
        OUTPUT_FLAGS
            .iter()
            .filter_map(|flag| invocation.flag_value(flag))
            .map(|value| match &invocation.current_dir {
                Some(dir) => dir.join(value),
                None => PathBuf::from(value),
            })
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.invocations.lock().push(invocation.clone());
        let executable = invocation.executable.as_str();

        if self.undispatchable.lock().contains(executable) {
            return Err(Error::Dispatch {
                executable: executable.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "scripted dispatch failure",
                ),
            });
        }

        let code = self.exit_codes.lock().get(executable).copied().unwrap_or(0);
        if code == 0 {
            for path in Self::output_paths(invocation) {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, format!("{executable} output\n")).await?;
            }
        }

        Ok(ProcessOutput {
            exit_code: Some(code),
            stdout: self.stdout.lock().get(executable).cloned().unwrap_or_default(),
            stderr: String::new(),
        })
    }
}
