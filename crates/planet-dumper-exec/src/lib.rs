//! # planet-dumper-exec
//!
//! External tool execution for planet-dumper.
//!
//! This crate provides functionality for:
//! - Running external tools without a shell, forwarding their stderr to the log
//! - Tracking running children so a termination signal can reach all of them
//! - Managing per-state working directories and their cleanup policies
//! - Rendering artifact names from templates
//! - Detecting installed tools
//!
//! The `test-support` feature adds `ScriptedRunner`, a runner that plays
//! back scripted results instead of spawning tools.
//!
//! ## Example
//!
//! ```no_run
//! use planet_dumper_exec::{Invocation, ProcessRegistry, ProcessRunner, SystemProcessRunner};
//! use std::sync::Arc;
//!
//! # async fn run() -> planet_dumper_common::Result<()> {
//! let registry = Arc::new(ProcessRegistry::new());
//! let runner = SystemProcessRunner::new(Arc::clone(&registry));
//!
//! let output = runner.run(&Invocation::new("pg_dump").arg("--version")).await?;
//! println!("exit code: {:?}", output.exit_code);
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;
pub mod template;
pub mod tools;
pub mod workspace;

pub use registry::{
    ProcessRegistry, RegistrationGuard, TerminationReport, TerminationSignal, TrackedProcess,
};
pub use runner::{Invocation, ProcessOutput, ProcessRunner, SystemProcessRunner};
#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedRunner;
pub use template::{primary_artifact_name, render_name, PRIMARY_EXTENSION};
pub use tools::{check_tool, check_tool_with_arg, check_tools, ToolInfo};
pub use workspace::{
    clear_directory, find_latest_artifact, remove_directory, RunDirectories, WorkspaceManager,
};
