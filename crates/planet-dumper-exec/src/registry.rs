//! Process-wide registry of running child processes.
//!
//! Every child spawned by [`SystemProcessRunner`](crate::SystemProcessRunner)
//! is tracked here until it exits, so that a termination signal received by
//! planet-dumper can be forwarded to all outstanding children.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Signal forwarded to tracked children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    Kill,
}

/// A child process currently tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProcess {
    pub pid: u32,
    pub executable: String,
}

/// Result of a [`ProcessRegistry::terminate_all`] call.
#[derive(Debug, Clone, Default)]
pub struct TerminationReport {
    /// Children tracked when termination started.
    pub pre_termination: Vec<TrackedProcess>,
    /// Children the signal was delivered to.
    pub signalled: Vec<TrackedProcess>,
}

/// Registry of spawned children, owned by the process entry point.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    children: Mutex<BTreeMap<u32, String>>,
    terminated: AtomicBool,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a child until the returned guard is dropped.
    pub fn register(&self, pid: u32, executable: &str) -> RegistrationGuard<'_> {
        debug!(pid, executable, "tracking child process");
        self.children.lock().insert(pid, executable.to_string());
        RegistrationGuard { registry: self, pid }
    }

    /// Stop tracking a child. Returns whether it was tracked.
    pub fn unregister(&self, pid: u32) -> bool {
        self.children.lock().remove(&pid).is_some()
    }

    /// Snapshot of the currently tracked children.
    pub fn tracked(&self) -> Vec<TrackedProcess> {
        self.children
            .lock()
            .iter()
            .map(|(pid, executable)| TrackedProcess {
                pid: *pid,
                executable: executable.clone(),
            })
            .collect()
    }

    /// Whether [`terminate_all`](Self::terminate_all) has been invoked.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Signal every tracked child.
    ///
    /// When `force_kill_after` is set and a tokio runtime is available,
    /// children still tracked after the timeout receive `SIGKILL`.
    pub fn terminate_all(
        self: &Arc<Self>,
        signal: TerminationSignal,
        force_kill_after: Option<Duration>,
    ) -> TerminationReport {
        self.terminated.store(true, Ordering::SeqCst);

        let pre_termination = self.tracked();
        let mut signalled = Vec::with_capacity(pre_termination.len());

        for child in &pre_termination {
            match send_signal(child.pid, signal) {
                Ok(()) => {
                    info!(
                        pid = child.pid,
                        executable = %child.executable,
                        ?signal,
                        "signalled child process"
                    );
                    signalled.push(child.clone());
                }
                Err(e) => {
                    warn!(
                        pid = child.pid,
                        executable = %child.executable,
                        error = %e,
                        "failed to signal child process"
                    );
                }
            }
        }

        if let Some(timeout) = force_kill_after.filter(|_| !signalled.is_empty()) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let registry = Arc::clone(self);
                    handle.spawn(async move {
                        tokio::time::sleep(timeout).await;
                        for child in registry.tracked() {
                            warn!(
                                pid = child.pid,
                                executable = %child.executable,
                                "child still running, forcing kill"
                            );
                            if let Err(e) = send_signal(child.pid, TerminationSignal::Kill) {
                                warn!(pid = child.pid, error = %e, "failed to kill child process");
                            }
                        }
                    });
                }
                Err(_) => warn!("no async runtime available, skipping forced kill"),
            }
        }

        TerminationReport {
            pre_termination,
            signalled,
        }
    }
}

/// Unregisters a child from its registry when dropped.
#[derive(Debug)]
pub struct RegistrationGuard<'a> {
    registry: &'a ProcessRegistry,
    pid: u32,
}

impl RegistrationGuard<'_> {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.pid);
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: TerminationSignal) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        TerminationSignal::Interrupt => Signal::SIGINT,
        TerminationSignal::Terminate => Signal::SIGTERM,
        TerminationSignal::Kill => Signal::SIGKILL,
    };
    let pid = i32::try_from(pid)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), signal).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: TerminationSignal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signalling child processes is only supported on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_unregisters_on_drop() {
        let registry = ProcessRegistry::new();
        {
            let guard = registry.register(4242, "pg_dump");
            assert_eq!(guard.pid(), 4242);
            assert_eq!(
                registry.tracked(),
                vec![TrackedProcess {
                    pid: 4242,
                    executable: "pg_dump".to_string()
                }]
            );
        }
        assert!(registry.tracked().is_empty());
    }

    #[test]
    fn test_unregister_unknown_pid() {
        let registry = ProcessRegistry::new();
        assert!(!registry.unregister(1));
    }

    #[test]
    fn test_terminate_all_with_no_children() {
        let registry = Arc::new(ProcessRegistry::new());
        assert!(!registry.is_terminated());

        let report = registry.terminate_all(TerminationSignal::Interrupt, None);
        assert!(report.pre_termination.is_empty());
        assert!(report.signalled.is_empty());
        assert!(registry.is_terminated());
    }
}
