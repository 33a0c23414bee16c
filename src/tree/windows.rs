//! Windows backend: TerminateProcess per pid plus `taskkill /T` as the
//! tree-wide fallback, since console workers have no graceful signal.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::Command;

use super::{collect_descendants, probe_alive, snapshot, ProcessTree};

/// Process tree on Windows.
#[derive(Debug, Clone, Copy)]
pub struct TaskkillTree {
    fallback_timeout: Duration,
}

impl Default for TaskkillTree {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TaskkillTree {
    /// Creates the backend with a bound on the `taskkill` fallback.
    pub fn new(fallback_timeout: Duration) -> Self {
        Self { fallback_timeout }
    }

    fn terminate_one(&self, pid: u32) -> io::Result<()> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match system.process(pid) {
            None => Err(io::ErrorKind::NotFound.into()),
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "TerminateProcess failed",
            )),
        }
    }
}

#[async_trait]
impl ProcessTree for TaskkillTree {
    fn is_alive(&self, pid: u32) -> bool {
        probe_alive(pid)
    }

    fn descendants(&self, root: u32) -> Vec<u32> {
        collect_descendants(&snapshot(), root)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        self.terminate_one(pid)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        self.terminate_one(pid)
    }

    async fn kill_tree_fallback(&self, root: u32) {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/F", "/T", "/PID", &root.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.fallback_timeout, cmd.status()).await {
            Ok(Ok(status)) => tracing::debug!(root, ?status, "taskkill finished"),
            Ok(Err(e)) => tracing::debug!(root, error = %e, "taskkill failed to run"),
            Err(_) => tracing::debug!(root, "taskkill timed out"),
        }
    }
}
