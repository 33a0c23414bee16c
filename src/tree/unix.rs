//! Signal-based backend: SIGTERM first, SIGKILL when forced.

use std::io;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use super::{collect_descendants, probe_alive, snapshot, ProcessTree};

/// Process tree on Unix, enumerated from the process table and signalled
/// per pid.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTree;

impl SignalTree {
    /// Creates the backend.
    pub fn new() -> Self {
        Self
    }

    fn send(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(io::ErrorKind::NotFound.into()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

#[async_trait]
impl ProcessTree for SignalTree {
    fn is_alive(&self, pid: u32) -> bool {
        probe_alive(pid)
    }

    fn descendants(&self, root: u32) -> Vec<u32> {
        collect_descendants(&snapshot(), root)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        self.send(pid, Signal::SIGTERM)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        self.send(pid, Signal::SIGKILL)
    }
}
