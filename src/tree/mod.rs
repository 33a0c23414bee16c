//! Process tree termination.
//!
//! The escalation is platform-neutral: signal every descendant and then the
//! root, wait a bounded grace period, force-kill whatever is left, and finally
//! give the backend a chance to run its own tree-kill. Enumeration and
//! signalling live behind [`ProcessTree`], with one backend per OS family
//! selected at build time.
//!
//! Backends report a process that vanished mid-escalation as
//! [`std::io::ErrorKind::NotFound`]; the escalation swallows those.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::SignalTree as NativeTree;
#[cfg(windows)]
pub use windows::TaskkillTree as NativeTree;

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::settings::TimeoutSettings;

/// OS capability to enumerate and signal a process tree.
#[async_trait]
pub trait ProcessTree: Send + Sync {
    /// Returns whether `pid` is running. Zombies are not running.
    fn is_alive(&self, pid: u32) -> bool;

    /// Returns every descendant of `root`, excluding `root`.
    fn descendants(&self, root: u32) -> Vec<u32>;

    /// Asks `pid` to exit.
    fn terminate(&self, pid: u32) -> io::Result<()>;

    /// Kills `pid` outright.
    fn kill(&self, pid: u32) -> io::Result<()>;

    /// Platform tree-kill keyed by the root, run when processes survived the
    /// forced kill pass. Failures are logged, never returned.
    async fn kill_tree_fallback(&self, _root: u32) {}
}

/// Returns the backend for the build target.
#[cfg(unix)]
pub fn native_tree(_settings: &TimeoutSettings) -> Arc<dyn ProcessTree> {
    Arc::new(NativeTree::new())
}

/// Returns the backend for the build target.
#[cfg(windows)]
pub fn native_tree(settings: &TimeoutSettings) -> Arc<dyn ProcessTree> {
    Arc::new(NativeTree::new(settings.fallback_kill_timeout()))
}

/// Timing of the escalation.
#[derive(Debug, Clone, Copy)]
pub struct Escalation {
    /// Wait after the graceful signal before force-killing.
    pub grace_period: Duration,
    /// Interval between liveness checks during the grace period.
    pub poll_interval: Duration,
}

impl Default for Escalation {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Escalation {
    /// Escalation timing from settings.
    pub fn from_settings(settings: &TimeoutSettings) -> Self {
        Self {
            grace_period: settings.grace_period(),
            ..Self::default()
        }
    }
}

/// What the escalation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// Processes sent the graceful signal, root included.
    pub signalled: usize,
    /// Processes still alive after the grace period.
    pub forced: Vec<u32>,
    /// Whether the backend fallback ran.
    pub fallback_used: bool,
}

/// Terminates `root` and all of its descendants.
pub async fn terminate_tree(
    tree: &dyn ProcessTree,
    root: u32,
    escalation: &Escalation,
) -> TerminationReport {
    let mut report = TerminationReport::default();

    let descendants = tree.descendants(root);
    for &pid in &descendants {
        swallow_race(pid, "terminate", tree.terminate(pid));
    }
    swallow_race(root, "terminate", tree.terminate(root));
    report.signalled = descendants.len() + 1;

    // Children forked after enumeration are picked up while the root is alive.
    let mut targets: Vec<u32> = descendants;
    for pid in tree.descendants(root) {
        if !targets.contains(&pid) {
            targets.push(pid);
        }
    }
    targets.push(root);

    let started = Instant::now();
    let survivors = loop {
        let alive: Vec<u32> = targets
            .iter()
            .copied()
            .filter(|&pid| tree.is_alive(pid))
            .collect();
        if alive.is_empty() || started.elapsed() >= escalation.grace_period {
            break alive;
        }
        tokio::time::sleep(escalation.poll_interval).await;
    };

    for &pid in &survivors {
        swallow_race(pid, "kill", tree.kill(pid));
    }

    if !survivors.is_empty() {
        tracing::warn!(root, forced = ?survivors, "processes outlived the grace period");
        tree.kill_tree_fallback(root).await;
        report.fallback_used = true;
    }

    report.forced = survivors;
    tracing::info!(
        root,
        signalled = report.signalled,
        forced = report.forced.len(),
        "process tree terminated"
    );
    report
}

fn swallow_race(pid: u32, action: &str, result: io::Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::trace!(pid, action, "process already gone");
        }
        Err(e) => {
            tracing::debug!(pid, action, error = %e, "signal failed");
        }
    }
}

/// Snapshot of the process table.
pub(crate) fn snapshot() -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
}

/// Liveness of a single pid, refreshing only that entry.
pub(crate) fn probe_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

/// Walks the parent links of `system` down from `root`.
pub(crate) fn collect_descendants(system: &System, root: u32) -> Vec<u32> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let root = Pid::from_u32(root);
    let mut seen: HashSet<Pid> = HashSet::from([root]);
    let mut queue = vec![root];
    let mut found = Vec::new();
    while let Some(current) = queue.pop() {
        for &child in children.get(&current).into_iter().flatten() {
            if seen.insert(child) {
                found.push(child.as_u32());
                queue.push(child);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted tree: each pid either dies on terminate, dies only on kill,
    /// or is already gone.
    #[derive(Default)]
    struct FakeTree {
        children: Vec<u32>,
        stubborn: Vec<u32>,
        vanished: Vec<u32>,
        alive: Mutex<HashSet<u32>>,
        calls: Mutex<Vec<String>>,
        fallback: Mutex<bool>,
    }

    impl FakeTree {
        fn new(root: u32, children: &[u32]) -> Self {
            let alive = std::iter::once(root).chain(children.iter().copied()).collect();
            Self {
                children: children.to_vec(),
                alive: Mutex::new(alive),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessTree for FakeTree {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }

        fn descendants(&self, _root: u32) -> Vec<u32> {
            self.children.clone()
        }

        fn terminate(&self, pid: u32) -> io::Result<()> {
            self.calls.lock().unwrap().push(format!("term {pid}"));
            if self.vanished.contains(&pid) {
                return Err(io::ErrorKind::NotFound.into());
            }
            if !self.stubborn.contains(&pid) {
                self.alive.lock().unwrap().remove(&pid);
            }
            Ok(())
        }

        fn kill(&self, pid: u32) -> io::Result<()> {
            self.calls.lock().unwrap().push(format!("kill {pid}"));
            self.alive.lock().unwrap().remove(&pid);
            Ok(())
        }

        async fn kill_tree_fallback(&self, _root: u32) {
            *self.fallback.lock().unwrap() = true;
        }
    }

    fn quick() -> Escalation {
        Escalation {
            grace_period: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn descendants_are_signalled_before_root() {
        let tree = FakeTree::new(1, &[2, 3]);
        let report = terminate_tree(&tree, 1, &quick()).await;

        assert_eq!(tree.calls(), vec!["term 2", "term 3", "term 1"]);
        assert_eq!(report.signalled, 3);
        assert!(report.forced.is_empty());
        assert!(!report.fallback_used);
    }

    #[tokio::test]
    async fn survivors_are_force_killed_after_grace() {
        let mut tree = FakeTree::new(1, &[2, 3]);
        tree.stubborn = vec![3];

        let started = Instant::now();
        let report = terminate_tree(&tree, 1, &quick()).await;

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(report.forced, vec![3]);
        assert!(tree.calls().contains(&"kill 3".to_string()));
        assert!(!tree.is_alive(3));
        assert!(*tree.fallback.lock().unwrap());
    }

    #[tokio::test]
    async fn vanished_descendants_are_ignored() {
        let mut tree = FakeTree::new(1, &[2, 3]);
        tree.vanished = vec![2];
        tree.alive.lock().unwrap().remove(&2);

        let report = terminate_tree(&tree, 1, &quick()).await;

        assert!(report.forced.is_empty());
        assert!(!tree.is_alive(1));
        assert!(!tree.is_alive(3));
    }

    #[test]
    fn own_process_is_alive_and_bogus_pid_is_not() {
        assert!(probe_alive(std::process::id()));
        assert!(!probe_alive(999_999_999));
    }
}
