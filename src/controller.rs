//! Worker lifecycle: launch, output streaming, completion, and stop.
//!
//! A [`Controller`] tracks at most one worker. The tracked handle is the only
//! shared mutable state; `Running` means a handle is present and `Idle` means
//! it is not. `start` is the only writer of the handle. Whichever of the
//! completion waiter and `stop` releases the handle first reports the run's
//! terminal status; the other finds the slot empty (or owned by a newer run)
//! and leaves it alone.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::command::build_command;
use crate::config::{Resolver, RunConfiguration};
use crate::error::{StartError, StopError};
use crate::locator::{ExecutableLocator, PathLocator};
use crate::settings::ControllerSettings;
use crate::sink::{decode_line, LineReader, OutputLine, OutputSink, RunStatus, StatusSink};
use crate::tree::{native_tree, terminate_tree, Escalation, ProcessTree};

/// Notice emitted after every run, however it ended.
pub const COMPLETED_NOTICE: &str = "> Test completed or stopped.";

/// Externally visible controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Idle,
    Running,
}

/// Identity of a launched run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    /// Unique identifier for this run.
    pub run_id: Uuid,
    /// OS process id of the worker.
    pub pid: u32,
    /// Full command line, program token first.
    pub argv: Vec<String>,
}

/// How a successful stop ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The worker tree was signalled and terminated.
    Stopped,
    /// The worker was already gone; only cleanup ran.
    AlreadyExited,
}

/// The tracked worker.
struct ProcessHandle {
    run_id: Uuid,
    pid: u32,
    started_at: Instant,
    stop_requested: bool,
    status: Arc<dyn StatusSink>,
}

type Slot = Arc<Mutex<Option<ProcessHandle>>>;

/// Launches and stops one worker process at a time.
#[derive(Clone)]
pub struct Controller {
    settings: Arc<ControllerSettings>,
    resolver: Resolver,
    escalation: Escalation,
    locator: Arc<dyn ExecutableLocator>,
    tree: Arc<dyn ProcessTree>,
    slot: Slot,
}

impl Controller {
    /// Creates a controller that searches for the worker on disk and uses the
    /// native process tree backend.
    pub fn new(settings: ControllerSettings) -> Self {
        let locator = Arc::new(PathLocator::new(
            settings.worker.program.clone(),
            settings.timeouts.locate_timeout(),
        ));
        let tree = native_tree(&settings.timeouts);
        Self::with_parts(settings, locator, tree)
    }

    /// Creates a controller with explicit collaborators.
    pub fn with_parts(
        settings: ControllerSettings,
        locator: Arc<dyn ExecutableLocator>,
        tree: Arc<dyn ProcessTree>,
    ) -> Self {
        Self {
            resolver: Resolver::from_settings(&settings),
            escalation: Escalation::from_settings(&settings.timeouts),
            settings: Arc::new(settings),
            locator,
            tree,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the settings this controller was built with.
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Returns the resolver used for launches.
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Returns the current state.
    pub fn state(&self) -> ControllerState {
        if lock(&self.slot).is_some() {
            ControllerState::Running
        } else {
            ControllerState::Idle
        }
    }

    /// Returns true while a worker is tracked.
    pub fn is_running(&self) -> bool {
        self.state() == ControllerState::Running
    }

    /// Returns the tracked worker's pid.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.slot).as_ref().map(|h| h.pid)
    }

    /// Launches the worker for `units` and returns without waiting for it.
    ///
    /// Output lines go to `output` from two background readers; `status`
    /// receives the terminal status exactly once.
    pub async fn start<O, S>(
        &self,
        config: &RunConfiguration,
        units: &[String],
        output: O,
        status: S,
    ) -> Result<RunInfo, StartError>
    where
        O: OutputSink + 'static,
        S: StatusSink + 'static,
    {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        if units.is_empty() {
            return Err(StartError::NoSelection);
        }

        let argv = build_command(&self.settings.worker, &self.resolver, config, units)?;

        let Some(program) = self.locator.locate().await else {
            return Err(StartError::ExecutableMissing {
                program: self.settings.worker.program.clone(),
            });
        };

        let mut cmd = Command::new(&program);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let (mut child, run_id, pid) = self.spawn_tracked(&mut cmd, Arc::new(status))?;

        tracing::info!(
            run_id = %run_id,
            pid,
            program = ?program,
            argv = ?argv,
            "worker started"
        );

        let output: Arc<dyn OutputSink> = Arc::new(output);
        let monitors = [
            child
                .stdout
                .take()
                .map(|pipe| spawn_monitor(pipe, Stream::Stdout, output.clone())),
            child
                .stderr
                .take()
                .map(|pipe| spawn_monitor(pipe, Stream::Stderr, output.clone())),
        ];

        tokio::spawn(wait_for_exit(
            child,
            run_id,
            monitors.into_iter().flatten().collect(),
            output,
            self.slot.clone(),
            self.settings.timeouts.drain_timeout(),
        ));

        Ok(RunInfo { run_id, pid, argv })
    }

    /// Spawns under the slot lock so two concurrent starts cannot both launch.
    fn spawn_tracked(
        &self,
        cmd: &mut Command,
        status: Arc<dyn StatusSink>,
    ) -> Result<(Child, Uuid, u32), StartError> {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            return Err(StartError::AlreadyRunning);
        }

        let child = cmd
            .spawn()
            .map_err(|e| StartError::SpawnFailed(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| StartError::SpawnFailed("worker exited before it was tracked".into()))?;

        let run_id = Uuid::new_v4();
        *slot = Some(ProcessHandle {
            run_id,
            pid,
            started_at: Instant::now(),
            stop_requested: false,
            status,
        });
        Ok((child, run_id, pid))
    }

    /// Terminates the worker and every process it started.
    ///
    /// Returns once termination has been issued; the background readers may
    /// still be winding down. Cleanup runs on every path.
    pub async fn stop(&self) -> Result<StopOutcome, StopError> {
        let (run_id, pid) = {
            let mut slot = lock(&self.slot);
            let handle = slot.as_mut().ok_or(StopError::NotRunning)?;
            handle.stop_requested = true;
            (handle.run_id, handle.pid)
        };

        let outcome = if self.tree.is_alive(pid) {
            tracing::info!(run_id = %run_id, pid, "stopping worker");
            terminate_tree(self.tree.as_ref(), pid, &self.escalation).await;
            StopOutcome::Stopped
        } else {
            tracing::info!(run_id = %run_id, pid, "worker already exited");
            StopOutcome::AlreadyExited
        };

        settle(&self.slot, run_id, None);
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn line(self, text: String) -> OutputLine {
        match self {
            Stream::Stdout => OutputLine::Stdout(text),
            Stream::Stderr => OutputLine::Stderr(text),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

fn spawn_monitor<R>(pipe: R, stream: Stream, sink: Arc<dyn OutputSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(monitor_stream(pipe, stream, sink))
}

/// Forwards lines until end-of-stream. Read errors end the monitor quietly;
/// they are expected once the worker exits.
async fn monitor_stream<R>(pipe: R, stream: Stream, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = LineReader::new(pipe);
    let mut buf = Vec::new();
    let mut lines = 0usize;

    loop {
        buf.clear();
        match reader.next_line(&mut buf).await {
            Ok(false) => break,
            Ok(true) => {
                lines += 1;
                sink.on_output(stream.line(decode_line(&buf)));
            }
            Err(e) => {
                tracing::debug!(stream = stream.name(), error = %e, "stream closed");
                break;
            }
        }
    }

    tracing::debug!(stream = stream.name(), lines, "stream monitor finished");
}

/// Waits for the worker to exit, reports how it exited, and settles the run.
async fn wait_for_exit(
    mut child: Child,
    run_id: Uuid,
    monitors: Vec<JoinHandle<()>>,
    output: Arc<dyn OutputSink>,
    slot: Slot,
    drain_timeout: Duration,
) {
    let waited = child.wait().await;

    // Let the readers deliver the tail of the output first. Descendants that
    // inherited the pipes can hold them open, hence the bound.
    let drain = async {
        for monitor in monitors {
            let _ = monitor.await;
        }
    };
    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        tracing::debug!(run_id = %run_id, "output still open after worker exit");
    }

    let failure = match waited {
        Ok(exit) => {
            tracing::info!(run_id = %run_id, code = ?exit.code(), "worker exited");
            match exit.code() {
                Some(0) => {}
                Some(code) => output.on_output(OutputLine::Notice(format!(
                    "> Process exited with code: {}",
                    code
                ))),
                None => output.on_output(OutputLine::Notice(
                    "> Process terminated by signal".to_string(),
                )),
            }
            None
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "failed to wait for worker");
            Some(format!("failed to wait for worker: {}", e))
        }
    };

    output.on_output(OutputLine::Notice(COMPLETED_NOTICE.to_string()));
    settle(&slot, run_id, failure);
}

/// Releases the handle of `run_id`, if still tracked, and reports its status.
fn settle(slot: &Mutex<Option<ProcessHandle>>, run_id: Uuid, failure: Option<String>) {
    let released = {
        let mut slot = lock(slot);
        if slot.as_ref().is_some_and(|h| h.run_id == run_id) {
            slot.take()
        } else {
            None
        }
    };

    let Some(handle) = released else {
        return;
    };

    let status = match failure {
        _ if handle.stop_requested => RunStatus::Stopped,
        Some(message) => RunStatus::Error(message),
        None => RunStatus::Completed,
    };
    tracing::info!(
        run_id = %run_id,
        pid = handle.pid,
        elapsed = ?handle.started_at.elapsed(),
        status = ?status,
        "run finished"
    );
    handle.status.on_status(status);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
