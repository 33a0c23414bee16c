//! Worker executable lookup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

/// Finds the worker binary before a launch.
#[async_trait]
pub trait ExecutableLocator: Send + Sync {
    /// Returns the path to launch, or `None` if the worker is not available.
    async fn locate(&self) -> Option<PathBuf>;

    /// Returns whether the worker is available.
    async fn exists(&self) -> bool {
        self.locate().await.is_some()
    }
}

/// Looks in the current directory, then on `PATH`, within a time bound.
///
/// A lookup that times out or fails counts as not found.
#[derive(Debug, Clone)]
pub struct PathLocator {
    program: String,
    timeout: Duration,
    search: fn(&str) -> Option<PathBuf>,
}

impl PathLocator {
    /// Creates a locator for `program` bounded by `timeout`.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            search,
        }
    }

    /// Replaces the filesystem search run on the blocking pool.
    #[cfg(test)]
    pub(crate) fn with_search(mut self, search: fn(&str) -> Option<PathBuf>) -> Self {
        self.search = search;
        self
    }

    /// Returns the program being searched for.
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ExecutableLocator for PathLocator {
    async fn locate(&self) -> Option<PathBuf> {
        let program = self.program.clone();
        let search = self.search;
        let lookup = tokio::task::spawn_blocking(move || search(&program));

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, program = %self.program, "executable lookup failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    timeout = ?self.timeout,
                    "executable lookup timed out"
                );
                None
            }
        }
    }
}

fn search(program: &str) -> Option<PathBuf> {
    let candidates = candidate_names(program);

    // Paths with a directory component are not searched for on PATH.
    if Path::new(program).components().count() > 1 {
        return candidates
            .into_iter()
            .map(PathBuf::from)
            .find(|p| is_executable(p));
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(found) = candidates.iter().map(|c| cwd.join(c)).find(|p| is_executable(p)) {
            return Some(found);
        }
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| candidates.iter().map(move |c| dir.join(c)))
        .find(|p| is_executable(p))
}

fn candidate_names(program: &str) -> Vec<String> {
    if cfg!(windows) && !program.to_ascii_lowercase().ends_with(".exe") {
        vec![format!("{}.exe", program), program.to_string()]
    } else {
        vec![program.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
