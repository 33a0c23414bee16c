//! Worker command line construction.

use crate::config::{ResolvedRun, Resolver, RunConfiguration};
use crate::error::ConfigError;
use crate::settings::WorkerSettings;

/// Builds the full argv, program token first.
///
/// Layout: program, mode flags, optional `-M:<memory>`, `-D:<seconds>`,
/// `-TL:<seconds>`, then each unit tag in selection order.
pub fn build_argv(worker: &WorkerSettings, run: &ResolvedRun, units: &[String]) -> Vec<String> {
    let mut argv = Vec::with_capacity(worker.mode_flags.len() + units.len() + 4);
    argv.push(worker.program.clone());
    argv.extend(worker.mode_flags.iter().cloned());

    if let Some(memory) = &run.memory {
        argv.push(format!("-M:{}", memory));
    }
    argv.push(format!("-D:{}", run.duration));
    argv.push(format!("-TL:{}", run.time_limit));

    argv.extend(units.iter().cloned());
    argv
}

/// Resolves `config` for `units` and builds the argv.
pub fn build_command(
    worker: &WorkerSettings,
    resolver: &Resolver,
    config: &RunConfiguration,
    units: &[String],
) -> Result<Vec<String>, ConfigError> {
    let run = resolver.resolve(config, units.len())?;
    Ok(build_argv(worker, &run, units))
}
