//! Controller settings.
//!
//! Everything a run needs that is not part of the per-run configuration: the
//! worker program and its fixed flags, the defaults used by the auto
//! sentinel, the timeouts of the launch and stop paths, and the component
//! catalog. Settings load from TOML and every field has a default.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Worker program and the flags that precede every run's parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Program token; also the name the locator searches for.
    #[serde(default = "default_program")]
    pub program: String,
    /// Display/mode flags placed right after the program token.
    #[serde(default = "default_mode_flags")]
    pub mode_flags: Vec<String>,
}

fn default_program() -> String {
    "y-cruncher".to_string()
}

fn default_mode_flags() -> Vec<String> {
    vec![
        "colors:1".to_string(),
        "console:linux-vterm".to_string(),
        "stress".to_string(),
    ]
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            mode_flags: default_mode_flags(),
        }
    }
}

/// Values substituted for the auto sentinel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DefaultsSettings {
    /// Per-unit duration used when the duration field is "auto".
    #[serde(default = "default_duration_per_unit")]
    pub duration_per_unit_secs: u64,
    /// Per-unit budget multiplied by the unit count when the time limit is "auto".
    #[serde(default = "default_auto_time_limit_per_unit")]
    pub auto_time_limit_per_unit_secs: u64,
}

fn default_duration_per_unit() -> u64 {
    120
}

fn default_auto_time_limit_per_unit() -> u64 {
    1800
}

impl Default for DefaultsSettings {
    fn default() -> Self {
        Self {
            duration_per_unit_secs: default_duration_per_unit(),
            auto_time_limit_per_unit_secs: default_auto_time_limit_per_unit(),
        }
    }
}

/// Bounded waits on the launch and stop paths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Executable lookup bound.
    #[serde(default = "default_locate_timeout")]
    pub locate_timeout_secs: u64,
    /// Wait after the graceful signal before force-killing.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    /// Bound on the platform tree-kill command.
    #[serde(default = "default_fallback_kill_timeout")]
    pub fallback_kill_timeout_secs: u64,
    /// How long the completion waiter lets the stream monitors finish after exit.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Visibility window of a time-limit correction notice.
    #[serde(default = "default_correction_notice")]
    pub correction_notice_secs: u64,
}

fn default_locate_timeout() -> u64 {
    5
}

fn default_grace_period() -> u64 {
    3
}

fn default_fallback_kill_timeout() -> u64 {
    5
}

fn default_drain_timeout() -> u64 {
    1000
}

fn default_correction_notice() -> u64 {
    5
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            locate_timeout_secs: default_locate_timeout(),
            grace_period_secs: default_grace_period(),
            fallback_kill_timeout_secs: default_fallback_kill_timeout(),
            drain_timeout_ms: default_drain_timeout(),
            correction_notice_secs: default_correction_notice(),
        }
    }
}

impl TimeoutSettings {
    /// Returns the executable lookup bound as a Duration.
    pub fn locate_timeout(&self) -> Duration {
        Duration::from_secs(self.locate_timeout_secs)
    }

    /// Returns the grace period as a Duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Returns the tree-kill command bound as a Duration.
    pub fn fallback_kill_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_kill_timeout_secs)
    }

    /// Returns the output drain bound as a Duration.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Returns the correction notice window as a Duration.
    pub fn correction_notice(&self) -> Duration {
        Duration::from_secs(self.correction_notice_secs)
    }
}

/// A selectable workload known to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Short tag passed to the worker as a bare token.
    pub tag: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
}

impl ComponentSpec {
    fn new(tag: &str, name: &str) -> Self {
        Self {
            tag: tag.to_string(),
            name: name.to_string(),
        }
    }
}

fn default_components() -> Vec<ComponentSpec> {
    vec![
        ComponentSpec::new("BKT", "Scalar Integer"),
        ComponentSpec::new("BBP", "AVX2 Float"),
        ComponentSpec::new("SFTv4", "AVX2 Float"),
        ComponentSpec::new("SNT", "AVX2 Integer"),
        ComponentSpec::new("SVT", "AVX2 Float"),
        ComponentSpec::new("FFTv4", "AVX2 Float"),
        ComponentSpec::new("N63", "AVX2 Integer"),
        ComponentSpec::new("VT3", "AVX2 Float"),
    ]
}

/// Top-level controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub defaults: DefaultsSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default = "default_components")]
    pub components: Vec<ComponentSpec>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            worker: WorkerSettings::default(),
            defaults: DefaultsSettings::default(),
            timeouts: TimeoutSettings::default(),
            components: default_components(),
        }
    }
}

/// Issues found while validating settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsReport {
    /// Fatal problems.
    pub errors: Vec<String>,
    /// Suspicious but usable values.
    pub warnings: Vec<String>,
}

impl SettingsReport {
    /// Returns true if there are no errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

impl ControllerSettings {
    /// Parses settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid settings: {}", e)))
    }

    /// Loads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingSettings(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&text)?;
        tracing::info!(path = ?path, program = %settings.worker.program, "loaded settings");
        Ok(settings)
    }

    /// Checks the settings for values that would make every run fail.
    pub fn validate(&self) -> SettingsReport {
        let mut report = SettingsReport::default();

        if self.worker.program.trim().is_empty() {
            report.errors.push("worker.program cannot be empty".to_string());
        }
        if self.defaults.duration_per_unit_secs == 0 {
            report
                .errors
                .push("defaults.duration_per_unit_secs must be at least 1".to_string());
        }
        if self.defaults.auto_time_limit_per_unit_secs == 0 {
            report
                .errors
                .push("defaults.auto_time_limit_per_unit_secs must be at least 1".to_string());
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if !seen.insert(component.tag.as_str()) {
                report
                    .errors
                    .push(format!("duplicate component tag '{}'", component.tag));
            }
        }

        if self.timeouts.grace_period_secs == 0 {
            report.warnings.push(
                "timeouts.grace_period_secs = 0 force-kills the worker without a graceful window"
                    .to_string(),
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn settings_have_sensible_defaults() {
        let settings = ControllerSettings::default();

        assert_eq!(settings.worker.program, "y-cruncher");
        assert_eq!(
            settings.worker.mode_flags,
            vec!["colors:1", "console:linux-vterm", "stress"]
        );
        assert_eq!(settings.defaults.duration_per_unit_secs, 120);
        assert_eq!(settings.defaults.auto_time_limit_per_unit_secs, 1800);
        assert_eq!(settings.timeouts.grace_period(), Duration::from_secs(3));
        assert_eq!(settings.timeouts.locate_timeout(), Duration::from_secs(5));
        assert_eq!(settings.components.len(), 8);
        assert_eq!(settings.components[0].tag, "BKT");
        assert!(settings.validate().is_valid());
    }

    #[test]
    fn settings_deserialize_from_partial_toml() {
        let toml = r#"
            [worker]
            program = "sh"

            [timeouts]
            grace_period_secs = 1

            [[components]]
            tag = "A"

            [[components]]
            tag = "B"
            name = "Second"
        "#;

        let settings = ControllerSettings::from_toml(toml).unwrap();
        assert_eq!(settings.worker.program, "sh");
        assert_eq!(settings.worker.mode_flags.len(), 3);
        assert_eq!(settings.timeouts.grace_period_secs, 1);
        assert_eq!(settings.timeouts.drain_timeout(), Duration::from_millis(1000));
        assert_eq!(settings.defaults.duration_per_unit_secs, 120);
        assert_eq!(settings.components.len(), 2);
        assert_eq!(settings.components[1].name, "Second");
    }

    #[test]
    fn settings_reject_malformed_toml() {
        let err = ControllerSettings::from_toml("[worker]\nprogram = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn settings_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[defaults]\nduration_per_unit_secs = 60").unwrap();

        let settings = ControllerSettings::load(file.path()).unwrap();
        assert_eq!(settings.defaults.duration_per_unit_secs, 60);
    }

    #[test]
    fn settings_load_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ControllerSettings::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::MissingSettings(_)));
    }

    #[test]
    fn validate_flags_empty_program_and_duplicates() {
        let mut settings = ControllerSettings::default();
        settings.worker.program = "  ".to_string();
        settings.components.push(ComponentSpec::new("BKT", "again"));
        settings.timeouts.grace_period_secs = 0;

        let report = settings.validate();
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.into_result().is_err());
    }
}
