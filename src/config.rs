//! Run configuration and its resolution into concrete worker parameters.
//!
//! The caller edits a [`RunConfiguration`] of raw strings, any of which may
//! hold the auto sentinel. The [`Resolver`] turns it into a [`ResolvedRun`]
//! before launch, checking that an explicit time limit leaves room for every
//! selected unit to run at least once.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::settings::{ControllerSettings, DefaultsSettings};

/// The auto sentinel, compared case-insensitively.
pub const AUTO: &str = "auto";

/// Returns true for the auto sentinel. Blank input counts as auto.
pub fn is_auto(raw: &str) -> bool {
    let raw = raw.trim();
    raw.is_empty() || raw.eq_ignore_ascii_case(AUTO)
}

/// User-supplied run parameters, each either "auto" or an explicit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Whole-run time limit in seconds.
    pub time_limit: String,
    /// Seconds each unit runs before the worker moves on.
    pub duration_per_unit: String,
    /// Memory size string such as `8G`.
    pub memory: String,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            time_limit: "Auto".to_string(),
            duration_per_unit: "Auto".to_string(),
            memory: "Auto".to_string(),
        }
    }
}

impl RunConfiguration {
    /// Sets the time limit field.
    pub fn with_time_limit(mut self, raw: impl Into<String>) -> Self {
        self.time_limit = raw.into();
        self
    }

    /// Sets the per-unit duration field.
    pub fn with_duration_per_unit(mut self, raw: impl Into<String>) -> Self {
        self.duration_per_unit = raw.into();
        self
    }

    /// Sets the memory field.
    pub fn with_memory(mut self, raw: impl Into<String>) -> Self {
        self.memory = raw.into();
        self
    }
}

/// Concrete parameters for one launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRun {
    /// Per-unit duration in seconds.
    pub duration: u64,
    /// Whole-run time limit in seconds.
    pub time_limit: u64,
    /// Explicit memory size, absent when left to the worker.
    pub memory: Option<String>,
}

/// A message that stays visible for a fixed window and then clears itself.
#[derive(Debug, Clone)]
pub struct TransientNotice {
    message: String,
    shown_at: Instant,
    visible_for: Duration,
}

impl TransientNotice {
    /// Creates a notice that becomes visible now.
    pub fn new(message: impl Into<String>, visible_for: Duration) -> Self {
        Self {
            message: message.into(),
            shown_at: Instant::now(),
            visible_for,
        }
    }

    /// Returns the message regardless of visibility.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns whether the notice is still within its window.
    pub fn is_visible(&self) -> bool {
        self.is_visible_at(Instant::now())
    }

    /// Returns whether the notice is within its window at `now`.
    pub fn is_visible_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.shown_at) < self.visible_for
    }

    /// Returns the message while visible, `None` once cleared.
    pub fn text(&self) -> Option<&str> {
        self.is_visible().then_some(self.message.as_str())
    }
}

/// Turns raw configuration into concrete run parameters.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    defaults: DefaultsSettings,
    notice_window: Duration,
}

impl Resolver {
    /// Creates a resolver from auto defaults and the correction notice window.
    pub fn new(defaults: DefaultsSettings, notice_window: Duration) -> Self {
        Self {
            defaults,
            notice_window,
        }
    }

    /// Creates a resolver from controller settings.
    pub fn from_settings(settings: &ControllerSettings) -> Self {
        Self::new(settings.defaults, settings.timeouts.correction_notice())
    }

    /// Resolves the per-unit duration: "auto" yields the configured default,
    /// otherwise a positive integer is required.
    pub fn resolve_duration(&self, raw: &str) -> Result<u64, ConfigError> {
        match parse_seconds("duration per unit", raw)? {
            None => Ok(self.defaults.duration_per_unit_secs),
            Some(0) => Err(ConfigError::InvalidValue {
                field: "duration per unit",
                value: raw.trim().to_string(),
            }),
            Some(secs) => Ok(secs),
        }
    }

    /// Smallest time limit that lets every unit run once.
    ///
    /// `per_unit_duration` is `None` when the duration field was "auto", in
    /// which case the configured default duration applies.
    pub fn minimum_time_limit(&self, per_unit_duration: Option<u64>, unit_count: usize) -> u64 {
        per_unit_duration
            .unwrap_or(self.defaults.duration_per_unit_secs)
            .saturating_mul(unit_count as u64)
    }

    /// Resolves the whole-run time limit.
    ///
    /// "auto" scales with the unit count: by the explicit per-unit duration
    /// when one was given, by the per-unit auto budget otherwise. An explicit
    /// value must be at least [`Self::minimum_time_limit`].
    pub fn resolve_time_limit(
        &self,
        raw: &str,
        per_unit_duration: Option<u64>,
        unit_count: usize,
    ) -> Result<u64, ConfigError> {
        match parse_seconds("time limit", raw)? {
            None => {
                let per_unit =
                    per_unit_duration.unwrap_or(self.defaults.auto_time_limit_per_unit_secs);
                Ok(per_unit.saturating_mul(unit_count as u64))
            }
            Some(supplied) => {
                check_minimum(
                    supplied,
                    self.minimum_time_limit(per_unit_duration, unit_count),
                    per_unit_duration.unwrap_or(self.defaults.duration_per_unit_secs),
                    unit_count,
                )?;
                Ok(supplied)
            }
        }
    }

    /// Checks a configuration without resolving it.
    ///
    /// The time limit must be a non-negative integer or "auto" and the
    /// duration must pass [`Self::resolve_duration`]. An explicit time limit
    /// below the minimum for `unit_count` units is rejected.
    pub fn validate(&self, config: &RunConfiguration, unit_count: usize) -> Result<(), ConfigError> {
        let time_limit = parse_seconds("time limit", &config.time_limit)?;
        let duration = if is_auto(&config.duration_per_unit) {
            None
        } else {
            Some(self.resolve_duration(&config.duration_per_unit)?)
        };
        check_memory(&config.memory)?;

        if let Some(supplied) = time_limit.filter(|_| unit_count > 0) {
            let per_unit = duration.unwrap_or(self.defaults.duration_per_unit_secs);
            check_minimum(
                supplied,
                self.minimum_time_limit(duration, unit_count),
                per_unit,
                unit_count,
            )?;
        }

        Ok(())
    }

    /// Resolves every field for a launch over `unit_count` units.
    pub fn resolve(
        &self,
        config: &RunConfiguration,
        unit_count: usize,
    ) -> Result<ResolvedRun, ConfigError> {
        check_memory(&config.memory)?;
        let explicit_duration =
            parse_seconds("duration per unit", &config.duration_per_unit)?.is_some();
        let duration = self.resolve_duration(&config.duration_per_unit)?;
        let time_limit = self.resolve_time_limit(
            &config.time_limit,
            explicit_duration.then_some(duration),
            unit_count,
        )?;

        let memory = (!is_auto(&config.memory)).then(|| config.memory.trim().to_string());

        Ok(ResolvedRun {
            duration,
            time_limit,
            memory,
        })
    }

    /// Validates `config`, raising an insufficient explicit time limit to the
    /// minimum instead of failing.
    ///
    /// Returns a notice describing the correction when one was made. Any other
    /// validation failure is returned unchanged.
    pub fn resolve_with_correction(
        &self,
        config: &mut RunConfiguration,
        unit_count: usize,
    ) -> Result<Option<TransientNotice>, ConfigError> {
        match self.validate(config, unit_count) {
            Ok(()) => Ok(None),
            Err(ConfigError::InsufficientTimeLimit {
                supplied,
                minimum,
                unit_count,
                ..
            }) => {
                tracing::debug!(supplied, minimum, unit_count, "correcting time limit");
                config.time_limit = minimum.to_string();
                Ok(Some(TransientNotice::new(
                    format!(
                        "Time Limit auto-corrected to {} sec (minimum required for {} tests)",
                        minimum, unit_count
                    ),
                    self.notice_window,
                )))
            }
            Err(e) => Err(e),
        }
    }
}

/// Parses a seconds field: `None` for auto, `Some(n)` for a non-negative integer.
fn parse_seconds(field: &'static str, raw: &str) -> Result<Option<u64>, ConfigError> {
    if is_auto(raw) {
        return Ok(None);
    }
    let trimmed = raw.trim();
    let invalid = || ConfigError::InvalidValue {
        field,
        value: trimmed.to_string(),
    };
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    trimmed.parse::<u64>().map(Some).map_err(|_| invalid())
}

fn check_minimum(
    supplied: u64,
    minimum: u64,
    per_unit: u64,
    unit_count: usize,
) -> Result<(), ConfigError> {
    if supplied < minimum {
        return Err(ConfigError::InsufficientTimeLimit {
            supplied,
            minimum,
            per_unit,
            unit_count,
        });
    }
    Ok(())
}

/// Accepts "auto" or digits followed by an optional K/M/G/T suffix, itself
/// optionally followed by `B` or `iB`.
fn check_memory(raw: &str) -> Result<(), ConfigError> {
    if is_auto(raw) {
        return Ok(());
    }
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let suffix = suffix.to_ascii_uppercase();

    let suffix_ok = match suffix.chars().next() {
        None => true,
        Some('K' | 'M' | 'G' | 'T') => matches!(&suffix[1..], "" | "B" | "IB"),
        Some(_) => false,
    };

    if number.is_empty() || !suffix_ok {
        return Err(ConfigError::InvalidMemory(trimmed.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::new(DefaultsSettings::default(), Duration::from_secs(5))
    }

    #[test]
    fn auto_sentinel_is_case_insensitive() {
        assert!(is_auto("auto"));
        assert!(is_auto("Auto"));
        assert!(is_auto(" AUTO "));
        assert!(is_auto(""));
        assert!(!is_auto("autox"));
    }

    #[test]
    fn resolve_duration_handles_auto_and_explicit() {
        let r = resolver();
        assert_eq!(r.resolve_duration("Auto").unwrap(), 120);
        assert_eq!(r.resolve_duration("45").unwrap(), 45);
        assert!(matches!(
            r.resolve_duration("0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            r.resolve_duration("-5"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            r.resolve_duration("ten"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn auto_time_limit_scales_with_unit_count() {
        let r = resolver();
        for n in 1..=16usize {
            assert_eq!(r.resolve_time_limit("auto", None, n).unwrap(), 1800 * n as u64);
            assert_eq!(r.resolve_time_limit("auto", Some(75), n).unwrap(), 75 * n as u64);
        }
    }

    #[test]
    fn explicit_time_limit_must_cover_every_unit() {
        let r = resolver();
        assert_eq!(r.resolve_time_limit("150", Some(50), 3).unwrap(), 150);
        assert_eq!(r.resolve_time_limit("151", Some(50), 3).unwrap(), 151);
        assert_eq!(
            r.resolve_time_limit("149", Some(50), 3).unwrap_err(),
            ConfigError::InsufficientTimeLimit {
                supplied: 149,
                minimum: 150,
                per_unit: 50,
                unit_count: 3,
            }
        );
        // auto duration falls back to the 120s default for the minimum
        assert!(r.resolve_time_limit("239", None, 2).is_err());
        assert_eq!(r.resolve_time_limit("240", None, 2).unwrap(), 240);
    }

    #[test]
    fn validate_boundary_for_many_shapes() {
        let r = resolver();
        for d in [1u64, 7, 50, 120] {
            for n in 1..=8usize {
                let min = d * n as u64;
                let ok = RunConfiguration::default()
                    .with_duration_per_unit(d.to_string())
                    .with_time_limit(min.to_string());
                assert!(r.validate(&ok, n).is_ok());

                let low = ok.clone().with_time_limit((min - 1).to_string());
                assert!(r.validate(&low, n).is_err());
            }
        }
    }

    #[test]
    fn validate_rejects_non_numeric_fields() {
        let r = resolver();
        let config = RunConfiguration::default().with_time_limit("1h");
        assert_eq!(
            r.validate(&config, 1).unwrap_err(),
            ConfigError::InvalidValue {
                field: "time limit",
                value: "1h".to_string(),
            }
        );

        let config = RunConfiguration::default().with_duration_per_unit("2.5");
        assert!(r.validate(&config, 1).is_err());
    }

    #[test]
    fn validate_agrees_with_resolve_on_zero_duration() {
        let r = resolver();
        let mut config = RunConfiguration::default().with_duration_per_unit("0");
        let expected = ConfigError::InvalidValue {
            field: "duration per unit",
            value: "0".to_string(),
        };

        assert_eq!(r.validate(&config, 2).unwrap_err(), expected);
        assert_eq!(r.resolve(&config, 2).unwrap_err(), expected);
        assert_eq!(r.resolve_with_correction(&mut config, 2).unwrap_err(), expected);
    }

    #[test]
    fn validate_skips_minimum_without_selection() {
        let r = resolver();
        let config = RunConfiguration::default().with_time_limit("1");
        assert!(r.validate(&config, 0).is_ok());
    }

    #[test]
    fn validate_checks_memory_sizes() {
        let r = resolver();
        for good in ["Auto", "64M", "8G", "16GiB", "512mb", "1024"] {
            let config = RunConfiguration::default().with_memory(good);
            assert!(r.validate(&config, 1).is_ok(), "{good} should be accepted");
        }
        for bad in ["G8", "8X", "lots", "8GBB"] {
            let config = RunConfiguration::default().with_memory(bad);
            assert_eq!(
                r.validate(&config, 1).unwrap_err(),
                ConfigError::InvalidMemory(bad.to_string())
            );
        }
    }

    #[test]
    fn resolve_all_auto_uses_defaults() {
        let r = resolver();
        let resolved = r.resolve(&RunConfiguration::default(), 2).unwrap();
        assert_eq!(
            resolved,
            ResolvedRun {
                duration: 120,
                time_limit: 3600,
                memory: None,
            }
        );
    }

    #[test]
    fn resolve_keeps_explicit_memory() {
        let r = resolver();
        let config = RunConfiguration::default().with_memory(" 8G ");
        assert_eq!(r.resolve(&config, 1).unwrap().memory.as_deref(), Some("8G"));
    }

    #[test]
    fn correction_raises_insufficient_time_limit() {
        let r = resolver();
        let mut config = RunConfiguration::default()
            .with_duration_per_unit("50")
            .with_time_limit("100");

        assert!(r.validate(&config, 3).is_err());

        let notice = r
            .resolve_with_correction(&mut config, 3)
            .unwrap()
            .expect("correction notice");
        assert_eq!(config.time_limit, "150");
        assert!(notice.message().contains("150 sec"));
        assert!(notice.is_visible());
        assert!(r.validate(&config, 3).is_ok());
    }

    #[test]
    fn correction_leaves_valid_config_alone() {
        let r = resolver();
        let mut config = RunConfiguration::default().with_time_limit("500");
        assert!(r.resolve_with_correction(&mut config, 2).unwrap().is_none());
        assert_eq!(config.time_limit, "500");
    }

    #[test]
    fn correction_does_not_mask_invalid_fields() {
        let r = resolver();
        let mut config = RunConfiguration::default().with_time_limit("soon");
        assert!(r.resolve_with_correction(&mut config, 2).is_err());
        assert_eq!(config.time_limit, "soon");
    }

    #[test]
    fn transient_notice_clears_after_window() {
        let notice = TransientNotice::new("corrected", Duration::from_secs(5));
        assert_eq!(notice.text(), Some("corrected"));
        let later = Instant::now() + Duration::from_secs(6);
        assert!(!notice.is_visible_at(later));

        let expired = TransientNotice::new("gone", Duration::ZERO);
        assert_eq!(expired.text(), None);
    }
}
