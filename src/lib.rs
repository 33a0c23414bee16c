//! Stress Controller - launch, monitor and stop a y-cruncher stress worker
//!
//! This library resolves a user-facing run configuration into worker arguments,
//! launches the worker with its output streamed line by line to a caller
//! callback, reports one terminal status per run, and stops the worker together
//! with every process it started.

pub mod catalog;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod locator;
pub mod settings;
pub mod sink;
pub mod tree;

pub use catalog::{Component, ComponentCatalog, UnknownComponent};
pub use command::{build_argv, build_command};
pub use config::{ResolvedRun, Resolver, RunConfiguration, TransientNotice, AUTO};
pub use controller::{Controller, ControllerState, RunInfo, StopOutcome, COMPLETED_NOTICE};
pub use error::{ConfigError, Error, Result, StartError, StopError};
pub use locator::{ExecutableLocator, PathLocator};
pub use settings::{
    ComponentSpec, ControllerSettings, DefaultsSettings, SettingsReport, TimeoutSettings,
    WorkerSettings,
};
pub use sink::{OutputLine, OutputSink, RunStatus, StatusSink};
pub use tree::{native_tree, terminate_tree, Escalation, ProcessTree, TerminationReport};
