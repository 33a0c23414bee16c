//! Stress Controller CLI
//!
//! Runs one y-cruncher stress test over the selected components and streams
//! its output to stdout. Ctrl-C stops the worker and everything it started.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;

use stress_controller::{
    ComponentCatalog, Controller, ControllerSettings, OutputLine, RunConfiguration, RunStatus,
    AUTO,
};

#[derive(Parser, Debug)]
#[command(name = "stress-controller", version, about = "Run a y-cruncher stress test")]
struct Cli {
    /// Settings file (TOML). Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Total time limit in seconds, or "auto".
    #[arg(long, default_value = AUTO)]
    time_limit: String,

    /// Seconds per component, or "auto".
    #[arg(long, default_value = AUTO)]
    duration: String,

    /// Memory for the worker, e.g. 8G, or "auto".
    #[arg(long, default_value = AUTO)]
    memory: String,

    /// Select every component in the catalog.
    #[arg(long)]
    all: bool,

    /// Raise a too-low time limit to the minimum instead of refusing to start.
    #[arg(long)]
    fix_time_limit: bool,

    /// List the component catalog and exit.
    #[arg(long)]
    list: bool,

    /// Print the terminal status as JSON.
    #[arg(long)]
    json: bool,

    /// Component tags to run. They run in catalog order (see --list).
    units: Vec<String>,
}

enum Event {
    Output(OutputLine),
    Status(RunStatus),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> stress_controller::Result<ExitCode> {
    let settings = match &cli.config {
        Some(path) => ControllerSettings::load(path)?,
        None => ControllerSettings::default(),
    };
    for warning in settings.validate().into_result()? {
        tracing::warn!("{}", warning);
    }

    let mut catalog = ComponentCatalog::new(&settings.components);

    if cli.list {
        for component in catalog.iter() {
            println!("{:<8} {}", component.tag, component.name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.all {
        catalog.enable_all();
    }
    for tag in &cli.units {
        catalog
            .enable(tag)
            .map_err(|e| stress_controller::Error::Config(e.to_string()))?;
    }
    let units = catalog.enabled_tags();

    let mut config = RunConfiguration::default()
        .with_time_limit(cli.time_limit)
        .with_duration_per_unit(cli.duration)
        .with_memory(cli.memory);

    let controller = Controller::new(settings);

    if cli.fix_time_limit {
        let corrected = controller
            .resolver()
            .resolve_with_correction(&mut config, units.len())
            .map_err(stress_controller::StartError::from)?;
        if let Some(text) = corrected.as_ref().and_then(|notice| notice.text()) {
            eprintln!("{}", text);
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let output_tx = tx.clone();
    let on_output = move |line: OutputLine| {
        let _ = output_tx.send(Event::Output(line));
    };
    let on_status = move |status: RunStatus| {
        let _ = tx.send(Event::Status(status));
    };

    let info = controller
        .start(&config, &units, on_output, on_status)
        .await?;
    println!("Starting: {}", info.argv.join(" "));

    // The channel closes once every background task of the run has finished.
    let mut status = None;
    let mut stopping = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(Event::Output(line)) => println!("{}", line.text()),
                Some(Event::Status(s)) => status = Some(s),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                eprintln!("Stopping...");
                match controller.stop().await {
                    Ok(outcome) => tracing::debug!(?outcome, "stop finished"),
                    Err(e) => tracing::debug!(error = %e, "stop refused"),
                }
            }
        }
    }

    let status = status.unwrap_or_else(|| RunStatus::Error("no status reported".to_string()));
    if cli.json {
        let json = serde_json::to_string(&status)
            .map_err(|e| stress_controller::Error::Config(e.to_string()))?;
        println!("{}", json);
    }

    Ok(match status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Stopped => ExitCode::from(130),
        RunStatus::Error(message) => {
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
    })
}
