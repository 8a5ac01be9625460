//! sandframe CLI - run generated data scripts in an isolated worker.

mod colors;
mod output;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sandframe_core::{DatasetSnapshot, Sandbox, SandboxConfig};

#[derive(Parser)]
#[command(name = "sandframe")]
#[command(about = "Run generated data-transformation scripts in a sandboxed worker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// How `run` prints its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script against a dataset
    Run {
        /// Dataset file (JSON with declared column types)
        #[arg(short, long)]
        data: PathBuf,

        /// Script file; Markdown fences are stripped
        #[arg(short, long, conflicts_with = "eval", required_unless_present = "eval")]
        code: Option<PathBuf>,

        /// Inline script text
        #[arg(short, long)]
        eval: Option<String>,

        /// Deadline in seconds (overrides the configured default)
        #[arg(short, long, value_parser = parse_seconds)]
        timeout: Option<f64>,

        /// Deliver charts as PNG instead of SVG markup
        #[arg(long)]
        raster: bool,

        /// Write image or markup results to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Result format on stdout
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Worker binary to launch
        #[arg(long)]
        worker: Option<PathBuf>,

        /// Sandbox config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the shape and column types of a dataset
    Summary {
        /// Dataset file (JSON with declared column types)
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Check that a worker can be launched and answers
    Ping {
        /// Worker binary to launch
        #[arg(long)]
        worker: Option<PathBuf>,

        /// Sandbox config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_seconds(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(secs),
        _ => Err(format!("'{}' is not a positive number of seconds", text)),
    }
}

/// Layer config file, environment and flags, in that order.
fn load_config(path: Option<&PathBuf>, worker: Option<PathBuf>) -> anyhow::Result<SandboxConfig> {
    let config = match path {
        Some(path) => SandboxConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SandboxConfig::default(),
    };
    let config = config.with_env_overrides()?;
    Ok(match worker {
        Some(worker) => config.with_worker_path(worker),
        None => config,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            // sandframe-core errors carry recovery hints
            let message = match err.downcast_ref::<sandframe_core::Error>() {
                Some(core_err) if err.chain().count() > 1 => {
                    format!("{}: {}", err, core_err.with_hint())
                }
                Some(core_err) => core_err.with_hint(),
                None => format!("{:#}", err),
            };
            eprintln!("{}error:{} {}", colors::RED, colors::RESET, message);
            ExitCode::from(2)
        }
    }
}

fn dispatch(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            data,
            code,
            eval,
            timeout,
            raster,
            output,
            format,
            worker,
            config,
        } => {
            let config = load_config(config.as_ref(), worker)?;
            let request = run::RunRequest {
                data,
                code,
                eval,
                timeout,
                raster,
                output,
                format,
            };
            run::execute(config, request)
        }

        Commands::Summary { data } => {
            let dataset = DatasetSnapshot::from_json_file(&data)
                .with_context(|| format!("loading dataset {}", data.display()))?;
            println!("{}", serde_json::to_string_pretty(&dataset.summary())?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Ping { worker, config } => {
            let sandbox = Sandbox::new(load_config(config.as_ref(), worker)?);
            let path = sandbox.worker_path()?;
            let elapsed = sandbox.ping()?;
            println!(
                "{}ok{} {} answered in {:.1}ms",
                colors::GREEN,
                colors::RESET,
                path.display(),
                elapsed.as_secs_f64() * 1000.0
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
