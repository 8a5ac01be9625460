//! Run command implementation for the sandframe CLI.
//!
//! Loads a dataset and a script, executes the script in a fresh worker and
//! prints the classified result.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use sandframe_core::{
    ChartOutput, CodeUnit, DatasetSnapshot, ExecutionResult, Sandbox, SandboxConfig, TimeoutPolicy,
};

use crate::OutputFormat;
use crate::colors;
use crate::output;

/// Arguments of `sandframe run` after config layering.
pub struct RunRequest {
    pub data: PathBuf,
    pub code: Option<PathBuf>,
    pub eval: Option<String>,
    pub timeout: Option<f64>,
    pub raster: bool,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
}

/// Execute a script. The exit code is non-zero when the result is an error.
pub fn execute(config: SandboxConfig, request: RunRequest) -> anyhow::Result<ExitCode> {
    let config = if request.raster {
        config.with_chart_output(ChartOutput::Raster)
    } else {
        config
    };

    let dataset = DatasetSnapshot::from_json_file(&request.data)
        .with_context(|| format!("loading dataset {}", request.data.display()))?;
    let code = load_code(request.code.as_deref(), request.eval.as_deref())?;
    let timeout = request.timeout.map(TimeoutPolicy::from_secs_f64);

    let sandbox = Sandbox::new(config);
    let report = sandbox.execute_with_report(&code, &dataset, timeout);
    tracing::debug!(
        kind = report.result.kind_name(),
        pid = ?report.pid,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "execution finished"
    );

    let result = match &request.output {
        Some(path) => write_artifact(path, report.result)?,
        None => report.result,
    };

    match request.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output::to_json(&result))?)
        }
        OutputFormat::Text => {
            if let ExecutionResult::Error { kind, diagnostic } = &result {
                eprintln!("{}{}:{} {}", colors::RED, kind, colors::RESET, diagnostic);
            } else {
                println!("{}", output::render_text(&result));
            }
        }
    }

    eprintln!(
        "{}{} in {:.2}s{}",
        colors::DIM,
        result.kind_name(),
        report.elapsed.as_secs_f64(),
        colors::RESET
    );

    Ok(if result.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn load_code(path: Option<&Path>, inline: Option<&str>) -> anyhow::Result<CodeUnit> {
    match (path, inline) {
        (_, Some(text)) => Ok(CodeUnit::from_generated(text)),
        (Some(path), None) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading script {}", path.display()))?;
            Ok(CodeUnit::from_generated(&text))
        }
        (None, None) => anyhow::bail!("either --code or --eval is required"),
    }
}

/// Save image and markup payloads to `path`, replacing them with a note.
fn write_artifact(path: &Path, result: ExecutionResult) -> anyhow::Result<ExecutionResult> {
    let bytes = match &result {
        ExecutionResult::Image { data, .. } => Some(data.as_slice()),
        ExecutionResult::Markup { html } => Some(html.as_bytes()),
        _ => None,
    };
    let Some(bytes) = bytes else {
        eprintln!(
            "{}note:{} {} result has no artifact, {} not written",
            colors::YELLOW,
            colors::RESET,
            result.kind_name(),
            path.display()
        );
        return Ok(result);
    };
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    eprintln!(
        "{}wrote{} {} ({} bytes)",
        colors::BOLD,
        colors::RESET,
        path.display(),
        bytes.len()
    );
    Ok(result)
}
