//! sandframe worker process.
//!
//! Reads length-prefixed commands from stdin and writes responses to stdout.
//! One `Execute` command is served per process; the host spawns a fresh
//! worker for every request. stdout carries frames only, logs go to stderr.

use std::io::{BufReader, BufWriter, Write};

use anyhow::Context;
use sandframe_core::ipc::{
    WORKER_LOG_ENV, WorkerCommand, WorkerResponse, decode, encode, read_frame, write_frame,
};
use sandframe_core::{ErrorKind, ExecutionResult, limits, runtime};

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env(WORKER_LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut stdin = BufReader::new(std::io::stdin().lock());
    let mut stdout = BufWriter::new(std::io::stdout().lock());

    while let Some(frame) = read_frame(&mut stdin).context("reading command")? {
        let command: WorkerCommand = decode(&frame).context("decoding command")?;
        match command {
            WorkerCommand::Ping => respond(&mut stdout, &WorkerResponse::Pong)?,
            WorkerCommand::Shutdown => break,
            WorkerCommand::Execute {
                source,
                dataset,
                options,
            } => {
                let refused = limits::apply(&options).iter().filter(|l| !l.accepted).count();
                if refused > 0 {
                    tracing::warn!(refused, "running with fewer resource limits than requested");
                }
                let result = runtime::run(&source, dataset, &options);
                tracing::debug!(kind = result.kind_name(), "script finished");
                send_result(&mut stdout, result)?;
                break;
            }
        }
    }

    Ok(())
}

fn respond<W: Write>(out: &mut W, response: &WorkerResponse) -> anyhow::Result<()> {
    let frame = encode(response).context("encoding response")?;
    write_frame(out, &frame).context("writing response")?;
    Ok(())
}

/// Send a result, degrading it to text if it cannot be framed.
fn send_result<W: Write>(out: &mut W, result: ExecutionResult) -> anyhow::Result<()> {
    let response = WorkerResponse::Result(result);
    let frame = match encode(&response) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "result cannot be framed, sending its text form");
            let WorkerResponse::Result(result) = response else {
                return Err(e.into());
            };
            let fallback = WorkerResponse::Result(result.into_text_fallback());
            match encode(&fallback) {
                Ok(frame) => frame,
                Err(e) => encode(&WorkerResponse::Result(ExecutionResult::error(
                    ErrorKind::SerializationFailure,
                    e.to_string(),
                )))
                .context("encoding serialization failure")?,
            }
        }
    };
    write_frame(out, &frame).context("writing result")?;
    Ok(())
}
