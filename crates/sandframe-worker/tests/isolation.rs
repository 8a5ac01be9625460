//! Process-level tests: real worker processes driven through the sandbox.

#![cfg(unix)]

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use sandframe_core::ipc::{WorkerCommand, WorkerResponse, read_message, write_message};
use sandframe_core::{
    CellValue, ChartOutput, CodeUnit, ColumnSnapshot, DatasetSnapshot, ErrorKind, ExecutionResult,
    Sandbox, SandboxConfig, ScalarValue, TimeoutPolicy, WorkerOptions, WorkerState,
};

fn worker_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sandframe-worker"))
}

fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::default().with_worker_path(worker_path()))
}

fn sales() -> DatasetSnapshot {
    DatasetSnapshot::new(vec![
        ColumnSnapshot::text("region", ["north", "south", "north", "east", "south"]),
        ColumnSnapshot::numeric("units", [3.0, 5.0, 2.0, 8.0, 1.0]),
        ColumnSnapshot::numeric("price", [9.5, 4.0, 12.0, 3.25, 7.0]),
    ])
    .unwrap()
}

fn pid_exists(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[test]
fn test_len_of_five_rows() {
    let result = sandbox().execute(&CodeUnit::new("result = len(df)"), &sales(), None);
    assert_eq!(result, ExecutionResult::scalar(ScalarValue::Integer(5)));
}

#[test]
fn test_empty_code_is_none() {
    let result = sandbox().execute(&CodeUnit::new(""), &sales(), None);
    assert_eq!(result, ExecutionResult::scalar(ScalarValue::None));
}

#[test]
fn test_table_output_has_every_row() {
    let code = CodeUnit::new("result = df[df['units'] > 0]");
    match sandbox().execute(&code, &sales(), None) {
        ExecutionResult::Tabular { columns, rows } => {
            assert_eq!(columns, vec!["region", "units", "price"]);
            assert_eq!(rows.len(), 5);
            assert_eq!(rows[3][1], CellValue::Int(8));
        }
        other => panic!("expected tabular, got {:?}", other),
    }
}

#[test]
fn test_undefined_name_is_runtime_fault() {
    match sandbox().execute(&CodeUnit::new("result = revenue * 2"), &sales(), None) {
        ExecutionResult::Error { kind, diagnostic } => {
            assert_eq!(kind, ErrorKind::RuntimeFault);
            assert!(!diagnostic.is_empty());
            assert!(diagnostic.contains("revenue"));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn test_runaway_script_times_out_and_is_reaped() {
    let code = CodeUnit::new("result = [sum(range(1000000)) for i in range(100000)]");
    let report = sandbox().execute_with_report(
        &code,
        &sales(),
        Some(TimeoutPolicy::new(Duration::from_millis(500))),
    );
    assert_eq!(report.result.error_kind(), Some(ErrorKind::TimeoutExceeded));
    assert_eq!(report.outcome, Some(WorkerState::TimedOut));
    assert_eq!(report.final_state, Some(WorkerState::Reaped));
    let pid = report.pid.unwrap();
    assert!(!pid_exists(pid), "worker {} still exists", pid);
}

#[test]
fn test_repeated_runs_leave_no_processes() {
    let sandbox = sandbox();
    let code = CodeUnit::new("result = df.groupby('region')['units'].sum()");
    for _ in 0..5 {
        let report = sandbox.execute_with_report(&code, &sales(), None);
        assert_eq!(report.result.kind_name(), "tabular");
        assert_eq!(report.final_state, Some(WorkerState::Reaped));
        assert!(!pid_exists(report.pid.unwrap()));
    }
}

#[test]
fn test_chart_markup_and_raster() {
    let code = CodeUnit::new("result = df.plot(kind='bar', x='region', y='units')");
    match sandbox().execute(&code, &sales(), None) {
        ExecutionResult::Markup { html } => assert!(html.starts_with("<svg")),
        other => panic!("expected markup, got {:?}", other),
    }

    let raster = Sandbox::new(
        SandboxConfig::default()
            .with_worker_path(worker_path())
            .with_chart_output(ChartOutput::Raster),
    );
    match raster.execute(&code, &sales(), None) {
        ExecutionResult::Image { data, mime } => {
            assert_eq!(mime, "image/png");
            assert!(!data.is_empty());
            assert!(image::load_from_memory_with_format(&data, image::ImageFormat::Png).is_ok());
        }
        other => panic!("expected image, got {:?}", other),
    }
}

#[test]
fn test_styled_heatmap_is_rewritten() {
    let code = CodeUnit::new("result = df.style.background_gradient(cmap='viridis')");
    let result = sandbox().execute(&code, &sales(), None);
    assert!(
        matches!(result, ExecutionResult::Markup { .. } | ExecutionResult::Image { .. }),
        "got {:?}",
        result
    );
}

#[test]
fn test_concurrent_executions_are_independent() {
    let sandbox = sandbox();
    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sandbox = &sandbox;
                scope.spawn(move || {
                    let code = CodeUnit::new(format!("result = len(df) + {}", i));
                    sandbox.execute(&code, &sales(), None)
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(
                handle.join().unwrap(),
                ExecutionResult::scalar(ScalarValue::Integer(5 + i as i64))
            );
        }
    });
}

#[test]
fn test_ping_round_trip() {
    assert!(sandbox().ping().is_ok());
}

#[test]
fn test_direct_protocol_exchange() {
    let mut child = Command::new(worker_path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = BufWriter::new(child.stdin.take().unwrap());
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    write_message(&mut stdin, &WorkerCommand::Ping).unwrap();
    let pong: WorkerResponse = read_message(&mut stdout).unwrap();
    assert_eq!(pong, WorkerResponse::Pong);

    write_message(
        &mut stdin,
        &WorkerCommand::Execute {
            source: "result = df['price'].max()".to_string(),
            dataset: sales(),
            options: WorkerOptions::default(),
        },
    )
    .unwrap();
    let response: WorkerResponse = read_message(&mut stdout).unwrap();
    assert_eq!(
        response,
        WorkerResponse::Result(ExecutionResult::scalar(ScalarValue::Integer(12)))
    );

    drop(stdin);
    assert!(child.wait().unwrap().success());
}
