//! The restricted execution environment.
//!
//! A script runs against a single table bound to `df`, with `pd` and `plt`
//! as the only library namespaces and a fixed set of builtins. There is no
//! import mechanism and no file, network, process or environment access; the
//! interpreter simply has no such primitives.

mod accessors;
mod agg;
pub mod args;
mod builtins;
mod format;
pub mod frame;
mod groupby;
pub mod interp;
mod ops;
mod pandas;
mod plotting;
mod scalars;
mod series;
pub mod styled;
mod table;
pub mod value;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

use crate::classify::{ClassifyOptions, classify};
use crate::code::CodeUnit;
use crate::config::WorkerOptions;
use crate::dataset::DatasetSnapshot;
use crate::result::{ErrorKind, ExecutionResult};
use crate::script::{self, ScriptError};

pub use interp::{Interpreter, RESULT_SLOT};
pub use value::Value;

/// Stack for the interpreter thread. Evaluation is recursive.
const STACK_SIZE: usize = 64 * 1024 * 1024;

/// Execute `source` against `dataset` and classify what it leaves in
/// `result`.
///
/// Never fails: parse errors, script faults and interpreter panics all come
/// back as [`ErrorKind::RuntimeFault`] results.
pub fn run(source: &str, dataset: DatasetSnapshot, options: &WorkerOptions) -> ExecutionResult {
    let mut code = CodeUnit::new(source);
    if options.normalize_styled_heatmaps {
        code = code.normalized();
    }
    let classify_options = ClassifyOptions::from(options);

    let spawned = thread::Builder::new()
        .name("sandframe-script".to_string())
        .stack_size(STACK_SIZE)
        .spawn(move || {
            catch_unwind(AssertUnwindSafe(|| evaluate(code.source(), dataset, &classify_options)))
        });
    let joined = match spawned {
        Ok(handle) => handle.join(),
        Err(e) => {
            return ExecutionResult::error(
                ErrorKind::RuntimeFault,
                format!("could not start interpreter thread: {}", e),
            );
        }
    };
    match joined {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) | Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(%message, "interpreter panicked");
            ExecutionResult::error(ErrorKind::RuntimeFault, format!("internal error: {}", message))
        }
    }
}

fn evaluate(source: &str, dataset: DatasetSnapshot, options: &ClassifyOptions) -> ExecutionResult {
    let fault = |e: ScriptError| {
        tracing::debug!(error = %e, line = ?e.line, "script fault");
        ExecutionResult::error(ErrorKind::RuntimeFault, e.trace(source))
    };

    let program = match script::parse(source) {
        Ok(program) => program,
        Err(e) => return fault(e),
    };
    tracing::debug!(statements = program.statements.len(), rows = dataset.num_rows(), "running script");

    let mut interp = Interpreter::new(frame::Table::from_snapshot(dataset));
    if let Err(e) = interp.run(&program) {
        return fault(e);
    }

    let output = match interp.global(RESULT_SLOT) {
        Some(value) if !value.is_none() => value.clone(),
        _ => match interp.current_figure() {
            Some(figure) if !figure.borrow().is_empty() => {
                tracing::debug!("no result assigned, using the current figure");
                Value::Chart(figure)
            }
            _ => Value::None,
        },
    };
    classify(&output, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CellValue, ColumnSnapshot};
    use crate::config::ChartOutput;
    use crate::result::ScalarValue;

    fn dataset() -> DatasetSnapshot {
        DatasetSnapshot::new(vec![
            ColumnSnapshot::text("city", ["Oslo", "Lima", "Oslo", "Pune", "Lima"]),
            ColumnSnapshot::numeric("sales", [10.0, 20.0, 30.0, 40.0, 50.0]),
            ColumnSnapshot::numeric("cost", [1.0, 4.0, 9.0, 16.0, 25.0]),
        ])
        .unwrap()
    }

    fn exec(source: &str) -> ExecutionResult {
        run(source, dataset(), &WorkerOptions::default())
    }

    #[test]
    fn test_len_is_integer_scalar() {
        assert_eq!(exec("result = len(df)"), ExecutionResult::scalar(ScalarValue::Integer(5)));
    }

    #[test]
    fn test_empty_program_is_none() {
        assert_eq!(exec(""), ExecutionResult::scalar(ScalarValue::None));
        assert_eq!(exec("x = 1"), ExecutionResult::scalar(ScalarValue::None));
    }

    #[test]
    fn test_table_output_keeps_rows_and_columns() {
        match exec("result = df") {
            ExecutionResult::Tabular { columns, rows } => {
                assert_eq!(columns, vec!["city", "sales", "cost"]);
                assert_eq!(rows.len(), 5);
            }
            other => panic!("expected tabular, got {:?}", other),
        }
    }

    #[test]
    fn test_groupby_sum() {
        match exec("result = df.groupby('city')['sales'].sum()") {
            ExecutionResult::Tabular { columns, rows } => {
                assert_eq!(columns, vec!["city", "sales"]);
                assert_eq!(rows[0], vec![CellValue::Text("Lima".into()), CellValue::Int(70)]);
            }
            other => panic!("expected tabular, got {:?}", other),
        }
    }

    #[test]
    fn test_undefined_name_is_runtime_fault() {
        match exec("x = 1\nresult = missing + x") {
            ExecutionResult::Error { kind, diagnostic } => {
                assert_eq!(kind, ErrorKind::RuntimeFault);
                assert!(diagnostic.contains("name 'missing' is not defined"));
                assert!(diagnostic.contains("line 2"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_import_is_denied() {
        assert_eq!(exec("import os").error_kind(), Some(ErrorKind::RuntimeFault));
    }

    #[test]
    fn test_implicit_figure_becomes_output() {
        match exec("df.plot(x='sales', y='cost')\nplt.title('t')") {
            ExecutionResult::Markup { html } => assert!(html.contains("<svg")),
            other => panic!("expected markup, got {:?}", other),
        }
    }

    #[test]
    fn test_styled_heatmap_is_rewritten() {
        let result = exec("result = df.style.background_gradient(cmap='Blues')");
        match result {
            ExecutionResult::Markup { html } => assert!(html.starts_with("<svg")),
            other => panic!("expected heatmap markup, got {:?}", other),
        }
    }

    #[test]
    fn test_styled_table_without_rewrite() {
        let options = WorkerOptions {
            normalize_styled_heatmaps: false,
            ..WorkerOptions::default()
        };
        match run("result = df.style.highlight_max()", dataset(), &options) {
            ExecutionResult::Markup { html } => assert!(html.starts_with("<table")),
            other => panic!("expected styled table, got {:?}", other),
        }
    }

    #[test]
    fn test_min_int_modulo_is_zero() {
        let source = "a = -9223372036854775807 - 1\nresult = a % -1";
        assert_eq!(exec(source), ExecutionResult::scalar(ScalarValue::Integer(0)));
    }

    #[test]
    fn test_extreme_values_still_chart() {
        let source = "result = pd.Series([1e308, -1e308]).plot()";
        match exec(source) {
            ExecutionResult::Markup { html } => assert!(html.starts_with("<svg")),
            other => panic!("expected markup, got {:?}", other),
        }

        let raster = WorkerOptions {
            chart_output: ChartOutput::Raster,
            ..WorkerOptions::default()
        };
        match run(source, dataset(), &raster) {
            ExecutionResult::Image { mime, .. } => assert_eq!(mime, "image/png"),
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_heatmap_rewrite_without_numeric_columns() {
        let text_only = DatasetSnapshot::new(vec![ColumnSnapshot::text("city", ["Oslo", "Lima"])]).unwrap();
        match run("result = df.style.background_gradient()", text_only, &WorkerOptions::default()) {
            ExecutionResult::Markup { html } => assert!(html.starts_with("<svg")),
            other => panic!("expected heatmap markup, got {:?}", other),
        }
    }
}
