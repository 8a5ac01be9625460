//! Plotting: the `.plot` accessor, the `plt` namespace and figure/axes
//! methods. Everything draws into a shared [`Chart`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::chart::colormap::Colormap;
use crate::chart::{Chart, HeatGrid, Mark, XValues};
use crate::dataset::{CellValue, ColumnType};
use crate::script::{ScriptError, ScriptResult};

use super::args::Args;
use super::frame::{Series, Table};
use super::interp::Interpreter;
use super::value::{Namespace, Value};

const PLOT_KINDS: &[&str] = &["line", "bar", "barh", "scatter", "hist", "pie", "area", "imshow"];

/// Drawing calls shared by `plt` and axes objects.
const DRAW_CALLS: &[&str] = &["plot", "bar", "barh", "scatter", "hist", "pie", "imshow", "fill_between"];

/// Calls accepted and ignored: they only tweak presentation details this
/// renderer does not model, or would touch the filesystem.
const IGNORED_CALLS: &[&str] = &[
    "show", "tight_layout", "legend", "grid", "xticks", "yticks", "xlim", "ylim", "colorbar",
    "savefig", "axis", "set_xticks", "set_yticks", "set_xticklabels", "set_yticklabels",
    "tick_params", "set_xlim", "set_ylim", "set_size_inches", "autofmt_xdate", "axhline",
    "axvline", "text", "annotate", "set_facecolor", "subplots_adjust", "style",
];

const LABEL_CALLS: &[&str] = &["title", "xlabel", "ylabel", "suptitle", "set_title", "set_xlabel", "set_ylabel"];

pub fn is_plot_kind(name: &str) -> bool {
    PLOT_KINDS.contains(&name)
}

pub fn pyplot_attribute(name: &str) -> Option<Value> {
    let known = DRAW_CALLS.contains(&name)
        || IGNORED_CALLS.contains(&name)
        || LABEL_CALLS.contains(&name)
        || matches!(name, "figure" | "subplots" | "gcf" | "gca" | "close");
    known.then(|| Value::Method(Box::new(Value::Namespace(Namespace::Pyplot)), name.to_string()))
}

pub fn chart_attribute(chart: &Rc<RefCell<Chart>>, name: &str) -> Option<Value> {
    if matches!(name, "figure" | "axes") {
        return Some(Value::Chart(chart.clone()));
    }
    let known = DRAW_CALLS.contains(&name)
        || IGNORED_CALLS.contains(&name)
        || LABEL_CALLS.contains(&name)
        || matches!(name, "get_figure" | "gca");
    known.then(|| Value::Method(Box::new(Value::Chart(chart.clone())), name.to_string()))
}

pub fn pyplot_call(interp: &mut Interpreter, name: &str, args: Args) -> ScriptResult<Value> {
    match name {
        "figure" => Ok(Value::Chart(interp.new_figure())),
        "subplots" => {
            let rows = args.int_or(0, "nrows", 1)?;
            let cols = args.int_or(1, "ncols", 1)?;
            if rows != 1 || cols != 1 {
                return Err(ScriptError::unsupported("only a single subplot per figure is supported"));
            }
            let figure = interp.new_figure();
            Ok(Value::Tuple(vec![Value::Chart(figure.clone()), Value::Chart(figure)]))
        }
        "gcf" | "gca" => Ok(Value::Chart(interp.figure())),
        "close" => {
            interp.close_figure();
            Ok(Value::None)
        }
        _ => {
            let figure = interp.figure();
            figure_call(&figure, name, &args)
        }
    }
}

pub fn chart_call(
    interp: &mut Interpreter,
    chart: &Rc<RefCell<Chart>>,
    name: &str,
    args: Args,
) -> ScriptResult<Value> {
    interp.set_figure(chart.clone());
    match name {
        "get_figure" | "gca" => Ok(Value::Chart(chart.clone())),
        _ => figure_call(chart, name, &args),
    }
}

fn figure_call(figure: &Rc<RefCell<Chart>>, name: &str, args: &Args) -> ScriptResult<Value> {
    if IGNORED_CALLS.contains(&name) {
        return Ok(Value::None);
    }
    if LABEL_CALLS.contains(&name) {
        let text = args.get(0, "label").or_else(|| args.get(0, "t")).map(Value::to_text);
        let mut chart = figure.borrow_mut();
        match name.trim_start_matches("set_") {
            "xlabel" => chart.x_label = text,
            "ylabel" => chart.y_label = text,
            _ => chart.title = text,
        }
        return Ok(Value::None);
    }
    let mut chart = figure.borrow_mut();
    match name {
        "plot" => {
            let (xs, ys) = match (args.positional.first(), args.positional.get(1)) {
                (Some(y), None) => {
                    let ys = numbers(y)?;
                    (XValues::Numeric((0..ys.len()).map(|i| i as f64).collect()), y.clone())
                }
                (Some(x), Some(y)) => (x_values(x, Mark::Line)?, y.clone()),
                (None, _) => return Err(ScriptError::type_error("plot() needs data to draw")),
            };
            let ys = numbers(&ys)?;
            check_lengths(&xs, ys.len())?;
            chart.add_trace(label(args), Mark::Line, xs, ys);
        }
        "bar" | "barh" | "scatter" | "fill_between" => {
            let mark = match name {
                "bar" => Mark::Bar,
                "barh" => Mark::BarH,
                "fill_between" => Mark::Area,
                _ => Mark::Scatter,
            };
            let x = args.require(0, "x", name)?;
            let y = args
                .get(1, "height")
                .or_else(|| args.get(1, "width"))
                .or_else(|| args.get(1, "y"))
                .or_else(|| args.get(1, "y1"))
                .ok_or_else(|| ScriptError::type_error(format!("{}() missing the values to draw", name)))?;
            let xs = x_values(x, mark)?;
            let ys = numbers(y)?;
            check_lengths(&xs, ys.len())?;
            chart.add_trace(label(args), mark, xs, ys);
        }
        "hist" => {
            let values = numbers(args.require(0, "x", name)?)?;
            let bins = bin_count(args)?;
            let (centers, counts) = histogram(&values, bins);
            chart.add_trace(label(args), Mark::Bar, XValues::Numeric(centers), counts);
        }
        "pie" => {
            let source = args.require(0, "x", name)?;
            let values = numbers(source)?;
            let labels = match args.keyword("labels") {
                Some(labels) => labels.iterate()?.iter().map(Value::to_text).collect(),
                None => match source {
                    Value::Series(s) if s.index.is_some() => s.labels().iter().map(|l| l.to_string()).collect(),
                    _ => (0..values.len()).map(|i| i.to_string()).collect(),
                },
            };
            chart.set_pie(labels, values);
        }
        "imshow" => {
            let data = args.require(0, "X", name)?;
            let grid = heat_grid(data, args)?;
            chart.set_heatmap(grid);
        }
        _ => return Err(ScriptError::attribute("Figure", name)),
    }
    Ok(Value::None)
}

/// `df.plot(...)`, `df.plot.bar(...)`, `s.plot(kind='hist')`.
pub fn plot_accessor_call(
    interp: &mut Interpreter,
    target: &Value,
    kind: Option<&str>,
    args: Args,
) -> ScriptResult<Value> {
    let kind = match (kind, args.keyword("kind")) {
        (Some(kind), _) => kind.to_string(),
        (None, Some(Value::Str(kind))) => kind.clone(),
        (None, Some(other)) => {
            return Err(ScriptError::type_error(format!(
                "plot kind must be a string, not '{}'",
                other.type_name()
            )));
        }
        (None, None) => "line".to_string(),
    };
    if !is_plot_kind(&kind) {
        return Err(ScriptError::value(format!("{} is not a valid plot kind", kind)));
    }
    let figure = match args.keyword("ax") {
        Some(Value::Chart(ax)) => {
            interp.set_figure(ax.clone());
            ax.clone()
        }
        _ => interp.new_figure(),
    };
    {
        let mut chart = figure.borrow_mut();
        match target {
            Value::Series(s) => plot_series(&mut chart, s, &kind, &args)?,
            Value::Table(t) => plot_table(&mut chart, t, &kind, &args)?,
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{}' object cannot be plotted",
                    other.type_name()
                )));
            }
        }
        if let Some(title) = args.keyword("title") {
            chart.title = Some(title.to_text());
        }
        if let Some(text) = args.keyword("xlabel") {
            chart.x_label = Some(text.to_text());
        }
        if let Some(text) = args.keyword("ylabel") {
            chart.y_label = Some(text.to_text());
        }
    }
    Ok(Value::Chart(figure))
}

fn plot_series(chart: &mut Chart, s: &Series, kind: &str, args: &Args) -> ScriptResult<()> {
    let ys = cells_to_numbers(&s.values);
    match kind {
        "hist" => {
            let (centers, counts) = histogram(&ys, bin_count(args)?);
            chart.add_trace(s.name.clone(), Mark::Bar, XValues::Numeric(centers), counts);
        }
        "pie" => {
            let labels = s.labels().iter().map(|l| l.to_string()).collect();
            chart.set_pie(labels, ys);
        }
        "imshow" => return Err(ScriptError::value("imshow needs a table, not a series")),
        "scatter" => return Err(ScriptError::value("scatter plots need a table with x and y columns")),
        _ => {
            let mark = mark_of(kind)?;
            let xs = axis_from_labels(&s.labels(), s.index.is_none(), mark);
            chart.add_trace(s.name.clone(), mark, xs, ys);
            if let Some(index) = &s.index {
                chart.x_label = chart.x_label.take().or_else(|| index.name.clone());
            }
        }
    }
    Ok(())
}

fn plot_table(chart: &mut Chart, t: &Table, kind: &str, args: &Args) -> ScriptResult<()> {
    if kind == "imshow" {
        chart.set_heatmap(heat_grid(&Value::table(t.clone()), args)?);
        return Ok(());
    }
    let x_name = args.str(usize::MAX, "x")?;
    let y_names = match args.names(usize::MAX, "y")? {
        Some(names) => names,
        None => t
            .columns
            .iter()
            .filter(|c| c.dtype == ColumnType::Numeric && Some(&c.name) != x_name.as_ref())
            .map(|c| c.name.clone())
            .collect(),
    };
    if y_names.is_empty() {
        return Err(ScriptError::type_error("no numeric data to plot"));
    }
    match kind {
        "hist" => {
            let bins = bin_count(args)?;
            for name in &y_names {
                let values = cells_to_numbers(&t.require_column(name)?.values);
                let (centers, counts) = histogram(&values, bins);
                chart.add_trace(Some(name.clone()), Mark::Bar, XValues::Numeric(centers), counts);
            }
        }
        "pie" => {
            let [name] = y_names.as_slice() else {
                return Err(ScriptError::value("pie plots need a single y column"));
            };
            let values = cells_to_numbers(&t.require_column(name)?.values);
            let labels = match &x_name {
                Some(x) => t.require_column(x)?.values.iter().map(|c| c.to_string()).collect(),
                None => (0..t.num_rows()).map(|r| t.row_label(r).to_string()).collect(),
            };
            chart.set_pie(labels, values);
        }
        _ => {
            let mark = mark_of(kind)?;
            if mark == Mark::Scatter && (x_name.is_none() || y_names.len() != 1) {
                return Err(ScriptError::value("scatter plots need both x and y"));
            }
            for name in &y_names {
                let xs = match &x_name {
                    Some(x) => axis_from_labels(&t.require_column(x)?.values, false, mark),
                    None => {
                        let labels: Vec<CellValue> = (0..t.num_rows()).map(|r| t.row_label(r)).collect();
                        axis_from_labels(&labels, t.index.is_none(), mark)
                    }
                };
                let ys = cells_to_numbers(&t.require_column(name)?.values);
                chart.add_trace(Some(name.clone()), mark, xs, ys);
            }
            if let Some(x) = &x_name {
                chart.x_label = chart.x_label.take().or_else(|| Some(x.clone()));
            }
            if mark == Mark::Scatter {
                chart.y_label = chart.y_label.take().or_else(|| y_names.first().cloned());
            }
        }
    }
    Ok(())
}

fn mark_of(kind: &str) -> ScriptResult<Mark> {
    Mark::from_kind(kind).ok_or_else(|| ScriptError::value(format!("{} is not a valid plot kind", kind)))
}

fn label(args: &Args) -> Option<String> {
    args.keyword("label").map(Value::to_text)
}

fn bin_count(args: &Args) -> ScriptResult<usize> {
    let bins = args.int_or(usize::MAX, "bins", 10)?;
    if !(1..=1000).contains(&bins) {
        return Err(ScriptError::value("bins must be between 1 and 1000"));
    }
    Ok(bins as usize)
}

fn check_lengths(xs: &XValues, len: usize) -> ScriptResult<()> {
    let x_len = match xs {
        XValues::Numeric(v) | XValues::Time(v) => v.len(),
        XValues::Categories(v) => v.len(),
    };
    if x_len != len {
        return Err(ScriptError::value(format!(
            "x and y must have same first dimension, but have shapes ({},) and ({},)",
            x_len, len
        )));
    }
    Ok(())
}

fn cells_to_numbers(cells: &[CellValue]) -> Vec<f64> {
    cells
        .iter()
        .map(|c| match c {
            CellValue::Timestamp(ms) => *ms as f64,
            other => other.as_f64().unwrap_or(f64::NAN),
        })
        .collect()
}

/// Numbers from a series, list, tuple or range.
fn numbers(value: &Value) -> ScriptResult<Vec<f64>> {
    match value {
        Value::Series(s) => Ok(cells_to_numbers(&s.values)),
        other => other
            .iterate()?
            .iter()
            .map(|v| match v {
                Value::None => Ok(f64::NAN),
                Value::Timestamp(ms) => Ok(*ms as f64),
                v => v.as_f64().ok_or_else(|| {
                    ScriptError::type_error(format!("cannot plot values of type '{}'", v.type_name()))
                }),
            })
            .collect(),
    }
}

fn x_values(value: &Value, mark: Mark) -> ScriptResult<XValues> {
    let cells: Vec<CellValue> = match value {
        Value::Series(s) => s.values.clone(),
        other => other.iterate()?.iter().map(Value::require_cell).collect::<ScriptResult<_>>()?,
    };
    Ok(axis_from_labels(&cells, false, mark))
}

/// Text labels become categories, timestamps a time axis. Bars treat
/// numeric labels as categories, except plain row positions.
fn axis_from_labels(labels: &[CellValue], positional: bool, mark: Mark) -> XValues {
    let non_null = || labels.iter().filter(|l| !l.is_null());
    if non_null().any(|l| matches!(l, CellValue::Text(_))) {
        return XValues::Categories(labels.iter().map(|l| l.to_string()).collect());
    }
    if non_null().next().is_some() && non_null().all(|l| matches!(l, CellValue::Timestamp(_))) {
        return XValues::Time(cells_to_numbers(labels));
    }
    if matches!(mark, Mark::Bar | Mark::BarH) && !positional {
        return XValues::Categories(labels.iter().map(|l| l.to_string()).collect());
    }
    XValues::Numeric(cells_to_numbers(labels))
}

/// Equal-width bins over the finite values; the last bin is closed.
fn histogram(values: &[f64], bins: usize) -> (Vec<f64>, Vec<f64>) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (lo, hi) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if finite.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0.0; bins];
    for v in finite {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1.0;
    }
    let centers = (0..bins).map(|i| lo + width * (i as f64 + 0.5)).collect();
    (centers, counts)
}

fn heat_grid(data: &Value, args: &Args) -> ScriptResult<HeatGrid> {
    let colormap = Colormap::by_name(args.str(usize::MAX, "cmap")?.as_deref().unwrap_or("viridis"));
    let annotate = args.bool_or(usize::MAX, "annot", true)?;
    match data {
        Value::Table(t) => {
            let columns: Vec<_> = t.columns.iter().filter(|c| c.dtype == ColumnType::Numeric).collect();
            if columns.is_empty() {
                tracing::debug!("no numeric columns, drawing an empty heatmap");
            }
            let values = (0..t.num_rows())
                .map(|r| columns.iter().map(|c| c.values[r].as_f64().unwrap_or(f64::NAN)).collect())
                .collect();
            Ok(HeatGrid {
                rows: (0..t.num_rows()).map(|r| t.row_label(r).to_string()).collect(),
                columns: columns.iter().map(|c| c.name.clone()).collect(),
                values,
                colormap,
                annotate,
            })
        }
        Value::List(rows) | Value::Tuple(rows) => {
            let values = rows.iter().map(numbers).collect::<ScriptResult<Vec<Vec<f64>>>>()?;
            let width = values.iter().map(Vec::len).max().unwrap_or(0);
            Ok(HeatGrid {
                rows: (0..values.len()).map(|i| i.to_string()).collect(),
                columns: (0..width).map(|i| i.to_string()).collect(),
                values,
                colormap,
                annotate,
            })
        }
        other => Err(ScriptError::type_error(format!(
            "imshow cannot draw '{}'",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::Plot;
    use crate::runtime::frame::{Column, Index};

    fn sales() -> Table {
        Table::new(
            vec![
                Column::new("region", vec![CellValue::Text("n".into()), CellValue::Text("s".into())]),
                Column::new("units", vec![CellValue::Int(3), CellValue::Int(5)]),
                Column::new("price", vec![CellValue::Float(1.5), CellValue::Float(2.0)]),
            ],
            None,
        )
    }

    fn traces(chart: &Rc<RefCell<Chart>>) -> usize {
        match &chart.borrow().plot {
            Plot::Cartesian { traces, .. } => traces.len(),
            _ => 0,
        }
    }

    #[test]
    fn test_table_bar_plots_numeric_columns() {
        let mut interp = Interpreter::new(Table::default());
        let table = Value::table(sales());
        let args = Args::new(vec![], vec![("x".into(), Value::str("region"))]);
        let Value::Chart(chart) = plot_accessor_call(&mut interp, &table, Some("bar"), args).unwrap() else {
            panic!("expected a chart");
        };
        assert_eq!(traces(&chart), 2);
        assert_eq!(chart.borrow().x_label.as_deref(), Some("region"));
        assert!(Rc::ptr_eq(&chart, &interp.current_figure().unwrap()));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut interp = Interpreter::new(Table::default());
        let args = Args::new(vec![], vec![("kind".into(), Value::str("violin"))]);
        assert!(plot_accessor_call(&mut interp, &Value::table(sales()), None, args).is_err());
    }

    #[test]
    fn test_series_pie_uses_index_labels() {
        let series = Series::new(Some("n".into()), vec![CellValue::Int(1), CellValue::Int(3)])
            .with_index(Some(Index::new(None, vec![CellValue::Text("a".into()), CellValue::Text("b".into())])));
        let mut interp = Interpreter::new(Table::default());
        let Value::Chart(chart) =
            plot_accessor_call(&mut interp, &Value::series(series), Some("pie"), Args::default()).unwrap()
        else {
            panic!("expected a chart");
        };
        let chart = chart.borrow();
        let Plot::Pie { labels, values } = &chart.plot else {
            panic!("expected a pie");
        };
        assert_eq!(labels, &vec!["a".to_string(), "b".into()]);
        assert_eq!(values, &vec![1.0, 3.0]);
    }

    #[test]
    fn test_pyplot_draws_into_current_figure() {
        let mut interp = Interpreter::new(Table::default());
        let xs = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let ys = Value::List(vec![Value::Int(4), Value::Int(5)]);
        pyplot_call(&mut interp, "plot", Args::positional(vec![xs.clone(), ys.clone()])).unwrap();
        pyplot_call(&mut interp, "title", Args::positional(vec![Value::str("T")])).unwrap();
        let figure = interp.current_figure().unwrap();
        assert_eq!(traces(&figure), 1);
        assert_eq!(figure.borrow().title.as_deref(), Some("T"));
        let bad = Args::positional(vec![xs, Value::List(vec![Value::Int(1)])]);
        assert!(pyplot_call(&mut interp, "plot", bad).is_err());
    }

    #[test]
    fn test_subplots_share_one_figure() {
        let mut interp = Interpreter::new(Table::default());
        let Value::Tuple(pair) = pyplot_call(&mut interp, "subplots", Args::default()).unwrap() else {
            panic!("expected a tuple");
        };
        let (Value::Chart(fig), Value::Chart(ax)) = (&pair[0], &pair[1]) else {
            panic!("expected charts");
        };
        assert!(Rc::ptr_eq(fig, ax));
        let two = Args::positional(vec![Value::Int(2), Value::Int(1)]);
        assert!(pyplot_call(&mut interp, "subplots", two).is_err());
    }

    #[test]
    fn test_histogram_closes_last_bin() {
        let (centers, counts) = histogram(&[0.0, 1.0, 2.0, 3.0, 4.0, f64::NAN], 4);
        assert_eq!(centers.len(), 4);
        assert_eq!(counts, vec![1.0, 1.0, 1.0, 2.0]);
    }

    #[test]
    fn test_imshow_on_table() {
        let mut interp = Interpreter::new(Table::default());
        let args = Args::new(vec![], vec![("cmap".into(), Value::str("coolwarm"))]);
        let Value::Chart(chart) =
            plot_accessor_call(&mut interp, &Value::table(sales()), Some("imshow"), args).unwrap()
        else {
            panic!("expected a chart");
        };
        let chart = chart.borrow();
        let Plot::Heatmap(grid) = &chart.plot else {
            panic!("expected a heatmap");
        };
        assert_eq!(grid.columns, vec!["units".to_string(), "price".into()]);
        assert_eq!(grid.colormap, Colormap::Coolwarm);
    }
}
