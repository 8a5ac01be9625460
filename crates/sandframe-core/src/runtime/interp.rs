//! Tree-walking evaluator.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::chart::Chart;
use crate::script::ast::{
    CmpOp, Comprehension, ComprehensionKind, Expr, FStringPart, Literal, Program, Stmt,
    StmtKind,
};
use crate::script::{ErrorClass, ScriptError, ScriptResult};

use super::accessors;
use super::args::{Args, names_of};
use super::builtins;
use super::frame::Table;
use super::groupby;
use super::ops;
use super::pandas;
use super::plotting;
use super::scalars;
use super::series;
use super::styled;
use super::table;
use super::value::{AccessorKind, Builtin, Closure, Namespace, SliceBounds, Value};

/// Nested lambda calls allowed before evaluation gives up.
const MAX_CALL_DEPTH: usize = 100;

/// Name the script assigns its answer to.
pub const RESULT_SLOT: &str = "result";

pub struct Interpreter {
    globals: FxHashMap<String, Value>,
    /// Lambda parameters and comprehension targets, innermost last.
    scopes: Vec<Vec<(String, Value)>>,
    figure: Option<Rc<RefCell<Chart>>>,
    printed: Vec<String>,
    depth: usize,
}

impl Interpreter {
    /// An interpreter with `df`, `pd` and `plt` bound.
    pub fn new(df: Table) -> Self {
        let mut globals = FxHashMap::default();
        globals.insert("df".to_string(), Value::table(df));
        globals.insert("pd".to_string(), Value::Namespace(Namespace::Pandas));
        globals.insert("plt".to_string(), Value::Namespace(Namespace::Pyplot));
        Self {
            globals,
            scopes: Vec::new(),
            figure: None,
            printed: Vec::new(),
            depth: 0,
        }
    }

    pub fn run(&mut self, program: &Program) -> ScriptResult<()> {
        for stmt in &program.statements {
            self.exec(stmt).map_err(|e| e.at_line(stmt.line))?;
        }
        Ok(())
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Lines written by `print`.
    pub fn printed(&self) -> &[String] {
        &self.printed
    }

    pub(crate) fn print(&mut self, line: String) {
        tracing::debug!(output = %line, "script print");
        self.printed.push(line);
    }

    /// The figure implicit plotting draws into, if any.
    pub fn current_figure(&self) -> Option<Rc<RefCell<Chart>>> {
        self.figure.clone()
    }

    /// Current figure, created on first use.
    pub(crate) fn figure(&mut self) -> Rc<RefCell<Chart>> {
        match &self.figure {
            Some(figure) => figure.clone(),
            None => self.new_figure(),
        }
    }

    pub(crate) fn new_figure(&mut self) -> Rc<RefCell<Chart>> {
        let figure = Rc::new(RefCell::new(Chart::default()));
        self.figure = Some(figure.clone());
        figure
    }

    pub(crate) fn set_figure(&mut self, figure: Rc<RefCell<Chart>>) {
        self.figure = Some(figure);
    }

    pub(crate) fn close_figure(&mut self) {
        self.figure = None;
    }

    fn exec(&mut self, stmt: &Stmt) -> ScriptResult<()> {
        match &stmt.kind {
            StmtKind::Pass => Ok(()),
            StmtKind::Expr(expr) => self.eval(expr).map(|_| ()),
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target)?;
                let rhs = self.eval(value)?;
                let updated = ops::binary(*op, &current, &rhs)?;
                self.assign(target, updated)
            }
        }
    }

    fn set_name(&mut self, name: &str, value: Value) -> ScriptResult<()> {
        if Builtin::lookup(name).is_some() || matches!(name, "pd" | "plt") {
            tracing::debug!(name, "script shadows a builtin name");
        }
        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    fn lookup(&self, name: &str) -> ScriptResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, value)) = scope.iter().rev().find(|(n, _)| n == name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(ScriptError::name(name))
    }

    fn assign(&mut self, target: &Expr, value: Value) -> ScriptResult<()> {
        match target {
            Expr::Name(name) => self.set_name(name, value),
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = value.iterate()?;
                if items.len() != targets.len() {
                    return Err(ScriptError::value(if items.len() < targets.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", targets.len())
                    }));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Expr::Subscript { object, index } => {
                let key = self.eval_index(index)?;
                match object.as_ref() {
                    Expr::Name(name) => {
                        let container = self.lookup(name)?;
                        let updated = set_item(&container, &key, value)?;
                        self.set_name(name, updated)
                    }
                    Expr::Attribute { object, name: accessor }
                        if matches!(accessor.as_str(), "loc" | "iloc") =>
                    {
                        let Expr::Name(name) = object.as_ref() else {
                            return Err(temporary_target());
                        };
                        let positional = accessor == "iloc";
                        let updated = match self.lookup(name)? {
                            Value::Table(t) => {
                                Value::table(table::set_loc(&t, &key, value, positional)?)
                            }
                            Value::Series(s) => {
                                Value::series(series::set_loc(&s, &key, value, positional)?)
                            }
                            other => {
                                return Err(ScriptError::type_error(format!(
                                    "'{}' object has no attribute '{}'",
                                    other.type_name(),
                                    accessor
                                )));
                            }
                        };
                        self.set_name(name, updated)
                    }
                    _ => Err(temporary_target()),
                }
            }
            Expr::Attribute { object, name } => {
                let Expr::Name(var) = object.as_ref() else {
                    return Err(temporary_target());
                };
                let updated = match (self.lookup(var)?, name.as_str()) {
                    (Value::Table(t), "columns") => {
                        Value::table(table::with_column_names(&t, names_of(&value)?)?)
                    }
                    (Value::Series(s), "name") => {
                        let mut renamed = (*s).clone();
                        renamed.name = value.as_str().map(str::to_string);
                        Value::series(renamed)
                    }
                    (other, _) => {
                        return Err(ScriptError::unsupported(format!(
                            "assigning attribute '{}' of '{}' is not supported",
                            name,
                            other.type_name()
                        )));
                    }
                };
                self.set_name(var, updated)
            }
            _ => Err(ScriptError::new(ErrorClass::Syntax, "cannot assign to expression")),
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> ScriptResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(x) => Value::Float(*x),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::FString(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(s) => text.push_str(s),
                        FStringPart::Field { expr, spec } => {
                            let value = self.eval(expr)?;
                            let spec = spec.as_deref().unwrap_or("");
                            text.push_str(&super::format::format_value(&value, spec)?);
                        }
                    }
                }
                Ok(Value::Str(text))
            }
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::Dict(entries) => {
                let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict_insert(&mut out, key, value);
                }
                Ok(Value::Dict(out))
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                self.getattr(&object, name)
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                let key = self.eval_index(index)?;
                self.index(&object, &key)
            }
            Expr::Slice { .. } => self.eval_index(expr),
            Expr::Call {
                func,
                args,
                keywords,
            } => self.eval_call(func, args, keywords),
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)
            }
            Expr::Compare { left, comparisons } => self.eval_compare(left, comparisons),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.truthy()? {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy()? {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Not(operand) => {
                let operand = self.eval(operand)?;
                Ok(Value::Bool(!operand.truthy()?))
            }
            Expr::IfElse {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.truthy()? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Lambda(def) => Ok(Value::Lambda(Rc::new(Closure {
                def: def.clone(),
                captured: self.scopes.iter().flatten().cloned().collect(),
            }))),
            Expr::Comprehension(comp) => self.eval_comprehension(comp),
        }
    }

    /// Evaluate `expr` with extra names in scope, as `query` strings need.
    pub(crate) fn eval_with(
        &mut self,
        expr: &Expr,
        bindings: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        self.scopes.push(bindings);
        let result = self.eval(expr);
        self.scopes.pop();
        result
    }

    fn eval_all(&mut self, items: &[Expr]) -> ScriptResult<Vec<Value>> {
        items.iter().map(|item| self.eval(item)).collect()
    }

    /// Evaluate a subscript index, allowing slices at the top level and
    /// inside a tuple (`df.loc[:, 'a']`).
    fn eval_index(&mut self, index: &Expr) -> ScriptResult<Value> {
        match index {
            Expr::Slice { start, stop, step } => {
                let mut bound = |b: &Option<Box<Expr>>| -> ScriptResult<Option<Value>> {
                    b.as_ref().map(|e| self.eval(e)).transpose()
                };
                let bounds = SliceBounds {
                    start: bound(start)?,
                    stop: bound(stop)?,
                    step: bound(step)?,
                };
                Ok(Value::Slice(Box::new(bounds)))
            }
            Expr::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval_index(item))
                    .collect::<ScriptResult<Vec<_>>>()?;
                Ok(Value::Tuple(values))
            }
            other => self.eval(other),
        }
    }

    fn eval_compare(&mut self, left: &Expr, comparisons: &[(CmpOp, Expr)]) -> ScriptResult<Value> {
        let mut current = self.eval(left)?;
        let mut result = Value::Bool(true);
        for (op, right) in comparisons {
            let right = self.eval(right)?;
            result = ops::compare(*op, &current, &right)?;
            if comparisons.len() > 1 && !result.truthy()? {
                return Ok(result);
            }
            current = right;
        }
        Ok(result)
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[(String, Expr)],
    ) -> ScriptResult<Value> {
        let callee = self.eval(func)?;
        let positional = self.eval_all(args)?;
        let mut evaluated = Vec::with_capacity(keywords.len());
        let mut inplace = false;
        for (name, expr) in keywords {
            let value = self.eval(expr)?;
            if name == "inplace" {
                inplace = value.truthy()?;
                continue;
            }
            evaluated.push((name.clone(), value));
        }
        let result = self.call(&callee, Args::new(positional, evaluated))?;

        if !inplace {
            return Ok(result);
        }
        // `df.method(..., inplace=True)` rebinds the receiver.
        match func {
            Expr::Attribute { object, .. } => match object.as_ref() {
                Expr::Name(name) if matches!(result, Value::Table(_) | Value::Series(_)) => {
                    self.set_name(name, result)?;
                    Ok(Value::None)
                }
                _ => Err(ScriptError::unsupported(
                    "inplace=True is only supported on named tables and series",
                )),
            },
            _ => Err(ScriptError::unsupported(
                "inplace=True is only supported on methods",
            )),
        }
    }

    fn eval_comprehension(&mut self, comp: &Comprehension) -> ScriptResult<Value> {
        let items = self.eval(&comp.iter)?.iterate()?;
        self.scopes.push(Vec::new());
        let result = self.comprehension_body(comp, items);
        self.scopes.pop();
        result
    }

    fn comprehension_body(&mut self, comp: &Comprehension, items: Vec<Value>) -> ScriptResult<Value> {
        let mut list = Vec::new();
        let mut dict: Vec<(Value, Value)> = Vec::new();
        for item in items {
            let bindings = bind_targets(&comp.targets, item)?;
            if let Some(scope) = self.scopes.last_mut() {
                *scope = bindings;
            }
            let mut keep = true;
            for condition in &comp.conditions {
                if !self.eval(condition)?.truthy()? {
                    keep = false;
                    break;
                }
            }
            if !keep {
                continue;
            }
            match (comp.kind, &comp.key) {
                (ComprehensionKind::Dict, Some(key)) => {
                    let key = self.eval(key)?;
                    let value = self.eval(&comp.element)?;
                    dict_insert(&mut dict, key, value);
                }
                _ => list.push(self.eval(&comp.element)?),
            }
        }
        Ok(match comp.kind {
            ComprehensionKind::Dict => Value::Dict(dict),
            ComprehensionKind::List => Value::List(list),
        })
    }

    /// Call any callable value.
    pub fn call(&mut self, callee: &Value, args: Args) -> ScriptResult<Value> {
        match callee {
            Value::Builtin(builtin) => builtins::call(self, *builtin, args),
            Value::Lambda(closure) => self.call_lambda(closure, args),
            Value::Method(receiver, name) => self.call_method(receiver, name, args),
            Value::Accessor(AccessorKind::Plot, target) => {
                plotting::plot_accessor_call(self, target, None, args)
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_lambda(&mut self, closure: &Closure, args: Args) -> ScriptResult<Value> {
        let params = &closure.def.params;
        if !args.keywords.is_empty() || args.positional.len() != params.len() {
            return Err(ScriptError::type_error(format!(
                "<lambda>() takes {} positional arguments but {} were given",
                params.len(),
                args.positional.len() + args.keywords.len()
            )));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::new(
                ErrorClass::Recursion,
                "maximum recursion depth exceeded",
            ));
        }

        let mut scope = closure.captured.clone();
        scope.extend(params.iter().cloned().zip(args.positional));
        self.depth += 1;
        let saved = std::mem::replace(&mut self.scopes, vec![scope]);
        let result = self.eval(&closure.def.body);
        self.scopes = saved;
        self.depth -= 1;
        result
    }

    fn call_method(&mut self, receiver: &Value, name: &str, args: Args) -> ScriptResult<Value> {
        match receiver {
            Value::Table(t) => table::call(self, t, name, args),
            Value::Series(s) => series::call(self, s, name, args),
            Value::GroupBy(g) => groupby::call(self, g, name, args),
            Value::Namespace(Namespace::Pandas) => pandas::call(self, name, args),
            Value::Namespace(Namespace::Pyplot) => plotting::pyplot_call(self, name, args),
            Value::Accessor(AccessorKind::Plot, target) => {
                plotting::plot_accessor_call(self, target, Some(name), args)
            }
            Value::Accessor(kind, target) => accessors::call(self, *kind, target, name, args),
            Value::Chart(chart) => plotting::chart_call(self, chart, name, args),
            Value::Styled(styler) => styled::call(styler, name, args),
            other => scalars::call(self, other, name, args),
        }
    }

    /// Attribute access. Names starting with `_` are never reachable.
    pub fn getattr(&mut self, value: &Value, name: &str) -> ScriptResult<Value> {
        if name.starts_with('_') {
            return Err(ScriptError::new(
                ErrorClass::Attribute,
                format!("access to private attribute '{}' is denied", name),
            ));
        }
        let found = match value {
            Value::Table(t) => table::attribute(t, name)?,
            Value::Series(s) => series::attribute(s, name)?,
            Value::GroupBy(g) => groupby::attribute(g, name)?,
            Value::Namespace(Namespace::Pandas) => pandas::attribute(name),
            Value::Namespace(Namespace::Pyplot) => plotting::pyplot_attribute(name),
            Value::Accessor(kind, target) => accessors::attribute(*kind, target, name)?,
            Value::Chart(chart) => plotting::chart_attribute(chart, name),
            Value::Styled(styler) => styled::attribute(styler, name),
            other => scalars::attribute(other, name)?,
        };
        found.ok_or_else(|| ScriptError::attribute(value.type_name(), name))
    }

    /// `object[key]`.
    pub fn index(&mut self, object: &Value, key: &Value) -> ScriptResult<Value> {
        match object {
            Value::Table(t) => table::subscript(t, key),
            Value::Series(s) => series::subscript(s, key),
            Value::GroupBy(g) => groupby::subscript(g, key),
            Value::Accessor(AccessorKind::Loc, target) | Value::Accessor(AccessorKind::ILoc, target) => {
                let positional = matches!(object, Value::Accessor(AccessorKind::ILoc, _));
                match target.as_ref() {
                    Value::Table(t) => table::loc(t, key, positional),
                    Value::Series(s) => series::loc(s, key, positional),
                    other => Err(not_subscriptable(other)),
                }
            }
            Value::Accessor(AccessorKind::Str, target) => accessors::str_subscript(target, key),
            other => scalars::subscript(other, key),
        }
    }
}

fn temporary_target() -> ScriptError {
    ScriptError::unsupported("assignment only works on named variables")
}

pub(crate) fn not_subscriptable(value: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "'{}' object is not subscriptable",
        value.type_name()
    ))
}

/// Insert or replace a key in an ordered mapping.
pub(crate) fn dict_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries
        .iter_mut()
        .find(|(k, _)| super::value::values_equal(k, &key))
    {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

fn bind_targets(targets: &[String], item: Value) -> ScriptResult<Vec<(String, Value)>> {
    if targets.len() == 1 {
        return Ok(vec![(targets[0].clone(), item)]);
    }
    let parts = item.iterate()?;
    if parts.len() != targets.len() {
        return Err(ScriptError::value(format!(
            "cannot unpack {} values into {} names",
            parts.len(),
            targets.len()
        )));
    }
    Ok(targets.iter().cloned().zip(parts).collect())
}

/// `container[key] = value`, returning the updated container.
fn set_item(container: &Value, key: &Value, value: Value) -> ScriptResult<Value> {
    match container {
        Value::Table(t) => Ok(Value::table(table::set_item(t, key, value)?)),
        Value::Series(s) => Ok(Value::series(series::set_item(s, key, value)?)),
        Value::Dict(entries) => {
            let mut entries = entries.clone();
            dict_insert(&mut entries, key.clone(), value);
            Ok(Value::Dict(entries))
        }
        Value::List(items) => {
            let mut items = items.clone();
            let position = scalars::sequence_position(key, items.len())?;
            items[position] = value;
            Ok(Value::List(items))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}
