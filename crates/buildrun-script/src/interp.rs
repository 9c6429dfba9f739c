//! Tree-walking interpreter.
//!
//! Variables are dynamically scoped: a function body sees its own
//! parameters first, then whatever its callers have in scope, then globals.
//! Helper functions defined for a build can therefore read the parameters of
//! the function that invoked them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use buildrun_core::{BlockStates, CoreError, Fill, Place, Point3};
use tracing::debug;

use crate::ast::{BinOp, Expr, ExprKind, FnDef, Stmt, StmtKind, UnaryOp};
use crate::error::ScriptError;
use crate::value::Value;

/// Names a script may call but not redefine.
const BUILTINS: &[&str] = &[
    "place", "fill", "range", "sqrt", "abs", "min", "max", "floor", "int",
];

/// The capability surface a script runs against.
///
/// Primitives arrive fully validated; the host decides what issuing one
/// means (dispatching a command, recording it for a dry run, ...).
pub trait Host {
    type Error: std::error::Error + Send + Sync + 'static;

    fn place(&mut self, place: Place) -> Result<(), Self::Error>;

    fn fill(&mut self, fill: Fill) -> Result<(), Self::Error>;
}

/// Execution bounds for one script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Statements plus loop iterations.
    pub max_steps: u64,
    pub max_call_depth: usize,
    pub max_primitives: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_call_depth: 64,
            max_primitives: 200_000,
        }
    }
}

/// Counters from a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub steps: u64,
    pub primitives: u64,
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub(crate) struct Interpreter<'a, H: Host> {
    host: &'a mut H,
    limits: &'a Limits,
    scopes: Vec<HashMap<String, Value>>,
    functions: HashMap<String, Arc<FnDef>>,
    call_depth: usize,
    loop_depth: usize,
    stats: RunStats,
}

impl<'a, H: Host> Interpreter<'a, H> {
    pub(crate) fn new(host: &'a mut H, limits: &'a Limits) -> Self {
        Self {
            host,
            limits,
            scopes: vec![HashMap::new()],
            functions: HashMap::new(),
            call_depth: 0,
            loop_depth: 0,
            stats: RunStats::default(),
        }
    }

    pub(crate) fn run(mut self, program: &[Stmt]) -> Result<RunStats, ScriptError> {
        // A top-level `return` simply ends the script.
        self.exec_stmts(program)?;
        debug!(
            steps = self.stats.steps,
            primitives = self.stats.primitives,
            "Script finished"
        );
        Ok(self.stats)
    }

    // -- statements ---------------------------------------------------------

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.stats.steps += 1;
        if self.stats.steps > self.limits.max_steps {
            return Err(ScriptError::LimitExceeded(format!(
                "more than {} steps",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        self.scopes.push(HashMap::new());
        let flow = self.exec_stmts(stmts);
        self.scopes.pop();
        flow
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.tick()?;
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                let value = self.eval(expr)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
            }
            StmtKind::Assign(name, expr) => {
                let value = self.eval(expr)?;
                match self.lookup_mut(name) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(ScriptError::runtime(
                            line,
                            format!("assignment to undeclared variable '{}'", name),
                        ))
                    }
                }
            }
            StmtKind::Fn(def) => {
                if BUILTINS.contains(&def.name.as_str()) {
                    return Err(ScriptError::runtime(
                        line,
                        format!("cannot redefine builtin '{}'", def.name),
                    ));
                }
                self.functions.insert(def.name.clone(), Arc::clone(def));
            }
            StmtKind::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let start = self.eval_int(start, "range start")?;
                let end = self.eval_int(end, "range end")?;
                let step = match step {
                    Some(expr) => self.eval_int(expr, "range step")?,
                    None => 1,
                };
                if step == 0 {
                    return Err(ScriptError::runtime(line, "range step must not be zero"));
                }
                return self.exec_for(var, start, end, step, body);
            }
            StmtKind::While(cond, body) => return self.exec_while(cond, body),
            StmtKind::If(cond, then, otherwise) => {
                if self.eval(cond)?.is_truthy() {
                    return self.exec_block(then);
                }
                if let Some(otherwise) = otherwise {
                    return self.exec_block(otherwise);
                }
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break | StmtKind::Continue if self.loop_depth == 0 => {
                return Err(ScriptError::runtime(line, "break/continue outside of a loop"));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        var: &str,
        start: i64,
        end: i64,
        step: i64,
        body: &[Stmt],
    ) -> Result<Flow, ScriptError> {
        self.loop_depth += 1;
        let mut i = start;
        let mut result = Ok(Flow::Normal);
        while (step > 0 && i < end) || (step < 0 && i > end) {
            if let Err(e) = self.tick() {
                result = Err(e);
                break;
            }
            let mut scope = HashMap::new();
            scope.insert(var.to_string(), Value::Int(i));
            self.scopes.push(scope);
            let flow = self.exec_stmts(body);
            self.scopes.pop();
            match flow {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => break,
                other => {
                    result = other;
                    break;
                }
            }
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
        self.loop_depth -= 1;
        result
    }

    fn exec_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<Flow, ScriptError> {
        self.loop_depth += 1;
        let result = loop {
            if let Err(e) = self.tick() {
                break Err(e);
            }
            match self.eval(cond) {
                Ok(v) if v.is_truthy() => {}
                Ok(_) => break Ok(Flow::Normal),
                Err(e) => break Err(e),
            }
            match self.exec_block(body) {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => break Ok(Flow::Normal),
                other => break other,
            }
        };
        self.loop_depth -= 1;
        result
    }

    // -- variables ----------------------------------------------------------

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }

    // -- expressions --------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::Var(name) => self.lookup(name).cloned().ok_or_else(|| {
                ScriptError::runtime(line, format!("undefined variable '{}'", name))
            }),
            ExprKind::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Map(map))
            }
            ExprKind::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, value, line)
            }
            ExprKind::Binary(BinOp::And, lhs, rhs) => {
                if !self.eval(lhs)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs)?.is_truthy()))
            }
            ExprKind::Binary(BinOp::Or, lhs, rhs) => {
                if self.eval(lhs)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs)?.is_truthy()))
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                binary(*op, a, b, line)
            }
            ExprKind::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, values, line)
            }
        }
    }

    fn eval_int(&mut self, expr: &Expr, what: &str) -> Result<i64, ScriptError> {
        match self.eval(expr)? {
            Value::Int(n) => Ok(n),
            other => Err(ScriptError::runtime(
                expr.line,
                format!("{} must be an int, got {}", what, other.type_name()),
            )),
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>, line: usize) -> Result<Value, ScriptError> {
        match name {
            "place" => self.place(&args, line),
            "fill" => self.fill(&args, line),
            "range" => Err(ScriptError::runtime(
                line,
                "range() can only be used as a for-loop source",
            )),
            _ if BUILTINS.contains(&name) => builtin(name, &args, line),
            _ => self.call_user(name, args, line),
        }
    }

    fn call_user(&mut self, name: &str, args: Vec<Value>, line: usize) -> Result<Value, ScriptError> {
        let def = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::runtime(line, format!("undefined function '{}'", name)))?;
        if args.len() != def.params.len() {
            return Err(ScriptError::runtime(
                line,
                format!(
                    "{}() takes {} argument(s), {} given",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
            ));
        }
        if self.call_depth >= self.limits.max_call_depth {
            return Err(ScriptError::LimitExceeded(format!(
                "call depth exceeds {}",
                self.limits.max_call_depth
            )));
        }

        let frame: HashMap<String, Value> = def.params.iter().cloned().zip(args).collect();
        self.scopes.push(frame);
        self.call_depth += 1;
        let saved_loop_depth = std::mem::replace(&mut self.loop_depth, 0);

        let result = self.exec_stmts(&def.body);

        self.loop_depth = saved_loop_depth;
        self.call_depth -= 1;
        self.scopes.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Nil),
        }
    }

    // -- host primitives ----------------------------------------------------

    fn reserve_primitive(&mut self) -> Result<(), ScriptError> {
        if self.stats.primitives >= self.limits.max_primitives {
            return Err(ScriptError::LimitExceeded(format!(
                "more than {} primitives",
                self.limits.max_primitives
            )));
        }
        self.stats.primitives += 1;
        Ok(())
    }

    fn place(&mut self, args: &[Value], line: usize) -> Result<Value, ScriptError> {
        if !(4..=5).contains(&args.len()) {
            return Err(ScriptError::runtime(
                line,
                "place() takes (x, y, z, block[, options])",
            ));
        }
        let pos = point(&args[0..3], line)?;
        let block = string_arg(&args[3], "block", line)?;
        let mut place = Place::new(pos, block).map_err(|e| primitive_error(line, e))?;

        for (key, value) in options(args.get(4), line)? {
            place = match key.as_str() {
                "mode" => place
                    .with_mode(string_arg(value, "mode", line)?)
                    .map_err(|e| primitive_error(line, e))?,
                "states" => place.with_states(block_states(value, line)?),
                other => {
                    return Err(primitive_error(
                        line,
                        CoreError::invalid(format!(
                            "unknown place option: {}. Must be one of: mode, states",
                            other
                        )),
                    ))
                }
            };
        }

        self.reserve_primitive()?;
        self.host.place(place).map_err(|e| ScriptError::Host {
            line,
            source: Box::new(e),
        })?;
        Ok(Value::Nil)
    }

    fn fill(&mut self, args: &[Value], line: usize) -> Result<Value, ScriptError> {
        if !(7..=8).contains(&args.len()) {
            return Err(ScriptError::runtime(
                line,
                "fill() takes (x1, y1, z1, x2, y2, z2, block[, options])",
            ));
        }
        let from = point(&args[0..3], line)?;
        let to = point(&args[3..6], line)?;
        let block = string_arg(&args[6], "block", line)?;
        let mut fill = Fill::new(from, to, block).map_err(|e| primitive_error(line, e))?;

        let mut filter = None;
        let mut filter_states = None;
        for (key, value) in options(args.get(7), line)? {
            match key.as_str() {
                "mode" => {
                    fill = fill
                        .with_mode(string_arg(value, "mode", line)?)
                        .map_err(|e| primitive_error(line, e))?
                }
                "states" => fill = fill.with_states(block_states(value, line)?),
                "replace" => filter = Some(string_arg(value, "replace", line)?),
                "replace_states" => filter_states = Some(block_states(value, line)?),
                other => {
                    return Err(primitive_error(
                        line,
                        CoreError::invalid(format!(
                            "unknown fill option: {}. Must be one of: mode, states, replace, replace_states",
                            other
                        )),
                    ))
                }
            }
        }
        match (filter, filter_states) {
            (Some(filter), states) => {
                fill = fill
                    .with_replace_filter(filter, states.unwrap_or_default())
                    .map_err(|e| primitive_error(line, e))?;
            }
            (None, Some(_)) => {
                return Err(primitive_error(
                    line,
                    CoreError::invalid("replace_states requires a replace filter"),
                ))
            }
            (None, None) => {}
        }

        self.reserve_primitive()?;
        self.host.fill(fill).map_err(|e| ScriptError::Host {
            line,
            source: Box::new(e),
        })?;
        Ok(Value::Nil)
    }
}

fn primitive_error(line: usize, source: CoreError) -> ScriptError {
    ScriptError::Primitive { line, source }
}

fn point(args: &[Value], line: usize) -> Result<Point3, ScriptError> {
    Ok(Point3::new(
        coordinate(&args[0], line)?,
        coordinate(&args[1], line)?,
        coordinate(&args[2], line)?,
    ))
}

/// Ints pass through; floats are truncated toward zero.
fn coordinate(value: &Value, line: usize) -> Result<i32, ScriptError> {
    let out_of_range = || {
        primitive_error(
            line,
            CoreError::invalid(format!("coordinate out of range: {}", value)),
        )
    };
    match value {
        Value::Int(n) => i32::try_from(*n).map_err(|_| out_of_range()),
        Value::Float(f) if f.is_finite() => {
            let t = f.trunc();
            if t < i32::MIN as f64 || t > i32::MAX as f64 {
                Err(out_of_range())
            } else {
                Ok(t as i32)
            }
        }
        Value::Float(_) => Err(out_of_range()),
        other => Err(ScriptError::runtime(
            line,
            format!("coordinate must be a number, got {}", other.type_name()),
        )),
    }
}

fn string_arg<'v>(value: &'v Value, what: &str, line: usize) -> Result<&'v str, ScriptError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ScriptError::runtime(
            line,
            format!("{} must be a string, got {}", what, other.type_name()),
        )),
    }
}

fn options(value: Option<&Value>, line: usize) -> Result<Vec<(&String, &Value)>, ScriptError> {
    match value {
        None | Some(Value::Nil) => Ok(Vec::new()),
        Some(Value::Map(map)) => Ok(map.iter().collect()),
        Some(other) => Err(ScriptError::runtime(
            line,
            format!("options must be a map, got {}", other.type_name()),
        )),
    }
}

fn block_states(value: &Value, line: usize) -> Result<BlockStates, ScriptError> {
    let Value::Map(map) = value else {
        return Err(ScriptError::runtime(
            line,
            format!("states must be a map, got {}", value.type_name()),
        ));
    };
    let mut states = BlockStates::new();
    for (key, value) in map {
        let text = match value {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(primitive_error(
                    line,
                    CoreError::invalid(format!(
                        "block state {} has unsupported value type {}",
                        key,
                        other.type_name()
                    )),
                ))
            }
        };
        states
            .insert(key.as_str(), text)
            .map_err(|e| primitive_error(line, e))?;
    }
    Ok(states)
}

// -- operators and builtins -------------------------------------------------

fn type_error(line: usize, op: &str, a: &Value, b: &Value) -> ScriptError {
    ScriptError::runtime(
        line,
        format!(
            "unsupported operand types for {}: {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ),
    )
}

fn overflow(line: usize) -> ScriptError {
    ScriptError::runtime(line, "integer overflow")
}

fn unary(op: UnaryOp, value: Value, line: usize) -> Result<Value, ScriptError> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(|| overflow(line)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(ScriptError::runtime(
            line,
            format!("cannot negate {}", other.type_name()),
        )),
    }
}

fn binary(op: BinOp, a: Value, b: Value, line: usize) -> Result<Value, ScriptError> {
    use Value::{Bool, Float, Int, Str};

    match op {
        BinOp::Add => match (&a, &b) {
            (Int(x), Int(y)) => x.checked_add(*y).map(Int).ok_or_else(|| overflow(line)),
            (Str(x), Str(y)) => Ok(Str(format!("{}{}", x, y))),
            (Str(x), other) => Ok(Str(format!("{}{}", x, other))),
            (other, Str(y)) => Ok(Str(format!("{}{}", other, y))),
            _ => float_op(&a, &b, line, "+", |x, y| x + y),
        },
        BinOp::Sub => match (&a, &b) {
            (Int(x), Int(y)) => x.checked_sub(*y).map(Int).ok_or_else(|| overflow(line)),
            _ => float_op(&a, &b, line, "-", |x, y| x - y),
        },
        BinOp::Mul => match (&a, &b) {
            (Int(x), Int(y)) => x.checked_mul(*y).map(Int).ok_or_else(|| overflow(line)),
            _ => float_op(&a, &b, line, "*", |x, y| x * y),
        },
        BinOp::Div => {
            let (x, y) = numbers(&a, &b, line, "/")?;
            if y == 0.0 {
                return Err(ScriptError::runtime(line, "division by zero"));
            }
            Ok(Float(x / y))
        }
        BinOp::Rem => match (&a, &b) {
            (Int(_), Int(0)) => Err(ScriptError::runtime(line, "modulo by zero")),
            (Int(x), Int(y)) => x.checked_rem_euclid(*y).map(Int).ok_or_else(|| overflow(line)),
            _ => {
                let (x, y) = numbers(&a, &b, line, "%")?;
                if y == 0.0 {
                    return Err(ScriptError::runtime(line, "modulo by zero"));
                }
                Ok(Float(x.rem_euclid(y)))
            }
        },
        BinOp::Eq => Ok(Bool(equals(&a, &b))),
        BinOp::NotEq => Ok(Bool(!equals(&a, &b))),
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
            let ordering = match (&a, &b) {
                (Int(x), Int(y)) => x.partial_cmp(y),
                (Str(x), Str(y)) => x.partial_cmp(y),
                _ => {
                    let (x, y) = numbers(&a, &b, line, "comparison")?;
                    x.partial_cmp(&y)
                }
            };
            let Some(ordering) = ordering else {
                return Ok(Bool(false));
            };
            Ok(Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::LtEq => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        // Short-circuited in eval.
        BinOp::And => Ok(Bool(a.is_truthy() && b.is_truthy())),
        BinOp::Or => Ok(Bool(a.is_truthy() || b.is_truthy())),
    }
}

fn numbers(a: &Value, b: &Value, line: usize, op: &str) -> Result<(f64, f64), ScriptError> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(type_error(line, op, a, b)),
    }
}

fn float_op(
    a: &Value,
    b: &Value,
    line: usize,
    op: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, ScriptError> {
    let (x, y) = numbers(a, b, line, op)?;
    Ok(Value::Float(f(x, y)))
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn float_to_int(f: f64, line: usize) -> Result<Value, ScriptError> {
    if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(ScriptError::runtime(
            line,
            format!("{} cannot be converted to int", f),
        ));
    }
    Ok(Value::Int(f as i64))
}

fn builtin(name: &str, args: &[Value], line: usize) -> Result<Value, ScriptError> {
    let one = |args: &[Value]| -> Result<Value, ScriptError> {
        match args {
            [v] => Ok(v.clone()),
            _ => Err(ScriptError::runtime(
                line,
                format!("{}() takes exactly 1 argument, {} given", name, args.len()),
            )),
        }
    };
    let not_a_number = |v: &Value| {
        ScriptError::runtime(
            line,
            format!("{}() expects a number, got {}", name, v.type_name()),
        )
    };

    match name {
        "sqrt" => {
            let v = one(args)?;
            let x = v.as_f64().ok_or_else(|| not_a_number(&v))?;
            if x < 0.0 {
                return Err(ScriptError::runtime(line, "sqrt() of a negative number"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        "abs" => match one(args)? {
            Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(|| overflow(line)),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(not_a_number(&other)),
        },
        "floor" => match one(args)? {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Float(f) => float_to_int(f.floor(), line),
            other => Err(not_a_number(&other)),
        },
        "int" => match one(args)? {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Float(f) => float_to_int(f.trunc(), line),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            other => Err(not_a_number(&other)),
        },
        "min" | "max" => {
            if args.is_empty() {
                return Err(ScriptError::runtime(
                    line,
                    format!("{}() takes at least 1 argument", name),
                ));
            }
            if args.iter().all(|v| matches!(v, Value::Int(_))) {
                let ints = args.iter().filter_map(|v| match v {
                    Value::Int(n) => Some(*n),
                    _ => None,
                });
                let picked = if name == "min" { ints.min() } else { ints.max() };
                return Ok(picked.map(Value::Int).unwrap_or_default());
            }
            let mut best: Option<f64> = None;
            for v in args {
                let x = v.as_f64().ok_or_else(|| not_a_number(v))?;
                best = Some(match best {
                    None => x,
                    Some(b) if name == "min" => b.min(x),
                    Some(b) => b.max(x),
                });
            }
            Ok(best.map(Value::Float).unwrap_or_default())
        }
        _ => Err(ScriptError::runtime(
            line,
            format!("undefined function '{}'", name),
        )),
    }
}
