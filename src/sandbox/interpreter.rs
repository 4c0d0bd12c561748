//! Tree-walking evaluator for parsed snippets.

use std::collections::HashMap;
use std::rc::Rc;

use super::ast::*;
use super::builtins::{self, list_index, Args};
use super::error::{ErrorKind, SandboxError, SandboxResult};
use super::frame::{series_compare, series_unary};
use super::plotly;
use super::tables;
use super::value::{binary, format_spec, type_error, Dict, Lambda, Value};
use super::SandboxLimits;

/// Nested scopes (lambda frames, comprehensions) allowed at once
const MAX_DEPTH: usize = 64;

/// One hop of an assignment target below its root name
#[derive(Debug, Clone)]
pub enum Step {
    Attr(String),
    Key(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interpreter {
    globals: HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
    steps: u64,
    max_steps: u64,
}

impl Interpreter {
    pub fn new(limits: &SandboxLimits) -> Self {
        Self {
            globals: HashMap::new(),
            scopes: Vec::new(),
            steps: 0,
            max_steps: limits.max_steps,
        }
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn get_global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Steps consumed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn run(&mut self, program: &[Stmt]) -> SandboxResult<()> {
        match self.exec_block(program)? {
            Flow::Normal => Ok(()),
            Flow::Break => Err(SandboxError::syntax("'break' outside loop", 0)),
            Flow::Continue => Err(SandboxError::syntax("'continue' not properly in loop", 0)),
        }
    }

    fn tick(&mut self) -> SandboxResult<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(SandboxError::new(
                ErrorKind::ResourceLimit,
                format!("snippet exceeded its budget of {} steps", self.max_steps),
            ));
        }
        Ok(())
    }

    // ---- names ----

    fn lookup(&self, name: &str) -> SandboxResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        builtins::builtin(name).ok_or_else(|| {
            SandboxError::new(ErrorKind::Name, format!("name '{}' is not defined", name))
        })
    }

    fn var_mut(&mut self, name: &str) -> Option<&mut Value> {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
            return scope.get_mut(name);
        }
        self.globals.get_mut(name)
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => scope.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    fn push_scope(&mut self, scope: HashMap<String, Value>) -> SandboxResult<()> {
        if self.scopes.len() >= MAX_DEPTH {
            return Err(SandboxError::new(
                ErrorKind::ResourceLimit,
                "maximum recursion depth exceeded",
            ));
        }
        self.scopes.push(scope);
        Ok(())
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt]) -> SandboxResult<Flow> {
        for stmt in body {
            let flow = self.exec(stmt)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> SandboxResult<Flow> {
        self.tick().map_err(|e| e.at(stmt.line))?;
        self.exec_kind(&stmt.kind).map_err(|e| e.at(stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> SandboxResult<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::For { target, iter, body } => {
                let items = self.eval(iter)?.iterate()?;
                for item in items {
                    self.tick()?;
                    self.assign(target, item)?;
                    if self.exec_block(body)? == Flow::Break {
                        break;
                    }
                }
            }
            StmtKind::While { condition, body } => loop {
                self.tick()?;
                if !self.eval(condition)?.truthy()? {
                    break;
                }
                if self.exec_block(body)? == Flow::Break {
                    break;
                }
            },
            StmtKind::If { branches, orelse } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.truthy()? {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::Import(names) => {
                for import in names {
                    match &import.alias {
                        Some(alias) => {
                            let module = builtins::resolve_module(&import.path)?;
                            self.bind(alias, module);
                        }
                        None => {
                            builtins::resolve_module(&import.path)?;
                            let top = import.path.split('.').next().unwrap_or(&import.path);
                            let module = builtins::resolve_module(top)?;
                            self.bind(top, module);
                        }
                    }
                }
            }
            StmtKind::FromImport { module, names } => {
                let parent = builtins::resolve_module(module)?;
                for import in names {
                    let value = builtins::get_attr(&parent, &import.path)
                        .or_else(|_| {
                            builtins::resolve_module(&format!("{}.{}", module, import.path))
                        })
                        .map_err(|_| {
                            SandboxError::new(
                                ErrorKind::Import,
                                format!("cannot import name '{}' from '{}'", import.path, module),
                            )
                        })?;
                    let name = import.alias.as_deref().unwrap_or(&import.path);
                    self.bind(name, value);
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    // ---- assignment ----

    /// Root name and evaluated steps of a place expression
    fn place_path(&mut self, expr: &Expr) -> SandboxResult<(String, Vec<Step>)> {
        match expr {
            Expr::Name(name) => Ok((name.clone(), Vec::new())),
            Expr::Attribute(obj, attr) => {
                let (root, mut steps) = self.place_path(obj)?;
                steps.push(Step::Attr(attr.clone()));
                Ok((root, steps))
            }
            Expr::Subscript(obj, key) => {
                let (root, mut steps) = self.place_path(obj)?;
                if matches!(**key, Expr::Slice { .. }) {
                    return Err(type_error("slice assignment is not supported"));
                }
                let key = self.eval(key)?;
                steps.push(Step::Key(key));
                Ok((root, steps))
            }
            _ => Err(SandboxError::syntax("cannot assign to expression", 0)),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> SandboxResult<()> {
        match target {
            Expr::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = value.iterate()?;
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(SandboxError::value_error(message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Expr::Attribute(..) | Expr::Subscript(..) if target.is_place() => {
                let (root, steps) = self.place_path(target)?;
                self.store(&root, &steps, value)
            }
            _ => Err(SandboxError::syntax("cannot assign to expression", 0)),
        }
    }

    fn store(&mut self, root: &str, steps: &[Step], value: Value) -> SandboxResult<()> {
        let slot = self.var_mut(root).ok_or_else(|| {
            SandboxError::new(ErrorKind::Name, format!("name '{}' is not defined", root))
        })?;
        store_into(slot, steps, value)
    }

    fn load_path(&self, root: &str, steps: &[Step]) -> SandboxResult<Value> {
        let mut current = self.lookup(root)?;
        for step in steps {
            current = match step {
                Step::Attr(name) => builtins::get_attr(&current, name)?,
                Step::Key(key) => builtins::get_item(&current, key)?,
            };
        }
        Ok(current)
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> SandboxResult<()> {
        match target {
            Expr::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = binary(op, &current, &rhs)?;
                self.bind_existing(name, updated);
                Ok(())
            }
            _ if target.is_place() => {
                let (root, steps) = self.place_path(target)?;
                let current = self.load_path(&root, &steps)?;
                let rhs = self.eval(value)?;
                let updated = binary(op, &current, &rhs)?;
                self.store(&root, &steps, updated)
            }
            _ => Err(SandboxError::syntax(
                "illegal expression for augmented assignment",
                0,
            )),
        }
    }

    /// Rebind a name where it already lives (a lambda may update a global).
    fn bind_existing(&mut self, name: &str, value: Value) {
        match self.var_mut(name) {
            Some(slot) => *slot = value,
            None => self.bind(name, value),
        }
    }

    /// Move a list, dict or trace out of its place so a method can mutate it.
    fn take_slot(&mut self, root: &str, steps: &[Step]) -> Option<Value> {
        let slot = slot_mut(self.var_mut(root)?, steps)?;
        match slot {
            Value::List(_) | Value::Dict(_) | Value::Trace(_) => {
                Some(std::mem::replace(slot, Value::None))
            }
            _ => None,
        }
    }

    fn put_slot(&mut self, root: &str, steps: &[Step], value: Value) {
        if let Some(slot) = self.var_mut(root).and_then(|v| slot_mut(v, steps)) {
            *slot = value;
        }
    }

    // ---- expressions ----

    pub fn eval(&mut self, expr: &Expr) -> SandboxResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::FString(parts) => self.fstring(parts),
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value);
                }
                Ok(Value::Dict(dict))
            }
            Expr::ListComp { element, clauses } => {
                let mut out = Vec::new();
                self.push_scope(HashMap::new())?;
                let result = self.comprehension(clauses, &mut |interp| {
                    out.push(interp.eval(element)?);
                    Ok(())
                });
                self.scopes.pop();
                result?;
                Ok(Value::List(out))
            }
            Expr::DictComp {
                key,
                value,
                clauses,
            } => {
                let mut out = Dict::new();
                self.push_scope(HashMap::new())?;
                let result = self.comprehension(clauses, &mut |interp| {
                    let k = interp.eval(key)?;
                    let v = interp.eval(value)?;
                    out.insert(k, v);
                    Ok(())
                });
                self.scopes.pop();
                result?;
                Ok(Value::Dict(out))
            }
            Expr::Attribute(obj, name) => {
                let value = self.eval(obj)?;
                builtins::get_attr(&value, name)
            }
            Expr::Subscript(obj, key) => {
                let container = self.eval(obj)?;
                match &**key {
                    Expr::Slice { lower, upper, step } => {
                        let lower = self.slice_bound(lower.as_deref())?;
                        let upper = self.slice_bound(upper.as_deref())?;
                        let step = self.slice_bound(step.as_deref())?;
                        builtins::slice(&container, lower, upper, step)
                    }
                    key => {
                        let key = self.eval(key)?;
                        builtins::get_item(&container, &key)
                    }
                }
            }
            Expr::Slice { .. } => Err(SandboxError::syntax("slice outside of subscript", 0)),
            Expr::Call { func, args } => match &**func {
                Expr::Attribute(obj, name) => self.call_method_expr(obj, name, args),
                other => {
                    let callee = self.eval(other)?;
                    let args = self.eval_args(&callable_name(&callee), args)?;
                    self.call(&callee, args)
                }
            },
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    let result = compare(*op, &left, &right)?;
                    if let Value::Series(_) = result {
                        if rest.len() > 1 {
                            return Err(SandboxError::value_error(
                                "chained comparisons are ambiguous for Series",
                            ));
                        }
                        return Ok(result);
                    }
                    if !result.truthy()? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Bool(op, left, right) => {
                let l = self.eval(left)?;
                let short = match op {
                    BoolOp::And => !l.truthy()?,
                    BoolOp::Or => l.truthy()?,
                };
                if short {
                    Ok(l)
                } else {
                    self.eval(right)
                }
            }
            Expr::IfElse {
                condition,
                body,
                orelse,
            } => {
                if self.eval(condition)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda { params, body } => Ok(Value::Lambda(Rc::new(Lambda {
                params: params.clone(),
                body: (**body).clone(),
            }))),
        }
    }

    fn eval_all(&mut self, items: &[Expr]) -> SandboxResult<Vec<Value>> {
        items.iter().map(|e| self.eval(e)).collect()
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> SandboxResult<Option<i64>> {
        let Some(expr) = bound else { return Ok(None) };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v
                .as_i64()
                .filter(|_| !matches!(v, Value::Float(_)))
                .map(Some)
                .ok_or_else(|| {
                    type_error("slice indices must be integers or None")
                }),
        }
    }

    fn fstring(&mut self, parts: &[FPart]) -> SandboxResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Lit(text) => out.push_str(text),
                FPart::Expr {
                    expr,
                    conversion,
                    spec,
                } => {
                    let mut value = self.eval(expr)?;
                    match conversion {
                        Some('r') => value = Value::Str(value.repr()),
                        Some('s') => value = Value::Str(value.to_str()),
                        _ => {}
                    }
                    match spec {
                        Some(spec) if !spec.is_empty() => out.push_str(&format_spec(&value, spec)?),
                        _ => out.push_str(&value.to_str()),
                    }
                }
            }
        }
        Ok(Value::Str(out))
    }

    fn comprehension(
        &mut self,
        clauses: &[Comprehension],
        body: &mut dyn FnMut(&mut Interpreter) -> SandboxResult<()>,
    ) -> SandboxResult<()> {
        let Some((first, rest)) = clauses.split_first() else {
            return body(self);
        };
        let items = self.eval(&first.iter)?.iterate()?;
        'items: for item in items {
            self.tick()?;
            self.assign(&first.target, item)?;
            for condition in &first.conditions {
                if !self.eval(condition)?.truthy()? {
                    continue 'items;
                }
            }
            self.comprehension(rest, body)?;
        }
        Ok(())
    }

    fn eval_args(&mut self, func: &str, args: &[Arg]) -> SandboxResult<Args> {
        let mut out = Args::new(func, Vec::new(), Vec::new());
        let add_keyword = |out: &mut Args, name: String, value: Value| {
            if out.keywords.iter().any(|(k, _)| *k == name) {
                return Err(type_error(format!(
                    "{}() got multiple values for keyword argument '{}'",
                    out.func, name
                )));
            }
            out.keywords.push((name, value));
            Ok(())
        };
        for arg in args {
            match arg {
                Arg::Positional(expr) => {
                    let v = self.eval(expr)?;
                    out.positional.push(v);
                }
                Arg::Splat(expr) => {
                    let items = self.eval(expr)?.iterate()?;
                    out.positional.extend(items);
                }
                Arg::Keyword(name, expr) => {
                    let v = self.eval(expr)?;
                    add_keyword(&mut out, name.clone(), v)?;
                }
                Arg::KwSplat(expr) => match self.eval(expr)? {
                    Value::Dict(dict) => {
                        for (k, v) in dict.iter() {
                            let Value::Str(name) = k else {
                                return Err(type_error("keywords must be strings"));
                            };
                            add_keyword(&mut out, name.clone(), v.clone())?;
                        }
                    }
                    other => {
                        return Err(type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(out)
    }

    /// `receiver.name(args)`, writing mutated lists, dicts and traces back to their place.
    fn call_method_expr(&mut self, obj: &Expr, name: &str, arg_exprs: &[Arg]) -> SandboxResult<Value> {
        let place = if obj.is_place() {
            Some(self.place_path(obj)?)
        } else {
            None
        };
        let args = self.eval_args(name, arg_exprs)?;

        if let Some((root, steps)) = &place {
            if let Some(mut receiver) = self.take_slot(root, steps) {
                let result = builtins::call_method(self, &mut receiver, name, args);
                self.put_slot(root, steps, receiver);
                return result;
            }
        }

        let mut receiver = match &place {
            Some((root, steps)) => self.load_path(root, steps)?,
            None => self.eval(obj)?,
        };
        if let Value::Module(_) = receiver {
            let func = builtins::get_attr(&receiver, name)?;
            return self.call(&func, args);
        }
        if let Value::Dict(dict) = &receiver {
            if let Some(func @ (Value::Lambda(_) | Value::Builtin(_))) = dict.get_str(name) {
                let func = func.clone();
                return self.call(&func, args);
            }
        }
        let result = builtins::call_method(self, &mut receiver, name, args)?;
        if let (Value::Trace(_), Some((root, steps))) = (&receiver, &place) {
            self.store(root, steps, receiver.clone())?;
        }
        Ok(result)
    }

    /// Invoke a callable value.
    pub fn call(&mut self, func: &Value, args: Args) -> SandboxResult<Value> {
        match func {
            Value::Builtin(name) => builtins::call_function(self, name, args),
            Value::Method(receiver, name) => {
                let mut receiver = (**receiver).clone();
                builtins::call_method(self, &mut receiver, name, args)
            }
            Value::Lambda(lambda) => {
                self.tick()?;
                if !args.keywords.is_empty() {
                    return Err(type_error(
                        "<lambda>() does not accept keyword arguments",
                    ));
                }
                if args.positional.len() != lambda.params.len() {
                    return Err(type_error(format!(
                        "<lambda>() takes {} positional arguments but {} were given",
                        lambda.params.len(),
                        args.positional.len()
                    )));
                }
                let scope = lambda
                    .params
                    .iter()
                    .cloned()
                    .zip(args.positional)
                    .collect::<HashMap<_, _>>();
                self.push_scope(scope)?;
                let result = self.eval(&lambda.body);
                self.scopes.pop();
                result
            }
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }
}

fn callable_name(value: &Value) -> String {
    match value {
        Value::Builtin(name) => name.rsplit('.').next().unwrap_or(name).to_string(),
        Value::Method(_, name) => name.clone(),
        Value::Lambda(_) => "<lambda>".to_string(),
        other => other.type_name(),
    }
}

/// Navigate into nested lists and dicts without copying.
fn slot_mut<'a>(value: &'a mut Value, steps: &[Step]) -> Option<&'a mut Value> {
    let Some((step, rest)) = steps.split_first() else {
        return Some(value);
    };
    let next = match (value, step) {
        (Value::Dict(dict), Step::Attr(name)) => dict.get_mut(&Value::Str(name.clone()))?,
        (Value::Dict(dict), Step::Key(key)) => dict.get_mut(key)?,
        (Value::List(items), Step::Key(key)) => {
            let i = list_index(items, key).ok()?;
            &mut items[i]
        }
        _ => return None,
    };
    slot_mut(next, rest)
}

fn store_into(container: &mut Value, steps: &[Step], value: Value) -> SandboxResult<()> {
    let Some((step, rest)) = steps.split_first() else {
        *container = value;
        return Ok(());
    };
    match container {
        Value::Figure(fig) => plotly::assign_figure(fig, steps, &value),
        Value::Trace(trace) => plotly::assign_trace(trace, steps, &value),
        Value::Dict(dict) => {
            let key = match step {
                Step::Attr(name) => Value::Str(name.clone()),
                Step::Key(key) => key.clone(),
            };
            if rest.is_empty() {
                dict.insert(key, value);
                return Ok(());
            }
            let child = dict
                .get_mut(&key)
                .ok_or_else(|| SandboxError::new(ErrorKind::Key, key.repr()))?;
            store_into(child, rest, value)
        }
        Value::List(items) => {
            let Step::Key(key) = step else {
                return Err(SandboxError::new(
                    ErrorKind::Attribute,
                    "'list' object attributes are read-only",
                ));
            };
            let i = list_index(items, key)?;
            store_into(&mut items[i], rest, value)
        }
        Value::Frame(_) if rest.is_empty() => {
            let key = match step {
                Step::Attr(name) => Value::Str(name.clone()),
                Step::Key(key) => key.clone(),
            };
            tables::set_item(container, &key, &value)
        }
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> SandboxResult<Value> {
    if let Value::Series(series) = &value {
        if op != UnaryOp::Not {
            return series_unary(op, series);
        }
    }
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| SandboxError::value_error("integer overflow")),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(b as i64))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(b as i64)),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!(b as i64))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            Err(type_error(format!(
                "bad operand type for unary {}: '{}'",
                symbol,
                v.type_name()
            )))
        }
    }
}

fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Figure(a), Value::Figure(b)) => Rc::ptr_eq(a, b),
        (Value::Frame(a), Value::Frame(b)) => Rc::ptr_eq(a, b),
        (Value::Series(a), Value::Series(b)) => Rc::ptr_eq(a, b),
        (Value::Module(a), Value::Module(b)) | (Value::Builtin(a), Value::Builtin(b)) => a == b,
        _ => false,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> SandboxResult<Value> {
    let elementwise = matches!(left, Value::Series(_)) || matches!(right, Value::Series(_));
    if elementwise && !matches!(op, CmpOp::In | CmpOp::NotIn | CmpOp::Is | CmpOp::IsNot) {
        return series_compare(op, left, right);
    }
    let result = match op {
        CmpOp::Eq => left.py_eq(right),
        CmpOp::NotEq => !left.py_eq(right),
        CmpOp::Lt => left.py_cmp(right)?.is_lt(),
        CmpOp::LtE => left.py_cmp(right)?.is_le(),
        CmpOp::Gt => left.py_cmp(right)?.is_gt(),
        CmpOp::GtE => left.py_cmp(right)?.is_ge(),
        CmpOp::In => right.contains(left)?,
        CmpOp::NotIn => !right.contains(left)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::parser::parse_program;

    fn run(src: &str) -> Interpreter {
        let mut interp = Interpreter::new(&SandboxLimits::default());
        interp.run(&parse_program(src).unwrap()).unwrap();
        interp
    }

    fn run_err(src: &str) -> SandboxError {
        let mut interp = Interpreter::new(&SandboxLimits::default());
        interp.run(&parse_program(src).unwrap()).unwrap_err()
    }

    fn global(interp: &Interpreter, name: &str) -> serde_json::Value {
        interp.get_global(name).unwrap().to_json().unwrap()
    }

    #[test]
    fn test_lists_mutate_in_place() {
        let interp = run("xs = []\nfor i in range(4):\n    xs.append(i * i)\nd = {'a': []}\nd['a'].append(len(xs))\n");
        assert_eq!(global(&interp, "xs"), serde_json::json!([0, 1, 4, 9]));
        assert_eq!(global(&interp, "d"), serde_json::json!({"a": [4]}));
    }

    #[test]
    fn test_comprehensions_and_lambdas() {
        let interp = run(
            "rows = [{'t': 'MI', 'w': 3}, {'t': 'DC', 'w': 5}]\n\
             names = [r['t'] for r in rows if r['w'] > 3]\n\
             best = sorted(rows, key=lambda r: -r['w'])[0]['t']\n\
             sq = {n: n ** 2 for n in range(3)}\n",
        );
        assert_eq!(global(&interp, "names"), serde_json::json!(["DC"]));
        assert_eq!(global(&interp, "best"), serde_json::json!("DC"));
        assert_eq!(global(&interp, "sq"), serde_json::json!({"0": 0, "1": 1, "2": 4}));
        assert!(interp.get_global("r").is_none());
    }

    #[test]
    fn test_while_break_continue() {
        let interp = run("n = 0\ntotal = 0\nwhile True:\n    n += 1\n    if n % 2 == 0:\n        continue\n    if n > 7:\n        break\n    total += n\n");
        assert_eq!(global(&interp, "total"), serde_json::json!(16));
    }

    #[test]
    fn test_fstring_and_unpacking() {
        let interp = run("a, b = 'MI', 0.456\nlabel = f'{a}: {b:.1%} {a!r}'\n");
        assert_eq!(global(&interp, "label"), serde_json::json!("MI: 45.6% 'MI'"));
    }

    #[test]
    fn test_figure_property_assignment() {
        let interp = run(
            "import plotly.graph_objects as go\n\
             fig = go.Figure(go.Bar(x=['a'], y=[1]))\n\
             fig.layout.title.text = 'Runs'\n\
             fig.data[0].name = 'runs'\n\
             fig.data[0].update(marker_color='red')\n",
        );
        let fig = global(&interp, "fig");
        assert_eq!(fig["layout"]["title"]["text"], "Runs");
        assert_eq!(fig["data"][0]["name"], "runs");
        assert_eq!(fig["data"][0]["marker"]["color"], "red");
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = run_err("x = 1\ny = undefined_name\n");
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.line, 2);

        let err = run_err("import os\n");
        assert_eq!(err.kind, ErrorKind::Import);
    }

    #[test]
    fn test_step_budget() {
        let mut interp = Interpreter::new(&SandboxLimits {
            max_steps: 50,
            ..SandboxLimits::default()
        });
        let err = interp
            .run(&parse_program("while True:\n    pass\n").unwrap())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimit);
    }

    #[test]
    fn test_oversized_strings_are_refused() {
        for src in [
            "s = '1'.zfill(50000000000)\n",
            "s = 'a'.ljust(50000000000, '-')\n",
            "s = 'a'.rjust(50000000000)\n",
            "s = f'{1:10000000000}'\n",
            "s = '{:>10000000000}'.format('a')\n",
            "s = f'{1.5:.10000000000f}'\n",
            "s = 'ab' * 1000000\nfor _ in range(10):\n    s = s + s\n",
            "s = ('a' * 5000000).replace('a', 'aaaa')\n",
        ] {
            let err = run_err(src);
            assert_eq!(err.kind, ErrorKind::ResourceLimit, "{}", src);
        }
        let interp = run("s = '7'.zfill(3)\nt = 'ab'.ljust(4, '.')\nu = f'{5:>3}'\n");
        assert_eq!(global(&interp, "s"), serde_json::json!("007"));
        assert_eq!(global(&interp, "t"), serde_json::json!("ab.."));
        assert_eq!(global(&interp, "u"), serde_json::json!("  5"));
    }

    #[test]
    fn test_integer_edge_overflow_is_a_value_error() {
        let min = "x = -9223372036854775807 - 1\n";
        for tail in ["y = x // -1\n", "y = abs(x)\n"] {
            let err = run_err(&format!("{}{}", min, tail));
            assert_eq!(err.kind, ErrorKind::Value);
            assert!(err.message.contains("integer overflow"));
        }
        let interp = run(&format!("{}y = x % -1\n", min));
        assert_eq!(global(&interp, "y"), serde_json::json!(0));
    }

    #[test]
    fn test_split_rejects_empty_separator() {
        let err = run_err("parts = 'ab'.split('')\n");
        assert_eq!(err.kind, ErrorKind::Value);
        assert!(err.message.contains("empty separator"));
        let interp = run("parts = 'a,b'.split(',')\n");
        assert_eq!(global(&interp, "parts"), serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_runaway_lambda_recursion() {
        let err = run_err("f = lambda n: f(n + 1)\nf(0)\n");
        assert_eq!(err.kind, ErrorKind::ResourceLimit);
    }
}
