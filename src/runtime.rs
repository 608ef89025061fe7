use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, Literal, Program, Stmt, StmtKind, TemplateSegment, UnaryOp},
    diagnostics::{Diagnostic, Fault, QuillError, Result, SourceSpan},
    environment::{ScopeArena, ScopeId, ScopeKind},
    parser,
    stack::ensure_sufficient_stack,
    value::{Closure, Value, ValueKind},
};

/// Limits and switches for one interpreter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Closure frames allowed before evaluation is aborted with a fault.
    pub max_call_depth: usize,
    /// Upper bound on printed output, in bytes.
    pub max_output_bytes: Option<usize>,
    /// Append a non-null final program value to the output.
    pub echo_result: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 2_000,
            max_output_bytes: None,
            echo_result: false,
        }
    }
}

/// Text sink for `println`.
#[derive(Debug, Default)]
pub struct Output {
    text: String,
    limit: Option<usize>,
}

impl Output {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.text.len() + line.len() + 1 > limit {
                return Err(QuillError::from(Fault::OutputLimitExceeded { limit }));
            }
        }
        self.text.push_str(line);
        self.text.push('\n');
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

/// Tree-walking evaluator. Each instance owns one root scope; programs run
/// against it one after another.
pub struct Interpreter {
    scopes: ScopeArena,
    scope: ScopeId,
    out: Output,
    depth: usize,
    config: InterpreterConfig,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        let (scopes, root) = ScopeArena::with_prelude(crate::stdlib::prelude());
        Self {
            scopes,
            scope: root,
            out: Output::new(config.max_output_bytes),
            depth: 0,
            config,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        let program = parser::parse_program(source)?;
        self.eval_program(&program)
    }

    pub fn eval_program(&mut self, program: &Program) -> Result<Value> {
        let mut last_value = Value::null();
        for stmt in &program.items {
            match self.execute_statement(stmt)? {
                FlowControl::Normal(value) => last_value = value,
                FlowControl::Return(value) => {
                    last_value = value;
                    break;
                }
                FlowControl::Break => {
                    return Err(QuillError::from(Diagnostic::runtime(
                        "`break` outside loop",
                        stmt.span,
                    )));
                }
            }
        }
        self.scopes.sweep()?;
        Ok(last_value)
    }

    /// Everything printed so far.
    pub fn output(&self) -> &str {
        self.out.as_str()
    }

    pub fn take_output(&mut self) -> String {
        self.out.take()
    }

    /// Scope records currently alive, including those kept by closures.
    pub fn live_scopes(&self) -> usize {
        self.scopes.live_scopes()
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        match &stmt.kind {
            StmtKind::Expr(expr) => Ok(FlowControl::Normal(self.evaluate(expr)?)),
            StmtKind::Block(statements) => self.execute_block(statements),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.expect_bool(condition.span)? {
                    self.execute_block(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute_block(branch)
                } else {
                    Ok(FlowControl::Normal(Value::null()))
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.expect_bool(condition.span)? {
                    match self.execute_block(body)? {
                        FlowControl::Normal(_) => {}
                        FlowControl::Break => break,
                        flow @ FlowControl::Return(_) => return Ok(flow),
                    }
                }
                Ok(FlowControl::Normal(Value::null()))
            }
            StmtKind::For {
                index,
                binding,
                iterable,
                body,
            } => self.execute_for(index.as_deref(), binding, iterable, body),
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::null(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Break => Ok(FlowControl::Break),
        }
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Result<FlowControl> {
        self.in_scope(self.scope, ScopeKind::Block, IndexMap::new(), |this| {
            this.execute_sequence(statements)
        })
    }

    /// Runs statements in the current scope; the value is the last
    /// statement's value.
    fn execute_sequence(&mut self, statements: &[Stmt]) -> Result<FlowControl> {
        let mut last_value = Value::null();
        for stmt in statements {
            match self.execute_statement(stmt)? {
                FlowControl::Normal(value) => last_value = value,
                other => return Ok(other),
            }
        }
        Ok(FlowControl::Normal(last_value))
    }

    /// Ranges are walked lazily. Arrays, strings (one character at a time)
    /// and structs (`struct { key, value }` per field) are iterated over a
    /// snapshot taken before the first pass.
    fn execute_for(
        &mut self,
        index: Option<&str>,
        binding: &str,
        iterable: &Expr,
        body: &[Stmt],
    ) -> Result<FlowControl> {
        if let ExprKind::Range { start, end } = &iterable.kind {
            let (from, to) = self.range_bounds(start, end)?;
            for (position, item) in (from..to).enumerate() {
                let bindings = loop_bindings(index, position, binding, Value::int(item));
                match self.run_iteration(bindings, body)? {
                    FlowControl::Normal(_) => {}
                    FlowControl::Break => break,
                    flow @ FlowControl::Return(_) => return Ok(flow),
                }
            }
            return Ok(FlowControl::Normal(Value::null()));
        }

        let value = self.evaluate(iterable)?;
        let items: Vec<Value> = match value.kind() {
            ValueKind::Array(values) => values.clone(),
            ValueKind::String(chars) => chars.iter().map(|ch| Value::chars(vec![*ch])).collect(),
            ValueKind::Struct(fields) => fields
                .iter()
                .map(|(key, value)| struct_entry(key, value))
                .collect(),
            _ => {
                return Err(QuillError::from(Diagnostic::runtime(
                    format!("cannot iterate over a {}", value.type_name()),
                    iterable.span,
                )));
            }
        };
        for (position, item) in items.into_iter().enumerate() {
            let bindings = loop_bindings(index, position, binding, item);
            match self.run_iteration(bindings, body)? {
                FlowControl::Normal(_) => {}
                FlowControl::Break => break,
                flow @ FlowControl::Return(_) => return Ok(flow),
            }
        }
        Ok(FlowControl::Normal(Value::null()))
    }

    fn run_iteration(
        &mut self,
        bindings: IndexMap<String, Value>,
        body: &[Stmt],
    ) -> Result<FlowControl> {
        self.in_scope(self.scope, ScopeKind::Iteration, bindings, |this| {
            this.execute_sequence(body)
        })
    }

    /// Runs `f` with a fresh child scope of `parent` as the current scope.
    fn in_scope<T>(
        &mut self,
        parent: ScopeId,
        kind: ScopeKind,
        bindings: IndexMap<String, Value>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let scope = self.scopes.push_with(Some(parent), kind, bindings)?;
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = previous;
        let released = self.scopes.release(scope);
        let value = result?;
        released?;
        Ok(value)
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr))
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal(lit)),
            ExprKind::Variable(name) => self.scopes.get(self.scope, name, expr.span),
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                let left_value = self.evaluate(left)?.expect_bool(left.span)?;
                // short-circuit: the right side only runs when it decides the result
                if (*op == BinaryOp::And) != left_value {
                    return Ok(Value::bool(left_value));
                }
                let right_value = self.evaluate(right)?.expect_bool(right.span)?;
                Ok(Value::bool(right_value))
            }
            ExprKind::Binary { op, left, right } => {
                let left_value = self.evaluate(left)?;
                let right_value = self.evaluate(right)?;
                binary(*op, left_value, right_value, expr.span)
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand)?;
                unary(*op, value, expr.span)
            }
            ExprKind::Assign { target, op, value } => self.assign(target, *op, value, expr.span),
            ExprKind::Call { callee, args } => {
                let callee_value = self.evaluate(callee)?;
                let mut eval_args = Vec::with_capacity(args.len());
                for arg in args {
                    eval_args.push(self.evaluate(arg)?);
                }
                self.call(callee_value, eval_args, expr.span)
            }
            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::StructLiteral(fields) => {
                let mut map = IndexMap::with_capacity(fields.len());
                for (name, value_expr) in fields {
                    let value = self.evaluate(value_expr)?;
                    map.insert(name.clone(), value);
                }
                Ok(Value::structure(map))
            }
            ExprKind::Template(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        TemplateSegment::Text(chunk) => text.push_str(chunk),
                        TemplateSegment::Expr(inner) => {
                            text.push_str(&self.evaluate(inner)?.to_string())
                        }
                    }
                }
                Ok(Value::string(text))
            }
            ExprKind::Group(inner) => self.evaluate(inner),
            ExprKind::Index { target, index } => {
                let target_value = self.evaluate(target)?;
                let index_value = self.evaluate(index)?;
                index_value_of(&target_value, &index_value, expr.span)
            }
            ExprKind::Field { target, field } => {
                let target_value = self.evaluate(target)?;
                field_value_of(&target_value, field, expr.span)
            }
            ExprKind::Range { start, end } => {
                let (from, to) = self.range_bounds(start, end)?;
                Ok(Value::array((from..to).map(Value::int).collect()))
            }
            ExprKind::Lambda { params, body } => Ok(Value::new(ValueKind::Function(Closure {
                params: params.clone(),
                body: Rc::clone(body),
                env: self.scopes.lease(self.scope)?,
            }))),
        }
    }

    fn range_bounds(&mut self, start: &Expr, end: &Expr) -> Result<(i64, i64)> {
        let from = self.evaluate(start)?;
        let to = self.evaluate(end)?;
        match (from.kind(), to.kind()) {
            (ValueKind::Int(from), ValueKind::Int(to)) => Ok((*from, *to)),
            _ => Err(QuillError::from(Diagnostic::runtime(
                format!(
                    "range bounds must be Integers, found {} and {}",
                    from.type_name(),
                    to.type_name()
                ),
                start.span.to(end.span),
            ))),
        }
    }

    fn call(&mut self, callee: Value, args: Vec<Value>, span: SourceSpan) -> Result<Value> {
        match callee.kind() {
            ValueKind::NativeFunction(fun) => fun.call(&mut self.out, &args, span),
            ValueKind::Function(fun) => self.call_closure(fun, args, span),
            _ => Err(QuillError::from(Diagnostic::runtime(
                format!("value of type {} is not callable", callee.type_name()),
                span,
            ))),
        }
    }

    fn call_closure(
        &mut self,
        fun: &Closure,
        args: Vec<Value>,
        span: SourceSpan,
    ) -> Result<Value> {
        if args.len() != fun.params.len() {
            return Err(QuillError::from(Diagnostic::runtime(
                format!(
                    "function expected {} arguments but received {}",
                    fun.params.len(),
                    args.len()
                ),
                span,
            )));
        }
        if self.depth >= self.config.max_call_depth {
            return Err(QuillError::from(Fault::CallDepthExceeded {
                limit: self.config.max_call_depth,
            }));
        }
        self.depth += 1;
        trace!(depth = self.depth, params = fun.params.len(), "calling closure");
        let bindings: IndexMap<String, Value> = fun.params.iter().cloned().zip(args).collect();
        let body = Rc::clone(&fun.body);
        let result = ensure_sufficient_stack(|| {
            self.in_scope(fun.scope(), ScopeKind::Call, bindings, |this| {
                this.execute_sequence(&body)
            })
        });
        self.depth -= 1;
        match result? {
            FlowControl::Normal(value) | FlowControl::Return(value) => Ok(value),
            FlowControl::Break => Err(QuillError::from(Diagnostic::runtime(
                "`break` cannot escape a function body",
                span,
            ))),
        }
    }

    fn assign(
        &mut self,
        target: &Expr,
        op: Option<BinaryOp>,
        value: &Expr,
        span: SourceSpan,
    ) -> Result<Value> {
        let place = self.resolve_place(target)?;
        let value = self.evaluate(value)?;
        let value = match op {
            None => value,
            Some(op) => {
                let current = self.read_place(&place)?;
                binary(op, current, value, span)?
            }
        };
        self.write_place(&place, value.clone())?;
        Ok(value)
    }

    /// Evaluates the index expressions of an assignment target, left to
    /// right, without reading the target itself.
    fn resolve_place(&mut self, target: &Expr) -> Result<Place> {
        ensure_sufficient_stack(|| self.resolve_place_inner(target))
    }

    fn resolve_place_inner(&mut self, target: &Expr) -> Result<Place> {
        match &target.kind {
            ExprKind::Variable(name) => Ok(Place {
                root: name.clone(),
                root_span: target.span,
                path: Vec::new(),
            }),
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let mut place = self.resolve_place(owner)?;
                let index_value = self.evaluate(index)?;
                let ValueKind::Int(idx) = index_value.kind() else {
                    return Err(index_type_error(&index_value, index.span));
                };
                place.path.push((Accessor::Index(*idx), target.span));
                Ok(place)
            }
            ExprKind::Field {
                target: owner,
                field,
            } => {
                let mut place = self.resolve_place(owner)?;
                place.path.push((Accessor::Field(field.clone()), target.span));
                Ok(place)
            }
            _ => Err(QuillError::from(Diagnostic::runtime(
                "invalid assignment target",
                target.span,
            ))),
        }
    }

    fn read_place(&self, place: &Place) -> Result<Value> {
        let mut value = self.scopes.get(self.scope, &place.root, place.root_span)?;
        for (accessor, span) in &place.path {
            value = match accessor {
                Accessor::Index(idx) => index_value_of(&value, &Value::int(*idx), *span)?,
                Accessor::Field(name) => field_value_of(&value, name, *span)?,
            };
        }
        Ok(value)
    }

    fn write_place(&mut self, place: &Place, value: Value) -> Result<()> {
        let Some(((last, last_span), parents)) = place.path.split_last() else {
            return self.scopes.assign(self.scope, &place.root, value);
        };
        let mut slot = self
            .scopes
            .binding_mut(self.scope, &place.root, place.root_span)?;
        for (accessor, span) in parents {
            slot = step_mut(slot, accessor, *span)?;
        }
        store(slot, last, value, *last_span)
    }
}

enum FlowControl {
    Normal(Value),
    Return(Value),
    Break,
}

/// Assignment target: a variable plus index/field steps into it.
struct Place {
    root: String,
    root_span: SourceSpan,
    path: Vec<(Accessor, SourceSpan)>,
}

enum Accessor {
    Index(i64),
    Field(String),
}

fn literal(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(n) => Value::float(*n),
        Literal::Bool(b) => Value::bool(*b),
        Literal::String(s) => Value::string(s),
        Literal::Null => Value::null(),
    }
}

fn loop_bindings(
    index: Option<&str>,
    position: usize,
    binding: &str,
    item: Value,
) -> IndexMap<String, Value> {
    let mut bindings = IndexMap::with_capacity(2);
    if let Some(index) = index {
        bindings.insert(index.to_string(), Value::int(position as i64));
    }
    bindings.insert(binding.to_string(), item);
    bindings
}

fn struct_entry(key: &str, value: &Value) -> Value {
    Value::structure(IndexMap::from([
        ("key".to_string(), Value::string(key)),
        ("value".to_string(), value.clone()),
    ]))
}

fn step_mut<'a>(
    slot: &'a mut Value,
    accessor: &Accessor,
    span: SourceSpan,
) -> Result<&'a mut Value> {
    let type_name = slot.type_name();
    match (slot.make_mut(), accessor) {
        (ValueKind::Array(items), Accessor::Index(idx)) => {
            let idx = checked_index(*idx, items.len(), span)?;
            Ok(&mut items[idx])
        }
        (ValueKind::Struct(fields), Accessor::Field(name)) => fields
            .get_mut(name)
            .ok_or_else(|| unknown_field(name, span)),
        (ValueKind::String(_), Accessor::Index(_)) => Err(QuillError::from(Diagnostic::runtime(
            "characters of a String cannot be indexed further",
            span,
        ))),
        (_, accessor) => Err(access_error(type_name, accessor, span)),
    }
}

fn store(slot: &mut Value, accessor: &Accessor, value: Value, span: SourceSpan) -> Result<()> {
    let type_name = slot.type_name();
    match (slot.make_mut(), accessor) {
        (ValueKind::Array(items), Accessor::Index(idx)) => {
            let idx = checked_index(*idx, items.len(), span)?;
            items[idx] = value;
            Ok(())
        }
        (ValueKind::String(chars), Accessor::Index(idx)) => {
            let idx = checked_index(*idx, chars.len(), span)?;
            match value.kind() {
                ValueKind::String(replacement) if replacement.len() == 1 => {
                    chars[idx] = replacement[0];
                    Ok(())
                }
                _ => Err(QuillError::from(Diagnostic::runtime(
                    format!(
                        "string index assignment expects a single-character String, found {}",
                        describe(&value)
                    ),
                    span,
                ))),
            }
        }
        (ValueKind::Struct(fields), Accessor::Field(name)) => match fields.get_mut(name) {
            Some(field) => {
                *field = value;
                Ok(())
            }
            None => Err(unknown_field(name, span)),
        },
        (_, accessor) => Err(access_error(type_name, accessor, span)),
    }
}

fn describe(value: &Value) -> String {
    match value.kind() {
        ValueKind::String(chars) => format!("a String of length {}", chars.len()),
        _ => value.type_name().to_string(),
    }
}

fn access_error(type_name: &str, accessor: &Accessor, span: SourceSpan) -> QuillError {
    let message = match accessor {
        Accessor::Index(_) => format!("cannot index into a {type_name}"),
        Accessor::Field(name) => format!("cannot access field `{name}` on a {type_name}"),
    };
    QuillError::from(Diagnostic::runtime(message, span))
}

fn unknown_field(name: &str, span: SourceSpan) -> QuillError {
    QuillError::from(Diagnostic::runtime(
        format!("struct has no field `{name}`"),
        span,
    ))
}

fn index_type_error(index: &Value, span: SourceSpan) -> QuillError {
    QuillError::from(Diagnostic::runtime(
        format!("index must be an Integer, found {}", index.type_name()),
        span,
    ))
}

fn checked_index(idx: i64, len: usize, span: SourceSpan) -> Result<usize> {
    usize::try_from(idx)
        .ok()
        .filter(|idx| *idx < len)
        .ok_or_else(|| {
            QuillError::from(Diagnostic::runtime(
                format!("index {idx} out of bounds for length {len}"),
                span,
            ))
        })
}

fn index_value_of(target: &Value, index: &Value, span: SourceSpan) -> Result<Value> {
    let ValueKind::Int(idx) = index.kind() else {
        return Err(index_type_error(index, span));
    };
    match target.kind() {
        ValueKind::Array(values) => Ok(values[checked_index(*idx, values.len(), span)?].clone()),
        ValueKind::String(chars) => Ok(Value::chars(vec![
            chars[checked_index(*idx, chars.len(), span)?],
        ])),
        _ => Err(access_error(target.type_name(), &Accessor::Index(*idx), span)),
    }
}

fn field_value_of(target: &Value, field: &str, span: SourceSpan) -> Result<Value> {
    match target.kind() {
        ValueKind::Struct(fields) => fields
            .get(field)
            .cloned()
            .ok_or_else(|| unknown_field(field, span)),
        _ => Err(access_error(
            target.type_name(),
            &Accessor::Field(field.to_string()),
            span,
        )),
    }
}

fn unary(op: UnaryOp, value: Value, span: SourceSpan) -> Result<Value> {
    match (op, value.kind()) {
        (UnaryOp::Negate, ValueKind::Int(n)) => n
            .checked_neg()
            .map(Value::int)
            .ok_or_else(|| overflow(span)),
        (UnaryOp::Negate, ValueKind::Float(n)) => Ok(Value::float(-n)),
        (UnaryOp::Negate, _) => Err(QuillError::from(Diagnostic::runtime(
            format!("unary `-` expects a number, found {}", value.type_name()),
            span,
        ))),
        (UnaryOp::Not, _) => Ok(Value::bool(!value.expect_bool(span)?)),
    }
}

/// Applies a binary operator following the fixed coercion table.
fn binary(op: BinaryOp, left: Value, right: Value, span: SourceSpan) -> Result<Value> {
    match op {
        BinaryOp::Add => add(left, right, span),
        BinaryOp::Mul => multiply(left, right, span),
        BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => arithmetic(op, &left, &right, span),
        BinaryOp::Pow => power(&left, &right, span),
        BinaryOp::Equal | BinaryOp::NotEqual => {
            let equal = left.structural_eq(&right).ok_or_else(|| {
                QuillError::from(Diagnostic::runtime("functions cannot be compared", span))
            })?;
            Ok(Value::bool(equal == (op == BinaryOp::Equal)))
        }
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            compare(op, &left, &right, span)
        }
        BinaryOp::And => Ok(Value::bool(left.expect_bool(span)? && right.expect_bool(span)?)),
        BinaryOp::Or => Ok(Value::bool(left.expect_bool(span)? || right.expect_bool(span)?)),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value.kind(),
        ValueKind::Int(_) | ValueKind::Float(_) | ValueKind::Bool(_) | ValueKind::Null
    )
}

fn add(left: Value, right: Value, span: SourceSpan) -> Result<Value> {
    match (left.kind(), right.kind()) {
        (ValueKind::String(a), ValueKind::String(b)) => {
            let mut chars = Vec::with_capacity(a.len() + b.len());
            chars.extend_from_slice(a);
            chars.extend_from_slice(b);
            Ok(Value::chars(chars))
        }
        (ValueKind::String(a), _) if is_scalar(&right) => {
            let mut chars = a.clone();
            chars.extend(right.to_string().chars());
            Ok(Value::chars(chars))
        }
        (_, ValueKind::String(b)) if is_scalar(&left) => {
            let mut chars: Vec<char> = left.to_string().chars().collect();
            chars.extend_from_slice(b);
            Ok(Value::chars(chars))
        }
        (ValueKind::Array(a), ValueKind::Array(b)) => {
            let mut items = Vec::with_capacity(a.len() + b.len());
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Value::array(items))
        }
        _ => arithmetic(BinaryOp::Add, &left, &right, span),
    }
}

fn multiply(left: Value, right: Value, span: SourceSpan) -> Result<Value> {
    match (left.kind(), right.kind()) {
        (ValueKind::String(chars), ValueKind::Int(n))
        | (ValueKind::Int(n), ValueKind::String(chars)) => {
            let times = repeat_count(*n, chars.len(), span)?;
            Ok(Value::chars(chars.repeat(times)))
        }
        (ValueKind::Array(items), ValueKind::Int(n))
        | (ValueKind::Int(n), ValueKind::Array(items)) => {
            let times = repeat_count(*n, items.len(), span)?;
            Ok(Value::array(
                items.iter().cycle().take(items.len() * times).cloned().collect(),
            ))
        }
        _ => arithmetic(BinaryOp::Mul, &left, &right, span),
    }
}

fn repeat_count(n: i64, len: usize, span: SourceSpan) -> Result<usize> {
    let times = usize::try_from(n).map_err(|_| {
        QuillError::from(Diagnostic::runtime(
            format!("cannot repeat a sequence {n} times"),
            span,
        ))
    })?;
    if len.checked_mul(times).is_none() {
        return Err(overflow(span));
    }
    Ok(times)
}

fn as_number(value: &Value) -> Option<f64> {
    match value.kind() {
        ValueKind::Int(n) => Some(*n as f64),
        ValueKind::Float(n) => Some(*n),
        _ => None,
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    if let (ValueKind::Int(a), ValueKind::Int(b)) = (left.kind(), right.kind()) {
        if *b == 0 && matches!(op, BinaryOp::Div | BinaryOp::Mod) {
            return Err(QuillError::from(Diagnostic::runtime("division by zero", span)));
        }
        let result = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Div => a.checked_div(*b),
            BinaryOp::Mod => a.checked_rem(*b),
            _ => return Err(not_arithmetic(op)),
        };
        return result.map(Value::int).ok_or_else(|| overflow(span));
    }
    let (Some(a), Some(b)) = (as_number(left), as_number(right)) else {
        return Err(QuillError::from(Diagnostic::runtime(
            format!(
                "unsupported operand types for `{}`: {} and {}",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
            span,
        )));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(not_arithmetic(op)),
    };
    Ok(Value::float(result))
}

/// Integer powers stay integers while the exponent is non-negative; a
/// negative exponent or a Float operand gives a Float.
fn power(left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    if let (ValueKind::Int(base), ValueKind::Int(exp)) = (left.kind(), right.kind()) {
        if *exp >= 0 {
            let result = match u32::try_from(*exp) {
                Ok(exp) => base.checked_pow(exp),
                Err(_) => match *base {
                    0 | 1 => Some(*base),
                    -1 => Some(if *exp % 2 == 0 { 1 } else { -1 }),
                    _ => None,
                },
            };
            return result.map(Value::int).ok_or_else(|| overflow(span));
        }
    }
    let (Some(base), Some(exp)) = (as_number(left), as_number(right)) else {
        return Err(QuillError::from(Diagnostic::runtime(
            format!(
                "unsupported operand types for `^`: {} and {}",
                left.type_name(),
                right.type_name()
            ),
            span,
        )));
    };
    Ok(Value::float(base.powf(exp)))
}

fn compare(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    use std::cmp::Ordering;

    let ordering = match (left.kind(), right.kind()) {
        (ValueKind::Int(a), ValueKind::Int(b)) => Some(a.cmp(b)),
        (ValueKind::String(a), ValueKind::String(b)) => Some(a.cmp(b)),
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(QuillError::from(Diagnostic::runtime(
                    format!(
                        "cannot compare {} with {} using `{}`",
                        left.type_name(),
                        right.type_name(),
                        op.symbol()
                    ),
                    span,
                )));
            }
        },
    };
    let result = match op {
        BinaryOp::Less => ordering == Some(Ordering::Less),
        BinaryOp::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Greater => ordering == Some(Ordering::Greater),
        BinaryOp::GreaterEqual => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => return Err(not_arithmetic(op)),
    };
    Ok(Value::bool(result))
}

fn overflow(span: SourceSpan) -> QuillError {
    QuillError::from(Diagnostic::runtime("integer overflow", span))
}

fn not_arithmetic(op: BinaryOp) -> QuillError {
    QuillError::from(Fault::Internal(format!(
        "operator `{}` dispatched to the wrong evaluator",
        op.symbol()
    )))
}
