use std::{fmt, mem, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::Stmt,
    diagnostics::{Diagnostic, QuillError, Result, SourceSpan},
    environment::{ScopeId, ScopeLease},
    runtime::Output,
    stack::ensure_sufficient_stack,
};

/// A runtime value. Cloning is cheap and shares the payload; mutation goes
/// through [`Value::make_mut`], which copies a shared payload first, so two
/// variables never observe each other's index or field writes.
#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl AsRef<str>) -> Self {
        Self::new(ValueKind::String(value.as_ref().chars().collect()))
    }

    pub fn chars(chars: Vec<char>) -> Self {
        Self::new(ValueKind::String(chars))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(values))
    }

    pub fn structure(fields: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Struct(fields))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    /// Unique access to the payload, detaching it from other holders.
    pub fn make_mut(&mut self) -> &mut ValueKind {
        Rc::make_mut(&mut self.0)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind(), ValueKind::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind() {
            ValueKind::Null => "Null",
            ValueKind::Bool(_) => "Bool",
            ValueKind::Int(_) => "Integer",
            ValueKind::Float(_) => "Float",
            ValueKind::String(_) => "String",
            ValueKind::Array(_) => "Array",
            ValueKind::Struct(_) => "Struct",
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => "Function",
        }
    }

    pub fn expect_bool(&self, span: SourceSpan) -> Result<bool> {
        match self.kind() {
            ValueKind::Bool(b) => Ok(*b),
            _ => Err(QuillError::from(Diagnostic::runtime(
                format!("expected Bool, found {}", self.type_name()),
                span,
            ))),
        }
    }

    /// Deep structural equality. `None` when a function takes part, since
    /// function identity is not observable.
    pub fn structural_eq(&self, other: &Value) -> Option<bool> {
        ensure_sufficient_stack(|| self.structural_eq_inner(other))
    }

    fn structural_eq_inner(&self, other: &Value) -> Option<bool> {
        match (self.kind(), other.kind()) {
            (ValueKind::Function(_) | ValueKind::NativeFunction(_), _)
            | (_, ValueKind::Function(_) | ValueKind::NativeFunction(_)) => None,
            (ValueKind::Null, ValueKind::Null) => Some(true),
            (ValueKind::Bool(a), ValueKind::Bool(b)) => Some(a == b),
            (ValueKind::Int(a), ValueKind::Int(b)) => Some(a == b),
            (ValueKind::Float(a), ValueKind::Float(b)) => Some(a == b),
            (ValueKind::Int(a), ValueKind::Float(b)) | (ValueKind::Float(b), ValueKind::Int(a)) => {
                Some(*a as f64 == *b)
            }
            (ValueKind::String(a), ValueKind::String(b)) => Some(a == b),
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut equal = true;
                for (left, right) in a.iter().zip(b) {
                    equal &= left.structural_eq(right)?;
                }
                Some(equal)
            }
            (ValueKind::Struct(a), ValueKind::Struct(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut equal = true;
                for (key, left) in a {
                    match b.get(key) {
                        Some(right) => equal &= left.structural_eq(right)?,
                        None => equal = false,
                    }
                }
                Some(equal)
            }
            _ => Some(false),
        }
    }

    /// Display form used inside arrays and structs: strings are quoted.
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::String(chars) => {
                write!(f, "\"")?;
                write_chars(f, chars)?;
                write!(f, "\"")
            }
            _ => fmt::Display::fmt(self, f),
        }
    }
}

fn write_chars(f: &mut fmt::Formatter<'_>, chars: &[char]) -> fmt::Result {
    use fmt::Write;
    for ch in chars {
        f.write_char(*ch)?;
    }
    Ok(())
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Null => write!(f, "Null"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n:?}"),
            ValueKind::String(chars) => write!(f, "{:?}", chars.iter().collect::<String>()),
            ValueKind::Array(values) => {
                ensure_sufficient_stack(|| f.debug_list().entries(values.iter()).finish())
            }
            ValueKind::Struct(fields) => {
                ensure_sufficient_stack(|| f.debug_map().entries(fields.iter()).finish())
            }
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n:?}"),
            ValueKind::String(chars) => write_chars(f, chars),
            ValueKind::Array(values) => ensure_sufficient_stack(|| {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    value.fmt_nested(f)?;
                }
                write!(f, "]")
            }),
            ValueKind::Struct(fields) => ensure_sufficient_stack(|| {
                if fields.is_empty() {
                    return write!(f, "struct {{}}");
                }
                write!(f, "struct {{ ")?;
                for (idx, (name, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: ")?;
                    value.fmt_nested(f)?;
                }
                write!(f, " }}")
            }),
            ValueKind::Function(fun) => write!(f, "({}) => {{..}}", fun.params.join(", ")),
            ValueKind::NativeFunction(fun) => write!(f, "<builtin {}>", fun.name),
        }
    }
}

/// Unlinks the children of a uniquely owned payload so that a long chain
/// such as `l = [l]` is freed in a loop rather than by recursion.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(&mut self.0, &mut pending);
        while let Some(mut value) = pending.pop() {
            detach_children(&mut value.0, &mut pending);
        }
    }
}

fn detach_children(payload: &mut Rc<ValueKind>, pending: &mut Vec<Value>) {
    match Rc::get_mut(payload) {
        Some(ValueKind::Array(items)) => pending.append(items),
        Some(ValueKind::Struct(fields)) => {
            pending.extend(mem::take(fields).into_values());
        }
        _ => {}
    }
}

#[derive(Clone)]
pub enum ValueKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Unicode scalar values, indexable in constant time.
    String(Vec<char>),
    Array(Vec<Value>),
    /// Fields in declaration order; the field set never changes.
    Struct(IndexMap<String, Value>),
    Function(Closure),
    NativeFunction(NativeFunction),
}

/// Arrow function paired with the scope it was created in. The scope is
/// shared, not snapshotted: later writes to captured names are visible.
/// The lease keeps that scope alive until the last copy of the closure is
/// dropped.
#[derive(Clone)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Rc<[Stmt]>,
    pub env: Rc<ScopeLease>,
}

impl Closure {
    pub fn scope(&self) -> ScopeId {
        self.env.id()
    }
}

pub type NativeCallback = fn(&mut Output, &[Value], SourceSpan) -> Result<Value>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub callback: NativeCallback,
}

impl NativeFunction {
    pub fn call(&self, out: &mut Output, args: &[Value], span: SourceSpan) -> Result<Value> {
        if args.len() != self.arity {
            return Err(QuillError::from(Diagnostic::runtime(
                format!(
                    "function `{}` expected {} argument{} but received {}",
                    self.name,
                    self.arity,
                    if self.arity == 1 { "" } else { "s" },
                    args.len()
                ),
                span,
            )));
        }
        (self.callback)(out, args, span)
    }
}
