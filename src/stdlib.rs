use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, QuillError, Result, SourceSpan},
    runtime::Output,
    value::{NativeCallback, NativeFunction, Value, ValueKind},
};

/// Bindings of the read-only scope every program starts under.
pub fn prelude() -> IndexMap<String, Value> {
    let mut bindings = IndexMap::new();
    bindings.insert("println".into(), native("println", 1, io_println));
    bindings.insert("length".into(), native("length", 1, collections_length));
    bindings
}

fn native(name: &'static str, arity: usize, callback: NativeCallback) -> Value {
    Value::new(ValueKind::NativeFunction(NativeFunction {
        name,
        arity,
        callback,
    }))
}

fn io_println(out: &mut Output, args: &[Value], _span: SourceSpan) -> Result<Value> {
    out.write_line(&args[0].to_string())?;
    Ok(Value::null())
}

fn collections_length(_out: &mut Output, args: &[Value], span: SourceSpan) -> Result<Value> {
    let value = &args[0];
    let len = match value.kind() {
        ValueKind::String(chars) => chars.len(),
        ValueKind::Array(values) => values.len(),
        ValueKind::Struct(fields) => fields.len(),
        _ => {
            return Err(QuillError::from(Diagnostic::runtime(
                format!(
                    "`length` expects an Array, String or Struct, found {}",
                    value.type_name()
                ),
                span,
            )));
        }
    };
    Ok(Value::int(len as i64))
}
