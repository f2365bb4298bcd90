//! CEL-based evaluation of `skip`, `retry_if` and `assertions` entries.

use crate::vars::Vars;
use anyhow::{anyhow, Result};
use cel::{Context, Program};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Evaluate a CEL expression against a scope of top-level variables.
///
/// Non-boolean results are coerced: non-zero / non-empty → true.
pub fn evaluate(expr: &str, scope: &Map<String, Value>) -> Result<bool> {
    let program = compile(expr)?;
    let context = build_context(scope)?;
    let result = program
        .execute(&context)
        .map_err(|e| anyhow!("CEL execution error in '{expr}': {e}"))?;

    Ok(cel_value_is_truthy(&result))
}

/// Evaluate every condition against `vars` and return the ones that do
/// not hold, in declaration order.
///
/// An expression that fails to compile or execute aborts the evaluation.
pub fn evaluate_conditions(
    conditions: &[String],
    vars: &Vars,
) -> Result<Vec<String>> {
    let scope = vars.to_nested();
    let mut failures = Vec::new();
    for condition in conditions {
        if !evaluate(condition, &scope)? {
            debug!("condition not satisfied: {condition}");
            failures.push(condition.clone());
        }
    }
    Ok(failures)
}

/// Pre-process an expression to support function aliases.
///
/// Conversions:
/// - `len(x)` → `size(x)`
/// - `type(x)` → `type_of(x)` (avoid CEL keyword clash)
fn preprocess_expr(expr: &str) -> String {
    use regex::Regex;
    use std::sync::LazyLock;

    static LEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\blen\(").expect("failed to compile len regex")
    });

    static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\btype\(").expect("failed to compile type regex")
    });

    let result = LEN_RE.replace_all(expr, "size(").into_owned();
    TYPE_RE.replace_all(&result, "type_of(").into_owned()
}

fn compile(expr: &str) -> Result<Program> {
    let processed = preprocess_expr(expr);
    debug!("Compiling CEL expression: {processed}");
    Program::compile(&processed)
        .map_err(|e| anyhow!("CEL compile error for '{processed}': {e}"))
}

fn build_context<'a>(scope: &Map<String, Value>) -> Result<Context<'a>> {
    let mut context = Context::default();

    for (key, value) in scope {
        context
            .add_variable(key.as_str(), value.clone())
            .map_err(|e| {
                anyhow!("Failed to add variable '{key}' to CEL context: {e}")
            })?;
    }

    register_custom_functions(&mut context);

    Ok(context)
}

fn register_custom_functions(context: &mut Context<'_>) {
    // compare(a, b) - deep equality check returning bool
    context.add_function("compare", |a: cel::Value, b: cel::Value| -> bool {
        a == b
    });

    context.add_function("type_of", |v: cel::Value| -> Arc<String> {
        let t = match v {
            cel::Value::Int(_) => "int",
            cel::Value::UInt(_) => "uint",
            cel::Value::Float(_) => "double",
            cel::Value::String(_) => "string",
            cel::Value::Bool(_) => "bool",
            cel::Value::List(_) => "list",
            cel::Value::Map(_) => "map",
            cel::Value::Null => "null",
            cel::Value::Bytes(_) => "bytes",
            _ => "unknown",
        };
        Arc::new(t.to_string())
    });

    context.add_function("urlencode", |s: Arc<String>| -> Arc<String> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(s.as_bytes()).collect();
        Arc::new(encoded)
    });
}

fn cel_value_is_truthy(value: &cel::Value) -> bool {
    match value {
        cel::Value::Bool(b) => *b,
        cel::Value::Int(i) => *i != 0,
        cel::Value::UInt(u) => *u != 0,
        cel::Value::Float(f) => *f != 0.0,
        cel::Value::String(s) => !s.is_empty(),
        cel::Value::Null => false,
        cel::Value::List(list) => !list.is_empty(),
        cel::Value::Map(map) => !map.map.is_empty(),
        _ => true,
    }
}
