//! `{{.path}}` placeholder rendering and bounded multi-pass interpolation.
//!
//! A placeholder is `{{.some.key}}`, optionally followed by one filter:
//! `{{.some.key | default "fallback"}}`, `| upper`, `| lower` or `| trim`.
//! Placeholders whose key is unknown are left in place so that a later
//! pass (or a later scope) can resolve them.

use crate::error::{EngineError, EngineResult};
use crate::vars::Vars;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, error};

/// Upper bound of substitution passes.
pub const MAX_PASSES: usize = 10;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([^{}]*?)\s*\}\}")
        .expect("failed to compile placeholder regex")
});

static OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.").expect("failed to compile marker regex")
});

static DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"^default\s+(?:\\"(.*?)\\"|"((?:[^"\\]|\\.)*)""#,
        r#"|'([^']*)'|(\S+))$"#,
    ))
    .expect("failed to compile default filter regex")
});

/// Output of [`interpolate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub content: String,
    /// Number of render passes performed.
    pub passes: usize,
    /// `false` when placeholders were still present after the last pass.
    pub complete: bool,
}

/// Whether `text` still contains a placeholder marker.
pub fn has_placeholders(text: &str) -> bool {
    OPEN_RE.is_match(text)
}

/// All placeholders (`{{.key ...}}`) present in `text`, verbatim.
pub fn find_placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Key referenced by a placeholder string such as `{{ .a.b | upper }}`.
pub fn placeholder_key(placeholder: &str) -> Option<String> {
    let caps = PLACEHOLDER_RE.captures(placeholder)?;
    let inner = caps.get(1)?.as_str();
    let key = inner.split('|').next()?.trim();
    Some(key.to_string())
}

/// How substituted values are written into the rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Raw,
    /// Escaped for the inside of a JSON string literal.
    Json,
}

impl Output {
    fn encode(self, value: String) -> String {
        match self {
            Output::Raw => value,
            Output::Json => escape(&value),
        }
    }
}

/// Single substitution pass over `text`, values written verbatim.
///
/// Only `text` itself is checked for unterminated placeholders; markers
/// brought in by substituted values are left alone.
pub fn render(
    text: &str,
    vars: &BTreeMap<String, String>,
) -> EngineResult<String> {
    ensure_terminated(text)?;
    render_pass(text, vars, Output::Raw, true)
}

/// Like [`render`], but each value is JSON-string escaped after its filter
/// ran, for templates that are JSON documents.
pub fn render_json(
    text: &str,
    vars: &BTreeMap<String, String>,
) -> EngineResult<String> {
    ensure_terminated(text)?;
    render_pass(text, vars, Output::Json, true)
}

/// Non-strict passes keep malformed placeholders instead of failing.
fn render_pass(
    text: &str,
    vars: &BTreeMap<String, String>,
    output: Output,
    strict: bool,
) -> EngineResult<String> {
    let mut failure: Option<EngineError> = None;

    let rendered = PLACEHOLDER_RE.replace_all(text, |caps: &Captures<'_>| {
        if failure.is_some() {
            return caps[0].to_string();
        }
        match substitute(&caps[1], vars, output) {
            Ok(Some(value)) => value,
            Ok(None) => caps[0].to_string(),
            Err(e) if strict => {
                failure = Some(e);
                caps[0].to_string()
            }
            Err(e) => {
                debug!("keeping {:?}: {}", &caps[0], e);
                caps[0].to_string()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

fn substitute(
    inner: &str,
    vars: &BTreeMap<String, String>,
    output: Output,
) -> EngineResult<Option<String>> {
    let mut parts = inner.splitn(2, '|');
    let key = parts.next().unwrap_or_default().trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(EngineError::Template(format!(
            "malformed placeholder \"{{{{.{inner}}}}}\""
        )));
    }

    let value = vars.get(key).cloned();
    let Some(filter) = parts.next().map(str::trim) else {
        return Ok(value.map(|v| output.encode(v)));
    };

    let filtered = match filter {
        "upper" => value.map(|v| v.to_uppercase()),
        "lower" => value.map(|v| v.to_lowercase()),
        "trim" => value.map(|v| v.trim().to_string()),
        _ => {
            let caps = DEFAULT_RE.captures(filter).ok_or_else(|| {
                EngineError::Template(format!(
                    "unknown filter {filter:?} on {key:?}"
                ))
            })?;
            if value.as_deref().is_some_and(|v| !v.is_empty()) {
                value
            } else {
                // Fallbacks come from the template and are already encoded.
                let fallback = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .or_else(|| caps.get(4))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                return Ok(Some(fallback));
            }
        }
    };
    Ok(filtered.map(|v| output.encode(v)))
}

fn ensure_terminated(text: &str) -> EngineResult<()> {
    for open in OPEN_RE.find_iter(text) {
        let rest = &text[open.end()..];
        let close = rest.find("}}");
        let next_open = rest.find("{{");
        let terminated = match (close, next_open) {
            (None, _) => false,
            (Some(c), Some(o)) => c < o,
            (Some(_), None) => true,
        };
        if !terminated {
            return Err(EngineError::Template(format!(
                "unterminated placeholder at offset {}",
                open.start()
            )));
        }
    }
    Ok(())
}

/// Escape a value so it can be embedded inside a JSON string literal.
pub fn escape(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Resolve the JSON document `text` against `vars`, re-rendering until no
/// placeholder is left, nothing changes, or [`MAX_PASSES`] is reached.
///
/// Leftover placeholders after the bound are logged and kept.
pub fn interpolate(text: &str, vars: &Vars) -> EngineResult<Interpolation> {
    interpolate_with(text, &vars.dump())
}

/// [`interpolate`] over an already flattened, unescaped variable view.
///
/// Template errors are only raised for `text` itself. Later passes work
/// on substituted values and keep whatever they cannot resolve.
pub fn interpolate_with(
    text: &str,
    vars: &BTreeMap<String, String>,
) -> EngineResult<Interpolation> {
    ensure_terminated(text)?;

    let mut content = text.to_string();
    let mut passes = 0;

    while passes < MAX_PASSES {
        let next = render_pass(&content, vars, Output::Json, passes == 0)?;
        passes += 1;
        let unchanged = next == content;
        content = next;
        if unchanged || !has_placeholders(&content) {
            break;
        }
    }

    let complete = !has_placeholders(&content);
    if !complete {
        error!("We could not replace all variables");
        debug!("unresolved content: {}", content);
    }

    Ok(Interpolation {
        content,
        passes,
        complete,
    })
}
