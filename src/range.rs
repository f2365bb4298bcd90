//! Expansion of a step's `range` attribute into keyed iterations.

use crate::error::{EngineError, EngineResult};
use crate::template;
use crate::vars::Vars;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One iteration of a ranged step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeItem {
    pub key: String,
    pub value: Value,
}

/// Resolved iteration plan of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub enabled: bool,
    pub items: Vec<RangeItem>,
}

impl Range {
    /// A step without `range`: one iteration with an empty item.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            items: vec![RangeItem::default()],
        }
    }
}

/// Resolve the `range` attribute of `raw_step` against `vars`.
pub fn parse_range(raw_step: &Value, vars: &Vars) -> EngineResult<Range> {
    let content = match raw_step.get("range") {
        None | Some(Value::Null) => return Ok(Range::disabled()),
        Some(Value::String(expr)) => resolve_expression(expr, raw_step, vars)?,
        Some(other) => other.clone(),
    };
    expand(content)
}

/// Turn a string range into data: literal JSON first, then templated.
fn resolve_expression(
    expr: &str,
    raw_step: &Value,
    vars: &Vars,
) -> EngineResult<Value> {
    debug!("attempting to parse range expression");
    if expr.is_empty() {
        return Err(EngineError::Range(
            "range expression has been specified without any data".to_string(),
        ));
    }

    if let Ok(value) = serde_json::from_str::<Value>(expr) {
        if !value.is_string() {
            return Ok(value);
        }
    }

    debug!("attempting to template range expression and parse it again");
    let interpolated = template::interpolate(&raw_step.to_string(), vars)?;
    let templated: Value = serde_json::from_str(&interpolated.content)
        .map_err(|e| {
            warn!("failed to parse range expression after templating: {e}");
            EngineError::Range(format!("unable to parse templated step: {e}"))
        })?;

    match templated.get("range") {
        Some(Value::String(resolved)) => {
            serde_json::from_str::<Value>(resolved).map_err(|e| {
                warn!("failed to parse range string into data: {e}");
                EngineError::Range(
                    "unable to transform string data into a supported \
                     range expression type"
                        .to_string(),
                )
            })
        }
        Some(other) => Ok(other.clone()),
        None => Err(EngineError::Range(
            "range attribute lost during templating".to_string(),
        )),
    }
}

fn expand(content: Value) -> EngineResult<Range> {
    let items = match content {
        Value::Array(values) => {
            debug!("\"range\" data is array-like");
            values
                .into_iter()
                .enumerate()
                .map(|(index, value)| RangeItem {
                    key: index.to_string(),
                    value,
                })
                .collect()
        }
        Value::Number(n) => {
            debug!("\"range\" data is number-like");
            let upper = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or_default()
                .max(0);
            (0..upper)
                .map(|i| RangeItem {
                    key: i.to_string(),
                    value: Value::from(i),
                })
                .collect()
        }
        Value::Object(map) => {
            debug!("\"range\" data is map-like");
            map.into_iter()
                .map(|(key, value)| RangeItem { key, value })
                .collect()
        }
        other => {
            return Err(EngineError::Range(format!(
                "unsupported range expression: {other}"
            )))
        }
    };

    Ok(Range {
        enabled: true,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys_values(range: &Range) -> Vec<(String, Value)> {
        range
            .items
            .iter()
            .map(|i| (i.key.clone(), i.value.clone()))
            .collect()
    }

    fn parse_plain(step: Value) -> EngineResult<Range> {
        parse_range(&step, &Vars::new())
    }

    #[test]
    fn test_absent_range() {
        let range = parse_plain(json!({"type": "exec"})).unwrap();
        assert!(!range.enabled);
        assert_eq!(range.items, vec![RangeItem::default()]);
    }

    #[test]
    fn test_array_range() {
        let range = parse_plain(json!({"range": [10, 20, 30]})).unwrap();
        assert!(range.enabled);
        assert_eq!(
            keys_values(&range),
            vec![
                ("0".to_string(), json!(10)),
                ("1".to_string(), json!(20)),
                ("2".to_string(), json!(30)),
            ]
        );
    }

    #[test]
    fn test_number_range() {
        let range = parse_plain(json!({"range": 3})).unwrap();
        assert_eq!(
            keys_values(&range),
            vec![
                ("0".to_string(), json!(0)),
                ("1".to_string(), json!(1)),
                ("2".to_string(), json!(2)),
            ]
        );
    }

    #[test]
    fn test_map_range() {
        let range = parse_plain(json!({"range": {"a": 1, "b": 2}})).unwrap();
        let mut keys: Vec<String> =
            range.items.iter().map(|i| i.key.clone()).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_literal_string_range() {
        let range = parse_plain(json!({"range": "[\"x\",\"y\"]"})).unwrap();
        assert_eq!(range.items[1].value, json!("y"));
    }

    #[test]
    fn test_templated_range() {
        let mut vars = Vars::new();
        vars.add("users", json!(["alice", "bob"]));
        let step = json!({"range": "{{.users}}"});
        let range = parse_range(&step, &vars).unwrap();
        assert_eq!(
            keys_values(&range),
            vec![
                ("0".to_string(), json!("alice")),
                ("1".to_string(), json!("bob")),
            ]
        );
    }

    #[test]
    fn test_templated_number_range() {
        let mut vars = Vars::new();
        vars.add("count", 2);
        let step = json!({"range": "{{.count}}"});
        let range = parse_range(&step, &vars).unwrap();
        assert_eq!(range.items.len(), 2);
    }

    #[test]
    fn test_empty_string_range_is_error() {
        let err = parse_plain(json!({"range": ""})).unwrap_err();
        assert!(matches!(err, EngineError::Range(_)));
    }

    #[test]
    fn test_bare_string_range_is_error() {
        let mut vars = Vars::new();
        vars.add("word", "hello");
        let step = json!({"range": "{{.word}}"});
        let err = parse_range(&step, &vars).unwrap_err();
        assert!(matches!(err, EngineError::Range(_)));
    }

    #[test]
    fn test_boolean_range_is_error() {
        let err = parse_plain(json!({"range": true})).unwrap_err();
        assert!(matches!(err, EngineError::Range(_)));
    }
}
