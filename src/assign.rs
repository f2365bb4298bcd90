//! Explicit `vars:` assignments evaluated after a successful step.

use crate::error::{EngineError, EngineResult};
use crate::model::AssignStep;
use crate::vars::Vars;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Evaluate `assign` against the step's computed variables.
///
/// Each `from` is looked up as a literal key, then as `<tc_name>.<from>`,
/// then falls back to `default`. With a regex, the last capture group of
/// the first match becomes the value; a non-string source or no match
/// yields an empty string. Returns `None` when no assignment is declared.
pub fn process_variable_assignments(
    tc_name: &str,
    tc_vars: &Vars,
    assign: &AssignStep,
) -> EngineResult<Option<Vars>> {
    if assign.assignments.is_empty() {
        return Ok(None);
    }

    let mut result = Vars::new();

    for (var_name, assignment) in &assign.assignments {
        debug!("Processing {} assignment", var_name);
        let value = tc_vars
            .get(&assignment.from)
            .or_else(|| tc_vars.get(&format!("{tc_name}.{}", assignment.from)))
            .or(assignment.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                let err = EngineError::ReferenceNotFound {
                    from: assignment.from.clone(),
                    available: tc_vars.sorted_keys().join("\n"),
                };
                info!("{}", err);
                err
            })?;

        let pattern = assignment.regex.as_deref().filter(|r| !r.is_empty());
        let Some(pattern) = pattern else {
            info!("Assign '{}' value '{}'", var_name, value);
            result.add(var_name.clone(), value);
            continue;
        };

        let regex = Regex::new(pattern).map_err(|e| {
            warn!("unable to compile regexp {:?}", pattern);
            EngineError::InvalidRegex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            }
        })?;

        let Value::String(source) = &value else {
            warn!("{:?} is not a string value", var_name);
            result.add(var_name.clone(), "");
            continue;
        };

        match regex.captures(source) {
            Some(caps) => {
                let last = caps
                    .iter()
                    .last()
                    .flatten()
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                info!(
                    "Assign {:?} from regexp {:?}, value {:?}",
                    var_name, pattern, last
                );
                result.add(var_name.clone(), last);
            }
            None => {
                warn!(
                    "{}: {:?} doesn't match anything in {:?}",
                    var_name, pattern, source
                );
                result.add(var_name.clone(), "");
            }
        }
    }

    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Assignment;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn assign(entries: Vec<(&str, Assignment)>) -> AssignStep {
        AssignStep {
            assignments: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn from(path: &str) -> Assignment {
        Assignment {
            from: path.to_string(),
            default: None,
            regex: None,
        }
    }

    #[test]
    fn test_plain_and_regex_assignment() {
        let mut vars = Vars::new();
        vars.add("here.some.value", "this is the\nvalue");

        let step = assign(vec![
            ("assignVar", from("here.some.value")),
            (
                "assignVarWithRegex",
                Assignment {
                    regex: Some(r"this is (?s:(.*))".to_string()),
                    ..from("here.some.value")
                },
            ),
        ]);

        let result = process_variable_assignments("", &vars, &step)
            .unwrap()
            .unwrap();
        assert_eq!(
            result.get("assignVar"),
            Some(&json!("this is the\nvalue"))
        );
        assert_eq!(
            result.get("assignVarWithRegex"),
            Some(&json!("the\nvalue"))
        );
    }

    #[test]
    fn test_no_assignments() {
        let step = AssignStep::default();
        let result =
            process_variable_assignments("tc", &Vars::new(), &step).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_case_prefixed_lookup() {
        let mut vars = Vars::new();
        vars.add("login.token", "abc");
        let step = assign(vec![("t", from("token"))]);
        let result = process_variable_assignments("login", &vars, &step)
            .unwrap()
            .unwrap();
        assert_eq!(result.get("t"), Some(&json!("abc")));
    }

    #[test]
    fn test_default_used_when_missing() {
        let step = assign(vec![(
            "t",
            Assignment {
                default: Some(json!(42)),
                ..from("nope")
            },
        )]);
        let result = process_variable_assignments("tc", &Vars::new(), &step)
            .unwrap()
            .unwrap();
        assert_eq!(result.get("t"), Some(&json!(42)));
    }

    #[test]
    fn test_missing_reference_is_error() {
        let step = assign(vec![("t", from("nope"))]);
        let err = process_variable_assignments("tc", &Vars::new(), &step)
            .unwrap_err();
        assert!(matches!(err, EngineError::ReferenceNotFound { .. }));
    }

    #[test]
    fn test_regex_no_match_and_non_string() {
        let mut vars = Vars::new();
        vars.add("s", "abc");
        vars.add("n", 12);
        let step = assign(vec![
            (
                "a",
                Assignment {
                    regex: Some("x(.*)".into()),
                    ..from("s")
                },
            ),
            (
                "b",
                Assignment {
                    regex: Some("(.*)".into()),
                    ..from("n")
                },
            ),
        ]);
        let result = process_variable_assignments("tc", &vars, &step)
            .unwrap()
            .unwrap();
        assert_eq!(result.get("a"), Some(&json!("")));
        assert_eq!(result.get("b"), Some(&json!("")));
    }

    #[test]
    fn test_invalid_regex_is_error() {
        let mut vars = Vars::new();
        vars.add("s", "abc");
        let step = assign(vec![(
            "a",
            Assignment {
                regex: Some("(".into()),
                ..from("s")
            },
        )]);
        let err = process_variable_assignments("tc", &vars, &step).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRegex { .. }));
    }
}
