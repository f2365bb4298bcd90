//! Applies a step's assertions to an executor result.

use crate::expression;
use crate::model::{Assertion, AssertionsApplied, Failure, TestCase, TestStep};
use serde_json::{Map, Value};
use tracing::debug;

/// Evaluate the step's `assertions` against `subject`.
///
/// `subject` is the expression scope: `{ "result": <executor result> }`, or
/// the run-context variables when the executor produced no result. When
/// the step declares no assertions, `defaults` (the executor's default
/// assertions) are used instead.
pub fn apply_assertions(
    subject: &Map<String, Value>,
    tc: &TestCase,
    step_number: usize,
    range_index: usize,
    step: &TestStep,
    defaults: Option<&[Assertion]>,
) -> AssertionsApplied {
    let mut applied = AssertionsApplied {
        ok: true,
        systemout: system_stream(subject, "systemout"),
        systemerr: system_stream(subject, "systemerr"),
        ..Default::default()
    };

    let declared = match step.assertions() {
        Ok(a) => a,
        Err(e) => {
            applied.ok = false;
            applied
                .errors
                .push(Failure::at(tc, step_number, range_index, e.to_string()));
            return applied;
        }
    };
    let assertions: &[Assertion] = if declared.is_empty() {
        defaults.unwrap_or_default()
    } else {
        &declared
    };

    for assertion in assertions {
        let outcome = expression::evaluate(assertion.check(), subject);
        let message = match outcome {
            Ok(true) => {
                debug!("assertion passed: {}", assertion.check());
                continue;
            }
            Ok(false) => format!(
                "Testcase {:?}, step #{}-{}: Assertion {:?} failed",
                tc.original_name,
                step_number,
                range_index,
                assertion.check()
            ),
            Err(e) => format!(
                "Testcase {:?}, step #{}-{}: \
                 Assertion {:?} could not be evaluated: {e}",
                tc.original_name,
                step_number,
                range_index,
                assertion.check()
            ),
        };
        let mut failure = Failure::at(tc, step_number, range_index, message);
        failure.required = assertion.required();
        applied.errors.push(failure);
    }

    applied.ok = applied.errors.is_empty();
    applied
}

fn system_stream(subject: &Map<String, Value>, key: &str) -> String {
    subject
        .get("result")
        .and_then(|r| r.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
