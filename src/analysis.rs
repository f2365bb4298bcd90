//! Static listing of the variables a suite uses and produces, without
//! running any step.

use crate::error::EngineResult;
use crate::model::{TestCase, TestStep, TestSuite};
use crate::runner::DefaultTestRunner;
use crate::template;
use crate::testcase::{VAR_TESTCASE, VAR_TESTSTEP_NUMBER};
use crate::testsuite::{VAR_TESTSUITE_FILENAME, VAR_TESTSUITE_NAME};
use crate::vars::Vars;
use serde::Serialize;
use serde_json::Value;

/// Step keys whose placeholders are not resolved from suite variables.
const IGNORED_KEYS: [&str; 3] = ["vars", "range", "info"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteVariables {
    /// Placeholder keys no variable source provides.
    pub unresolved: Vec<String>,
    /// Variables the steps are known to produce.
    pub extracted: Vec<String>,
}

impl DefaultTestRunner {
    /// List the extracted and unresolved variables of `suite`.
    pub fn parse_test_suite(
        &self,
        suite: &TestSuite,
    ) -> EngineResult<SuiteVariables> {
        let mut vars = Vars::from(suite.vars.clone());
        vars.add(VAR_TESTSUITE_NAME, suite.name.clone());
        vars.add(VAR_TESTSUITE_FILENAME, suite.filename.clone());
        vars.add_all(&self.initial_vars);

        let mut steps = Vec::new();
        for tc in &suite.testcases {
            for (number, raw) in tc.steps.iter().enumerate() {
                let mut step_vars = vars.clone();
                step_vars.add(VAR_TESTCASE, tc.name.clone());
                step_vars.add(VAR_TESTSTEP_NUMBER, number);
                let text = raw.to_string();
                let content = template::render_json(&text, &step_vars.dump())?;
                steps.push((tc, TestStep::parse(&content, number)?));
            }
        }

        let mut out = SuiteVariables::default();
        for (tc, step) in &steps {
            for name in self.extracted_by(tc, step)? {
                push_unique(&mut out.extracted, name);
            }
        }

        let extracted: Vec<&str> =
            out.extracted.iter().map(String::as_str).collect();
        let mut unresolved = Vec::new();
        for (_, step) in &steps {
            let ranged = !matches!(step.get("range"), None | Some(Value::Null));
            let mut texts = Vec::new();
            for (key, value) in &step.0 {
                if !IGNORED_KEYS.contains(&key.as_str()) {
                    collect_strings(value, &mut texts);
                }
            }
            for text in texts {
                for placeholder in template::find_placeholders(&text) {
                    if placeholder.contains("default") {
                        continue;
                    }
                    let Some(key) = template::placeholder_key(&placeholder)
                    else {
                        continue;
                    };
                    if ranged && is_under(&key, &["index", "key", "value"]) {
                        continue;
                    }
                    if !is_under(&key, &extracted) {
                        push_unique(&mut unresolved, key);
                    }
                }
            }
        }
        out.unresolved = unresolved;

        Ok(out)
    }

    /// Variables a step makes available: the executor's zero-value result
    /// under `result.` and the step's `vars` assignments, each both plain
    /// and prefixed with the case name.
    fn extracted_by(
        &self,
        tc: &TestCase,
        step: &TestStep,
    ) -> EngineResult<Vec<String>> {
        let mut names = Vec::new();
        let runner = self.registry.resolve(step)?;
        if let Some(zero) = runner.zero_value_result() {
            let mut result = Vars::new();
            result.add_flattened("result", &zero);
            for key in result.sorted_keys() {
                names.push(key.to_string());
                names.push(format!("{}.{key}", tc.name));
            }
        }
        for name in step.assign_step()?.assignments.keys() {
            names.push(name.clone());
            names.push(format!("{}.{name}", tc.name));
        }
        Ok(names)
    }
}

fn is_under(key: &str, roots: &[&str]) -> bool {
    roots.iter().any(|root| {
        key == *root
            || key
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            items.iter().for_each(|v| collect_strings(v, out))
        }
        Value::Object(map) => {
            map.values().for_each(|v| collect_strings(v, out))
        }
        _ => {}
    }
}
