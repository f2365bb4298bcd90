//! Suites, cases, steps and their results.

use crate::error::{EngineError, EngineResult};
use crate::vars::Vars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Execution status shared by steps, cases and suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    #[default]
    Run,
    Pass,
    Fail,
    Skip,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Run => "RUN",
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Skip => "SKIP",
        };
        f.write_str(s)
    }
}

/// A suite document: shared variables plus ordered test cases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    /// Path the suite was loaded from.
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    #[serde(default)]
    pub testcases: Vec<TestCase>,

    #[serde(default, skip_deserializing)]
    pub status: Status,
    #[serde(default, skip_deserializing)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_deserializing)]
    pub end: Option<DateTime<Utc>>,
    /// Seconds.
    #[serde(default, skip_deserializing)]
    pub duration: f64,
    #[serde(default, skip_deserializing)]
    pub nb_testcases_pass: usize,
    #[serde(default, skip_deserializing)]
    pub nb_testcases_fail: usize,
    #[serde(default, skip_deserializing)]
    pub nb_testcases_skip: usize,
}

/// An ordered sequence of steps sharing a variable scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    /// Slugified on load; used to namespace exported variables.
    pub name: String,
    /// Name as written in the document.
    #[serde(default, skip_deserializing)]
    pub original_name: String,
    /// Conditions that must all hold for the case to run.
    #[serde(default)]
    pub skip: Vec<String>,
    /// Step bodies, kept untyped until interpolated.
    #[serde(default)]
    pub steps: Vec<Value>,

    #[serde(default, skip_deserializing)]
    pub results: Vec<StepResult>,
    #[serde(default, skip_deserializing)]
    pub status: Status,
    /// Messages explaining why the case was skipped.
    #[serde(default, skip_deserializing)]
    pub skipped: Vec<String>,
    #[serde(default, skip_deserializing)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_deserializing)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_deserializing)]
    pub duration: f64,
}

/// One recorded error or assertion failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub value: String,
    /// A required failure aborts the remaining steps of the case.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub testcase: String,
    #[serde(default)]
    pub step_number: usize,
    #[serde(default)]
    pub range_index: usize,
}

impl Failure {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// Failure located at a given step of a case.
    pub fn at(
        tc: &TestCase,
        step_number: usize,
        range_index: usize,
        value: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            required: false,
            testcase: tc.name.clone(),
            step_number,
            range_index,
        }
    }
}

/// Outcome of applying a step's assertions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertionsApplied {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<Failure>,
    #[serde(default)]
    pub systemout: String,
    #[serde(default)]
    pub systemerr: String,
}

/// Result of one (step, range item) execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub number: usize,
    pub range_index: usize,
    pub range_enabled: bool,
    pub status: Status,
    /// String view of the variables the step was interpolated with.
    #[serde(default)]
    pub input_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub computed_vars: Vars,
    #[serde(default)]
    pub computed_info: Vec<String>,
    /// Number of attempts made.
    pub retries: u32,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub duration: f64,
    #[serde(default)]
    pub errors: Vec<Failure>,
    #[serde(default)]
    pub skipped: Vec<String>,
    #[serde(default)]
    pub assertions_applied: AssertionsApplied,
    #[serde(default)]
    pub raw: Value,
    #[serde(default)]
    pub interpolated: Value,
    #[serde(default)]
    pub systemout: String,
    #[serde(default)]
    pub systemerr: String,
}

impl StepResult {
    pub fn append_error(&mut self, err: impl std::fmt::Display) {
        self.errors.push(Failure::new(err.to_string()));
    }

    pub fn append_failures(
        &mut self,
        failures: impl IntoIterator<Item = Failure>,
    ) {
        self.errors.extend(failures);
    }

    pub fn has_required_failure(&self) -> bool {
        self.errors.iter().any(|f| f.required)
    }
}

/// Aggregate over every suite of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tests {
    pub test_suites: Vec<TestSuite>,
    pub status: Status,
    pub nb_testsuites_pass: usize,
    pub nb_testsuites_fail: usize,
    pub nb_testsuites_skip: usize,
    pub duration: f64,
}

/// A step assertion: a CEL expression, optionally marked required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Assertion {
    Check(String),
    Detailed {
        check: String,
        #[serde(default)]
        required: bool,
    },
}

impl Assertion {
    pub fn check(&self) -> &str {
        match self {
            Assertion::Check(c) => c,
            Assertion::Detailed { check, .. } => check,
        }
    }

    pub fn required(&self) -> bool {
        matches!(self, Assertion::Detailed { required: true, .. })
    }
}

/// An explicit `vars:` entry on a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub from: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub regex: Option<String>,
}

/// The `vars:` section of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignStep {
    #[serde(default, rename = "vars")]
    pub assignments: BTreeMap<String, Assignment>,
}

/// A step body after interpolation.
///
/// Only the fields the engine needs are read; everything else is passed
/// untouched to the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestStep(pub Map<String, Value>);

impl TestStep {
    /// Parse interpolated step text.
    pub fn parse(content: &str, number: usize) -> EngineResult<Self> {
        serde_json::from_str::<Map<String, Value>>(content)
            .map(TestStep)
            .map_err(|e| EngineError::StepParse {
                number,
                message: e.to_string(),
            })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Declared executor type.
    pub fn kind(&self) -> Option<&str> {
        self.str_field("type").filter(|s| !s.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name").filter(|s| !s.is_empty())
    }

    /// A string, or a list of strings, as a list.
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Non-negative integer field, accepting numbers or numeric strings.
    pub fn u64_field(&self, key: &str) -> EngineResult<u64> {
        let invalid = |v: &Value| {
            EngineError::ExecutorResolution(format!("invalid {key} value: {v}"))
        };
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| invalid(&Value::Number(n.clone()))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(0),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(&Value::String(s.clone()))),
            Some(other) => Err(invalid(other)),
        }
    }

    pub fn assertions(&self) -> EngineResult<Vec<Assertion>> {
        match self.0.get("assertions") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                EngineError::StepParse {
                    number: 0,
                    message: format!("invalid assertions: {e}"),
                }
            }),
        }
    }

    pub fn assign_step(&self) -> EngineResult<AssignStep> {
        match self.0.get("vars") {
            None | Some(Value::Null) => Ok(AssignStep::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map(|assignments| AssignStep { assignments })
                .map_err(|e| EngineError::StepParse {
                    number: 0,
                    message: format!("invalid vars assignments: {e}"),
                }),
        }
    }
}

impl TestSuite {
    /// Deserialize a suite from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let mut suite: TestSuite = serde_yaml::from_str(yaml)?;
        for tc in &mut suite.testcases {
            tc.original_name = tc.name.clone();
            tc.name = slugify(&tc.name);
        }
        Ok(suite)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Lowercase, alphanumeric and `_` only, so case names remain valid
/// expression identifiers once used as variable prefixes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            continue;
        }
        let separator =
            ch.is_whitespace() || matches!(ch, '-' | '_' | '.' | '/');
        if separator && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}
