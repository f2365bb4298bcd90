//! Per-case state machine: skip, range, interpolate, dispatch, classify,
//! assign.

use crate::assign::process_variable_assignments;
use crate::error::EngineError;
use crate::executor::{RunContext, DEFAULT_EXECUTOR};
use crate::expression;
use crate::model::{Failure, Status, StepResult, TestCase, TestStep};
use crate::range::{parse_range, Range, RangeItem};
use crate::runner::DefaultTestRunner;
use crate::template;
use crate::vars::Vars;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::{debug, error, info, instrument, warn};

pub const VAR_TESTCASE: &str = "tauon.testcase";
pub const VAR_TESTSTEP_NUMBER: &str = "tauon.teststep.number";

/// Mutable state threaded through the steps of one case.
struct CaseState {
    ctx: RunContext,
    /// Runner names whose setup and teardown already ran in this case.
    known_executors: HashSet<String>,
    previous_step_vars: Vars,
    only_new_vars: Vars,
}

impl DefaultTestRunner {
    /// Run every step of `tc` and return the variables the case exported
    /// that were not already in `suite_vars`.
    #[instrument(skip_all, fields(testcase = %tc.name))]
    pub async fn run_test_case(
        &self,
        suite_name: &str,
        tc: &mut TestCase,
        suite_vars: &Vars,
    ) -> Vars {
        info!("Starting testcase");
        let computed = self.run_test_steps(suite_name, tc, suite_vars).await;

        let mut clean = Vars::new();
        for (key, value) in computed.iter() {
            if !suite_vars.contains_key(key) {
                clean.add(key.clone(), value.clone());
            }
        }
        info!("Ending testcase");
        clean
    }

    async fn run_test_steps(
        &self,
        suite_name: &str,
        tc: &mut TestCase,
        suite_vars: &Vars,
    ) -> Vars {
        if !tc.skip.is_empty() {
            match expression::evaluate_conditions(&tc.skip, suite_vars) {
                Err(e) => {
                    let err = EngineError::SkipEvaluation(format!("{e:#}"));
                    error!("{}", err);
                    let mut result = StepResult {
                        status: Status::Fail,
                        ..Default::default()
                    };
                    result.append_error(err);
                    tc.results.push(result);
                    return Vars::new();
                }
                Ok(failures) if !failures.is_empty() => {
                    info!("Skipping testcase");
                    tc.status = Status::Skip;
                    for condition in failures {
                        let message = format!(
                            "skipping testcase {:?}: \
                             condition not satisfied: {}",
                            tc.original_name, condition
                        );
                        warn!("{}", message);
                        tc.skipped.push(message);
                    }
                    return Vars::new();
                }
                Ok(_) => {}
            }
        }

        let mut state = CaseState {
            ctx: RunContext::new(suite_name, &tc.name),
            known_executors: HashSet::new(),
            previous_step_vars: suite_vars.clone(),
            only_new_vars: Vars::new(),
        };

        let raw_steps = tc.steps.clone();
        for (step_number, raw_step) in raw_steps.iter().enumerate() {
            let mut step_vars = state.previous_step_vars.clone();
            step_vars.add(VAR_TESTCASE, tc.name.clone());
            step_vars.add(VAR_TESTSTEP_NUMBER, step_number);

            let range = match parse_range(raw_step, &step_vars) {
                Ok(range) => range,
                Err(e) => {
                    error!("{}", e);
                    let mut result = StepResult {
                        number: step_number,
                        status: Status::Fail,
                        raw: raw_step.clone(),
                        ..Default::default()
                    };
                    result.append_error(e);
                    tc.results.push(result);
                    return Vars::new();
                }
            };

            for (range_index, item) in range.items.iter().enumerate() {
                let flow = self
                    .run_step_item(
                        tc,
                        &mut state,
                        raw_step,
                        step_number,
                        &range,
                        range_index,
                        item,
                    )
                    .await;
                if flow.is_break() {
                    return Vars::new();
                }
            }
        }

        state.only_new_vars
    }

    /// Run one (step, range item) pair. `Break` ends the case.
    #[allow(clippy::too_many_arguments)]
    async fn run_step_item(
        &self,
        tc: &mut TestCase,
        state: &mut CaseState,
        raw_step: &Value,
        step_number: usize,
        range: &Range,
        range_index: usize,
        item: &RangeItem,
    ) -> ControlFlow<()> {
        let mut result = StepResult {
            number: step_number,
            range_index,
            range_enabled: range.enabled,
            raw: raw_step.clone(),
            ..Default::default()
        };

        let mut item_vars = state.previous_step_vars.clone();
        item_vars.add(VAR_TESTCASE, tc.name.clone());
        item_vars.add(VAR_TESTSTEP_NUMBER, step_number);
        if range.enabled {
            item_vars.add("index", range_index);
            item_vars.add("key", item.key.clone());
            item_vars.add("value", item.value.clone());
        }
        result.input_vars = item_vars.dump();

        let raw_text = raw_step.to_string();
        let interpolated = match template::interpolate(&raw_text, &item_vars) {
            Ok(i) => i,
            Err(e) => return abort(tc, result, e),
        };
        let label = if range.enabled {
            format!("#{step_number}-{range_index}")
        } else {
            format!("#{step_number}")
        };
        if self.config.verbose {
            info!("Step {} content is: {}", label, interpolated.content);
        } else {
            debug!("Step {} content is: {}", label, interpolated.content);
        }
        let step = match TestStep::parse(&interpolated.content, step_number) {
            Ok(step) => step,
            Err(e) => return abort(tc, result, e),
        };
        result.interpolated = Value::Object(step.0.clone());

        let skip = step.strings("skip");
        if !skip.is_empty() {
            match expression::evaluate_conditions(&skip, &item_vars) {
                Err(e) => {
                    let err = EngineError::SkipEvaluation(format!("{e:#}"));
                    return abort(tc, result, err);
                }
                Ok(failures) if !failures.is_empty() => {
                    let kind = step.kind().unwrap_or(DEFAULT_EXECUTOR);
                    result.name = display_name(&step, kind, range, item);
                    result.status = Status::Skip;
                    for condition in failures {
                        let message = format!(
                            "skipping step #{}-{}: condition not satisfied: {}",
                            step_number, range_index, condition
                        );
                        info!("{}", message);
                        result.skipped.push(message);
                    }
                    tc.results.push(result);
                    return ControlFlow::Continue(());
                }
                Ok(_) => {}
            }
        }

        let runner = match self.registry.resolve(&step) {
            Ok(runner) => runner,
            Err(e) => return abort(tc, result, e),
        };

        if !state.known_executors.contains(runner.name()) {
            match runner.setup(state.ctx.clone(), &item_vars).await {
                Ok(ctx) => state.ctx = ctx,
                Err(e) => {
                    let err = EngineError::Setup {
                        name: runner.name().to_string(),
                        message: format!("{e:#}"),
                    };
                    return abort(tc, result, err);
                }
            }
            state.known_executors.insert(runner.name().to_string());
            if let Err(e) = runner.tear_down(&state.ctx).await {
                let err = EngineError::Setup {
                    name: runner.name().to_string(),
                    message: format!("{e:#}"),
                };
                return abort(tc, result, err);
            }
        }

        result.name = display_name(&step, runner.name(), range, item);
        result.status = Status::Run;
        result.start = Some(Utc::now());
        info!("Starting step {:?}", result.name);

        let new_vars = self
            .run_test_step(&runner, tc, &mut result, &step, &state.ctx)
            .await;

        let passed =
            result.errors.is_empty() && result.assertions_applied.ok;
        result.status = if passed {
            Status::Pass
        } else {
            Status::Fail
        };
        result.computed_vars.add_all(&new_vars);
        let end = Utc::now();
        if let Some(start) = result.start {
            result.duration = (end - start).num_milliseconds() as f64 / 1000.0;
        }
        result.end = Some(end);
        state.previous_step_vars.add_all(&new_vars);

        if result.status == Status::Fail {
            for failure in &result.errors {
                error!("{}", failure.value);
            }
            if result.has_required_failure() {
                result.errors.push(Failure::at(
                    tc,
                    step_number,
                    range_index,
                    "At least one required assertion failed, \
                     skipping remaining steps",
                ));
                tc.results.push(result);
                return ControlFlow::Break(());
            }
            tc.results.push(result);
            return ControlFlow::Continue(());
        }

        let assigned = step.assign_step().and_then(|assign| {
            process_variable_assignments(
                &tc.name,
                &result.computed_vars,
                &assign,
            )
        });
        match assigned {
            Ok(Some(vars)) => {
                result.computed_vars.add_all(&vars);
                state.only_new_vars.add_all(&vars);
                state.previous_step_vars.add_all(&vars);
            }
            Ok(None) => {}
            Err(e) => return abort(tc, result, e),
        }

        info!("Ending step {:?}: {}", result.name, result.status);
        tc.results.push(result);
        ControlFlow::Continue(())
    }
}

/// Record `err` on `result`, mark it failed and end the case.
fn abort(
    tc: &mut TestCase,
    mut result: StepResult,
    err: EngineError,
) -> ControlFlow<()> {
    error!("{}", err);
    result.status = Status::Fail;
    result.append_error(err);
    tc.results.push(result);
    ControlFlow::Break(())
}

/// Step `name`, else the runner name; ranged steps are suffixed with the
/// item key.
fn display_name(
    step: &TestStep,
    runner_name: &str,
    range: &Range,
    item: &RangeItem,
) -> String {
    let name = step.name().unwrap_or(runner_name);
    if range.enabled {
        format!("{name} (range={})", item.key)
    } else {
        name.to_string()
    }
}
