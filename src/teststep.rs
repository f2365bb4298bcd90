//! Execution of one interpolated step: attempts, timeout, assertions.

use crate::assertion::apply_assertions;
use crate::error::{EngineError, EngineResult};
use crate::executor::{ExecutorRunner, RunContext};
use crate::expression;
use crate::model::{AssertionsApplied, Failure, StepResult, TestCase, TestStep};
use crate::runner::DefaultTestRunner;
use crate::template;
use crate::vars::Vars;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

impl DefaultTestRunner {
    /// Run `step` through `runner` with its retry policy, filling `result`.
    ///
    /// Returns the variables produced by the last attempt that reached the
    /// executor: the flattened result under `result.` plus the run-context
    /// values. `result.retries` ends up holding the number of attempts.
    pub(crate) async fn run_test_step(
        &self,
        runner: &ExecutorRunner,
        tc: &TestCase,
        result: &mut StepResult,
        step: &TestStep,
        ctx: &RunContext,
    ) -> Vars {
        let step_number = result.number;
        let range_index = result.range_index;
        let max_attempts = runner.retry().saturating_add(1);
        let defaults = runner.default_assertions();

        let mut assertions = AssertionsApplied::default();
        let mut new_vars = Vars::new();
        let mut last_error: Option<EngineError> = None;
        result.retries = 0;

        loop {
            result.retries += 1;
            let attempt = result.retries;

            match self.run_test_step_executor(runner, ctx, step).await {
                Err(e) => {
                    warn!(
                        "Step #{}-{} attempt {} failed: {}",
                        step_number, range_index, attempt, e
                    );
                    last_error = Some(e);
                }
                Ok(output) => {
                    last_error = None;
                    new_vars = Vars::new();
                    if let Some(value) = &output {
                        new_vars.add_flattened("result", value);
                    }
                    new_vars.add_all(&ctx.values);
                    result.computed_vars.add_all(&new_vars);

                    self.compute_info(runner, result);

                    let scope = match output {
                        Some(value) => {
                            let mut scope = Map::new();
                            scope.insert("result".to_string(), value);
                            scope
                        }
                        None => ctx.values.to_nested(),
                    };
                    assertions = apply_assertions(
                        &scope,
                        tc,
                        step_number,
                        range_index,
                        step,
                        defaults.as_deref(),
                    );
                    result.assertions_applied = assertions.clone();

                    if assertions.ok {
                        break;
                    }
                }
            }

            if attempt >= max_attempts {
                break;
            }

            let retry_if = runner.retry_if();
            if !retry_if.is_empty() {
                match expression::evaluate_conditions(
                    retry_if,
                    &result.computed_vars,
                ) {
                    Err(e) => {
                        result.append_error(EngineError::SkipEvaluation(format!(
                            "retry_if: {e:#}"
                        )));
                        break;
                    }
                    Ok(failures) if !failures.is_empty() => {
                        info!("retry conditions not fulfilled: {:?}", failures);
                        result.errors.push(Failure::at(
                            tc,
                            step_number,
                            range_index,
                            format!(
                                "retry conditions not fulfilled, \
                                 skipping {} remaining retries",
                                max_attempts - attempt
                            ),
                        ));
                        break;
                    }
                    Ok(_) => {}
                }
            }

            if runner.delay() > 0 {
                debug!(
                    "Sleep {}s before attempt {}",
                    runner.delay(),
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs(runner.delay())).await;
            }
        }

        if let Some(e) = last_error {
            error!("Step #{}-{}: {}", step_number, range_index, e);
            result
                .errors
                .push(Failure::at(tc, step_number, range_index, e.to_string()));
        }
        if result.retries > 1 && !assertions.errors.is_empty() {
            result.append_error(format!(
                "It's a failure after {} attempts",
                result.retries
            ));
        }
        result.append_failures(assertions.errors.iter().cloned());
        result.systemout = assertions.systemout;
        result.systemerr = assertions.systemerr;

        new_vars
    }

    /// One attempt. With a non-zero timeout the executor runs on its own
    /// task; when the deadline passes that task is left to finish on its
    /// own and the attempt fails with [`EngineError::Timeout`].
    async fn run_test_step_executor(
        &self,
        runner: &ExecutorRunner,
        ctx: &RunContext,
        step: &TestStep,
    ) -> EngineResult<Option<Value>> {
        let mut ctx = ctx.clone();
        ctx.executor = Some(runner.name().to_string());

        if runner.timeout() == 0 {
            return runner
                .run(ctx, step.clone())
                .await
                .map_err(|e| EngineError::Executor(format!("{e:#}")));
        }

        let executor = runner.executor();
        let step = step.clone();
        let worker = tokio::spawn(async move { executor.run(ctx, step).await });

        let deadline = Duration::from_secs(runner.timeout());
        match tokio::time::timeout(deadline, worker).await {
            Ok(Ok(outcome)) => {
                outcome.map_err(|e| EngineError::Executor(format!("{e:#}")))
            }
            Ok(Err(join_error)) => Err(EngineError::Executor(format!(
                "executor task failed: {join_error}"
            ))),
            Err(_) => {
                warn!("Executor {} ran out of time", runner.name());
                Err(EngineError::Timeout {
                    seconds: runner.timeout(),
                })
            }
        }
    }

    /// Render the step's `info` lines against its computed variables.
    fn compute_info(&self, runner: &ExecutorRunner, result: &mut StepResult) {
        if runner.info().is_empty() {
            return;
        }
        let vars = result.computed_vars.dump();
        for line in runner.info() {
            match template::render(line, &vars) {
                Ok(rendered) if !rendered.is_empty() => {
                    info!("{}", rendered);
                    result.computed_info.push(rendered);
                }
                Ok(_) => {}
                Err(e) => error!("unable to render info {:?}: {}", line, e),
            }
        }
    }
}
