//! Executor capability and per-step runner resolution.

use crate::error::{EngineError, EngineResult};
use crate::executors::{ExecExecutor, HttpExecutor};
use crate::model::{Assertion, TestStep};
use crate::vars::Vars;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Executor used when a step declares no `type`.
pub const DEFAULT_EXECUTOR: &str = "exec";

/// Values carried along a test case and handed to executors.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub testsuite: String,
    pub testcase: String,
    pub executor: Option<String>,
    /// Variables contributed by executor setup hooks.
    pub values: Vars,
}

impl RunContext {
    pub fn new(
        testsuite: impl Into<String>,
        testcase: impl Into<String>,
    ) -> Self {
        Self {
            testsuite: testsuite.into(),
            testcase: testcase.into(),
            ..Default::default()
        }
    }
}

/// A task runner for one step `type`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Step `type` this executor handles.
    fn kind(&self) -> &str;

    /// Shape of a typical result, used to list the variables a step will
    /// produce without running it.
    fn zero_value_result(&self) -> Option<Value> {
        None
    }

    /// Assertions applied when a step declares none.
    fn default_assertions(&self) -> Option<Vec<Assertion>> {
        None
    }

    async fn setup(&self, ctx: RunContext, _vars: &Vars) -> Result<RunContext> {
        Ok(ctx)
    }

    async fn tear_down(&self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }

    /// Execute the step. `Ok(None)` means the executor produced no result.
    async fn run(
        &self,
        ctx: RunContext,
        step: TestStep,
    ) -> Result<Option<Value>>;
}

/// An executor together with the policy declared on a step.
#[derive(Clone)]
pub struct ExecutorRunner {
    executor: Arc<dyn Executor>,
    name: String,
    retry: u32,
    retry_if: Vec<String>,
    delay: u64,
    timeout: u64,
    info: Vec<String>,
}

impl fmt::Debug for ExecutorRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRunner")
            .field("name", &self.name)
            .field("type", &self.executor.kind())
            .field("retry", &self.retry)
            .field("delay", &self.delay)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ExecutorRunner {
    pub fn new(executor: Arc<dyn Executor>, name: impl Into<String>) -> Self {
        Self {
            executor,
            name: name.into(),
            retry: 0,
            retry_if: Vec::new(),
            delay: 0,
            timeout: 0,
            info: Vec::new(),
        }
    }

    /// Read `retry`, `retry_if`, `delay`, `timeout` and `info` from `step`.
    pub fn with_step_policy(mut self, step: &TestStep) -> EngineResult<Self> {
        let retry = step.u64_field("retry")?;
        self.retry = u32::try_from(retry).map_err(|_| {
            EngineError::ExecutorResolution(format!(
                "retry out of range: {retry}"
            ))
        })?;
        self.retry_if = step.strings("retry_if");
        self.delay = step.u64_field("delay")?;
        self.timeout = step.u64_field("timeout")?;
        self.info = step.strings("info");
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        self.executor.kind()
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    pub fn retry_if(&self) -> &[String] {
        &self.retry_if
    }

    /// Seconds between attempts.
    pub fn delay(&self) -> u64 {
        self.delay
    }

    /// Seconds; zero runs the executor inline.
    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    pub fn info(&self) -> &[String] {
        &self.info
    }

    pub fn zero_value_result(&self) -> Option<Value> {
        self.executor.zero_value_result()
    }

    pub fn default_assertions(&self) -> Option<Vec<Assertion>> {
        self.executor.default_assertions()
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    pub async fn setup(
        &self,
        ctx: RunContext,
        vars: &Vars,
    ) -> Result<RunContext> {
        self.executor.setup(ctx, vars).await
    }

    pub async fn tear_down(&self, ctx: &RunContext) -> Result<()> {
        self.executor.tear_down(ctx).await
    }

    pub async fn run(
        &self,
        ctx: RunContext,
        step: TestStep,
    ) -> Result<Option<Value>> {
        self.executor.run(ctx, step).await
    }
}

/// Executors available to the engine, keyed by step `type`.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.executors.keys().collect();
        kinds.sort();
        f.debug_struct("ExecutorRegistry").field("kinds", &kinds).finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `exec` and `http` executors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExecExecutor::new()));
        registry.register(Arc::new(HttpExecutor::new()));
        registry
    }

    /// Register (or replace) the executor for its `kind()`.
    pub fn register(&mut self, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(executor.kind().to_string(), executor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(kind).cloned()
    }

    /// Build the runner for an interpolated step.
    pub fn resolve(&self, step: &TestStep) -> EngineResult<ExecutorRunner> {
        let kind = step.kind().unwrap_or(DEFAULT_EXECUTOR);
        let executor = self.get(kind).ok_or_else(|| {
            EngineError::ExecutorResolution(format!(
                "type '{kind}' is not implemented"
            ))
        })?;
        ExecutorRunner::new(executor, kind).with_step_policy(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        fn kind(&self) -> &str {
            "noop"
        }

        async fn run(
            &self,
            _ctx: RunContext,
            _step: TestStep,
        ) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    #[test]
    fn test_resolve_reads_step_policy() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Noop));
        let text = concat!(
            r#"{"type":"noop","retry":"3","delay":2,"timeout":5,"#,
            r#""retry_if":["x == 1"],"info":"hi"}"#,
        );
        let step = TestStep::parse(text, 0).unwrap();

        let runner = registry.resolve(&step).unwrap();
        assert_eq!(runner.name(), "noop");
        assert_eq!(runner.retry(), 3);
        assert_eq!(runner.delay(), 2);
        assert_eq!(runner.timeout(), 5);
        assert_eq!(runner.retry_if(), ["x == 1".to_string()]);
        assert_eq!(runner.info(), ["hi".to_string()]);
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = ExecutorRegistry::new();
        let step = TestStep::parse(r#"{"type":"ldap"}"#, 0).unwrap();
        let err = registry.resolve(&step).unwrap_err();
        assert!(matches!(err, EngineError::ExecutorResolution(_)));
    }

    #[test]
    fn test_resolve_defaults_to_exec() {
        let registry = ExecutorRegistry::with_builtins();
        let step = TestStep::parse(r#"{"script":"true"}"#, 0).unwrap();
        let runner = registry.resolve(&step).unwrap();
        assert_eq!(runner.kind(), "exec");
    }
}
