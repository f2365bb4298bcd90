//! Test execution entry points.
//!
//! Suite orchestration lives in [`crate::testsuite`], the per-case state
//! machine in [`crate::testcase`] and the retry/timeout loop of a single
//! step in [`crate::teststep`]; all of them are `impl` blocks on
//! [`DefaultTestRunner`].

use crate::config::RunConfig;
use crate::executor::ExecutorRegistry;
use crate::model::{Status, TestSuite, Tests};
use crate::vars::Vars;
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Test runner trait
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Execute a test suite and return it with statuses and results filled
    /// in.
    async fn run(&self, suite: TestSuite) -> TestSuite;
}

/// Default test runner
#[derive(Debug)]
pub struct DefaultTestRunner {
    pub(crate) registry: ExecutorRegistry,
    pub(crate) config: RunConfig,
    pub(crate) initial_vars: Vars,
}

impl DefaultTestRunner {
    /// Create a runner with the built-in executors.
    pub fn new() -> Self {
        Self::with_registry(ExecutorRegistry::with_builtins())
    }

    /// Create a runner with a custom executor registry.
    pub fn with_registry(registry: ExecutorRegistry) -> Self {
        Self {
            registry,
            config: RunConfig::default(),
            initial_vars: Vars::new(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Variables injected into every suite; they override suite `vars`.
    pub fn with_initial_vars(mut self, vars: Vars) -> Self {
        self.initial_vars = vars;
        self
    }

    /// Run every suite in order and aggregate their statuses.
    pub async fn run_all(&self, suites: Vec<TestSuite>) -> Tests {
        let start = Instant::now();
        let mut tests = Tests::default();

        for suite in suites {
            let suite = self.run(suite).await;
            match suite.status {
                Status::Fail => tests.nb_testsuites_fail += 1,
                Status::Skip => tests.nb_testsuites_skip += 1,
                Status::Pass => tests.nb_testsuites_pass += 1,
                Status::Run => {}
            }
            tests.test_suites.push(suite);
        }

        tests.status = if tests.nb_testsuites_fail > 0 {
            Status::Fail
        } else if tests.nb_testsuites_skip > 0
            && tests.nb_testsuites_skip == tests.test_suites.len()
        {
            Status::Skip
        } else {
            Status::Pass
        };
        tests.duration = start.elapsed().as_secs_f64();

        info!(
            "Ran {} testsuite(s): {} passed, {} failed, {} skipped",
            tests.test_suites.len(),
            tests.nb_testsuites_pass,
            tests.nb_testsuites_fail,
            tests.nb_testsuites_skip
        );
        tests
    }
}

impl Default for DefaultTestRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestRunner for DefaultTestRunner {
    async fn run(&self, suite: TestSuite) -> TestSuite {
        self.run_test_suite(suite).await
    }
}
