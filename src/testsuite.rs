//! Suite orchestration and status rollup.

use crate::model::{Status, TestCase, TestSuite};
use crate::runner::DefaultTestRunner;
use crate::vars::Vars;
use chrono::Utc;
use tracing::{info, instrument, warn};

pub const VAR_TESTSUITE_NAME: &str = "tauon.testsuite.name";
pub const VAR_TESTSUITE_FILENAME: &str = "tauon.testsuite.filename";

impl DefaultTestRunner {
    /// Run every case of `suite` in order and roll up its status.
    #[instrument(skip_all, fields(testsuite = %suite.name))]
    pub async fn run_test_suite(&self, mut suite: TestSuite) -> TestSuite {
        info!("Starting testsuite");
        let start = Utc::now();
        suite.start = Some(start);
        suite.status = Status::Run;

        let mut vars = Vars::from(suite.vars.clone());
        vars.add(VAR_TESTSUITE_NAME, suite.name.clone());
        vars.add(VAR_TESTSUITE_FILENAME, suite.filename.clone());
        vars.add_all(&self.initial_vars);

        self.run_test_cases(&mut suite, &vars).await;

        let end = Utc::now();
        suite.end = Some(end);
        suite.duration = (end - start).num_milliseconds() as f64 / 1000.0;
        rollup_suite(&mut suite);

        info!(
            "Ending testsuite: {} ({} passed, {} failed, {} skipped)",
            suite.status,
            suite.nb_testcases_pass,
            suite.nb_testcases_fail,
            suite.nb_testcases_skip
        );
        suite
    }

    async fn run_test_cases(&self, suite: &mut TestSuite, vars: &Vars) {
        let suite_name = suite.name.clone();
        let mut previous_vars = vars.clone();

        for tc in suite.testcases.iter_mut() {
            let start = Utc::now();
            tc.start = Some(start);

            let exported =
                self.run_test_case(&suite_name, tc, &previous_vars).await;
            previous_vars.add_all_with_prefix(&tc.name, &exported);

            let end = Utc::now();
            tc.end = Some(end);
            tc.duration = (end - start).num_milliseconds() as f64 / 1000.0;
            rollup_case(tc);
            info!("Testcase {:?}: {}", tc.original_name, tc.status);

            let has_errors = tc.results.iter().any(|r| !r.errors.is_empty());
            if self.config.stop_on_failure && has_errors {
                warn!(
                    "Stopping testsuite after failure of {:?}",
                    tc.original_name
                );
                break;
            }
        }
    }
}

/// Derive a case status from its step results.
///
/// Any failed step fails the case; a case whose results are all skipped
/// (or that has none) is skipped; otherwise it passes.
pub fn rollup_case(tc: &mut TestCase) {
    let has_failure = tc.results.iter().any(|r| r.status == Status::Fail);
    let skipped = tc
        .results
        .iter()
        .filter(|r| r.status == Status::Skip)
        .count();

    tc.status = if has_failure {
        Status::Fail
    } else if skipped == tc.results.len() || tc.status == Status::Skip {
        Status::Skip
    } else {
        Status::Pass
    };
}

/// Count case statuses and derive the suite status.
pub fn rollup_suite(suite: &mut TestSuite) {
    suite.nb_testcases_pass = 0;
    suite.nb_testcases_fail = 0;
    suite.nb_testcases_skip = 0;
    for tc in &suite.testcases {
        match tc.status {
            Status::Pass => suite.nb_testcases_pass += 1,
            Status::Fail => suite.nb_testcases_fail += 1,
            Status::Skip => suite.nb_testcases_skip += 1,
            Status::Run => {}
        }
    }

    suite.status = if suite.nb_testcases_fail > 0 {
        Status::Fail
    } else if suite.nb_testcases_skip > 0
        && suite.nb_testcases_skip == suite.testcases.len()
    {
        Status::Skip
    } else {
        Status::Pass
    };
}
