//! tauon CLI - runs YAML test suites.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use tauon::{
    read_initial_variables, DefaultTestRunner, RunConfig, Status,
    TestConfigManager, TestSuite, Tests,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// tauon - declarative integration test runner.
#[derive(Parser, Debug)]
#[command(name = "tauon", version, about)]
struct Cli {
    /// Suite file or directory path.
    #[arg(short = 'p', long = "path")]
    test_path: Option<String>,

    /// Filter suites by name (partial match).
    #[arg(short = 'f', long = "filter")]
    test_filter: Option<String>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Initial variable, `name=value`. Repeatable.
    #[arg(long = "var")]
    vars: Vec<String>,

    /// YAML file of initial variables. Repeatable.
    #[arg(long = "var-from-file")]
    var_files: Vec<PathBuf>,

    /// Stop a suite after its first failing test case.
    #[arg(long = "stop-on-failure", env = "TAUON_STOP_ON_FAILURE")]
    stop_on_failure: bool,

    /// Directory to save test report files.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<String>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Yaml,
    Text,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn colored(status: Status) -> String {
    match status {
        Status::Pass => format!("\x1b[32m{status}\x1b[0m"),
        Status::Fail => format!("\x1b[31m{status}\x1b[0m"),
        Status::Skip => format!("\x1b[33m{status}\x1b[0m"),
        Status::Run => status.to_string(),
    }
}

fn print_suite_result(suite: &TestSuite, verbose: bool) {
    info!(
        "{} testsuite: {} ({:.3} s)",
        colored(suite.status),
        suite.name,
        suite.duration
    );

    for tc in &suite.testcases {
        info!(
            "  {} {} ({:.3} s)",
            colored(tc.status),
            tc.original_name,
            tc.duration
        );
        for reason in &tc.skipped {
            info!("     {}", reason);
        }

        for step in &tc.results {
            if verbose || step.status == Status::Fail {
                info!(
                    "    #{}-{} {} {} (attempts: {})",
                    step.number,
                    step.range_index,
                    colored(step.status),
                    step.name,
                    step.retries
                );
            }
            for failure in &step.errors {
                error!("       \x1b[31m{}\x1b[0m", failure.value);
            }
            if verbose {
                for line in &step.computed_info {
                    debug!("       info: {}", line);
                }
                if !step.systemout.is_empty() {
                    debug!("       systemout: {}", truncate(&step.systemout));
                }
                if !step.systemerr.is_empty() {
                    debug!("       systemerr: {}", truncate(&step.systemerr));
                }
            }
        }
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(500) {
        Some((idx, _)) => format!("{}...(truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

fn save_test_report(
    tests: &Tests,
    report_dir: &Path,
    format: ReportFormat,
) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();

    let (filename, content) = match format {
        ReportFormat::Json => (
            format!("tauon-{timestamp}.json"),
            serde_json::to_string_pretty(tests)?,
        ),
        ReportFormat::Yaml => (
            format!("tauon-{timestamp}.yaml"),
            serde_yaml::to_string(tests)?,
        ),
        ReportFormat::Text => {
            let mut content = String::new();
            content.push_str(&format!("Status: {}\n", tests.status));
            content.push_str(&format!("Duration: {:.3} s\n\n", tests.duration));
            for suite in &tests.test_suites {
                content.push_str(&format!(
                    "Testsuite: {} ({})\n",
                    suite.name, suite.status
                ));
                for tc in &suite.testcases {
                    content.push_str(&format!(
                        "  {} ({})\n",
                        tc.original_name, tc.status
                    ));
                    for step in &tc.results {
                        content.push_str(&format!(
                            "    #{}-{} {} ({})\n",
                            step.number,
                            step.range_index,
                            step.name,
                            step.status
                        ));
                        for failure in &step.errors {
                            content.push_str(&format!(
                                "       Error: {}\n",
                                failure.value
                            ));
                        }
                    }
                }
            }
            (format!("tauon-{timestamp}.txt"), content)
        }
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)?;
    file.write_all(content.as_bytes())?;

    Ok(file_path)
}

fn prepare_suites(
    test_path: Option<String>,
    filter: Option<&str>,
) -> Result<Vec<TestSuite>> {
    let mut config = TestConfigManager::new();
    config.add_path(".");

    let suites = match test_path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(anyhow!("Path does not exist: {}", path.display()));
            }
            if path.is_file() {
                let suite = config.load_suite(&path).with_context(|| {
                    format!("Failed to load testsuite: {}", path.display())
                })?;
                vec![suite]
            } else {
                config.load_suites_from_dir(&path).with_context(|| {
                    format!(
                        "Failed to load testsuites from directory: {}",
                        path.display()
                    )
                })?
            }
        }
        None => config.load_all_suites()?,
    };

    if suites.is_empty() {
        return Err(anyhow!("No testsuites found"));
    }

    let suites: Vec<TestSuite> = match filter {
        Some(filter) => {
            let filter = filter.to_lowercase();
            suites
                .into_iter()
                .filter(|s| s.name.to_lowercase().contains(&filter))
                .collect()
        }
        None => suites,
    };

    if suites.is_empty() {
        return Err(anyhow!("No testsuites matching the filter were found"));
    }

    Ok(suites)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let suites = prepare_suites(args.test_path, args.test_filter.as_deref())?;
    let initial_vars = read_initial_variables(
        &args.vars,
        &args.var_files,
        std::env::vars(),
    )?;

    let runner = DefaultTestRunner::new()
        .with_config(RunConfig {
            stop_on_failure: args.stop_on_failure,
            verbose: args.verbose,
        })
        .with_initial_vars(initial_vars);

    for suite in &suites {
        match runner.parse_test_suite(suite) {
            Ok(vars) if !vars.unresolved.is_empty() => warn!(
                "Testsuite {:?} uses undefined variables: {}",
                suite.name,
                vars.unresolved.join(", ")
            ),
            Ok(vars) => debug!(
                "Testsuite {:?} extracts: {:?}",
                suite.name, vars.extracted
            ),
            Err(e) => {
                warn!("Unable to analyse testsuite {:?}: {}", suite.name, e)
            }
        }
    }

    info!("Running {} testsuite(s)...", suites.len());
    let tests = runner.run_all(suites).await;

    for suite in &tests.test_suites {
        print_suite_result(suite, args.verbose);
    }

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \
         \x1b[31mFailed: {}\x1b[0m\n  Skipped: {}\n  Duration: {:.3} s",
        tests.test_suites.len(),
        tests.nb_testsuites_pass,
        tests.nb_testsuites_fail,
        tests.nb_testsuites_skip,
        tests.duration
    );

    if let Some(dir) = args.report_dir.map(PathBuf::from) {
        match save_test_report(&tests, &dir, args.report_format) {
            Ok(path) => info!("Report saved: {}", path.display()),
            Err(e) => error!("Failed to save report: {}", e),
        }
    }

    if tests.status == Status::Fail {
        exit(1);
    }

    Ok(())
}
