//! Declarative integration-test execution engine.
//!
//! A [`TestSuite`] is a YAML document of test cases, each an ordered list of
//! steps. Steps are rendered against a [`Vars`] bag, dispatched to an
//! [`Executor`] chosen by their `type`, retried and timed out per step
//! policy, checked against CEL assertions, and their outputs exported to
//! later steps and cases.

pub mod analysis;
pub mod assertion;
pub mod assign;
pub mod config;
pub mod error;
pub mod executor;
pub mod executors;
pub mod expression;
pub mod model;
pub mod range;
pub mod runner;
pub mod template;
pub mod testcase;
pub mod testsuite;
pub mod teststep;
pub mod vars;

pub use analysis::SuiteVariables;
pub use config::*;
pub use error::{EngineError, EngineResult};
pub use executor::{Executor, ExecutorRegistry, ExecutorRunner, RunContext};
pub use model::*;
pub use runner::*;
pub use vars::Vars;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
