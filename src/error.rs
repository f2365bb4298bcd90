//! Engine error kinds.
//!
//! Errors that end a test case are recorded on the step result that was
//! being processed. Timeouts and executor failures only fail the current
//! attempt.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed placeholder syntax.
    #[error("template error: {0}")]
    Template(String),

    /// Unsupported or empty `range` expression.
    #[error("unable to parse range expression: {0}")]
    Range(String),

    /// The conditional evaluator failed on a `skip` or `retry_if` entry.
    #[error("unable to evaluate conditions: {0}")]
    SkipEvaluation(String),

    /// Unknown executor type or invalid executor policy on the step.
    #[error("unable to get executor: {0}")]
    ExecutorResolution(String),

    /// Executor setup or teardown hook failed.
    #[error("executor {name} lifecycle error: {message}")]
    Setup { name: String, message: String },

    #[error("Timeout after {seconds} second(s)")]
    Timeout { seconds: u64 },

    /// Assignment source missing and no default declared.
    #[error("{from} reference not found in {available}")]
    ReferenceNotFound { from: String, available: String },

    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    /// Interpolated step text is not a valid step record.
    #[error("unable to parse step #{number}: {message}")]
    StepParse { number: usize, message: String },

    /// Failure reported by the executor itself.
    #[error("{0}")]
    Executor(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_carries_seconds() {
        let err = EngineError::Timeout { seconds: 3 };
        assert_eq!(err.to_string(), "Timeout after 3 second(s)");
    }

    #[test]
    fn test_reference_not_found_message() {
        let err = EngineError::ReferenceNotFound {
            from: "result.body".into(),
            available: "a\nb".into(),
        };
        assert!(err.to_string().starts_with("result.body reference not found"));
    }
}
