//! `exec`: runs a shell script.

use crate::executor::{Executor, RunContext};
use crate::model::{Assertion, TestStep};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ExecExecutor;

impl ExecExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ExecExecutor {
    fn kind(&self) -> &str {
        "exec"
    }

    fn zero_value_result(&self) -> Option<Value> {
        Some(json!({
            "code": 0,
            "systemout": "",
            "systemerr": "",
            "timeseconds": 0.0,
        }))
    }

    fn default_assertions(&self) -> Option<Vec<Assertion>> {
        Some(vec![Assertion::Check("result.code == 0".to_string())])
    }

    async fn run(
        &self,
        ctx: RunContext,
        step: TestStep,
    ) -> Result<Option<Value>> {
        let script = step
            .str_field("script")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("invalid command: script is empty"))?;

        debug!(testcase = %ctx.testcase, "running script: {}", script);
        let start = Instant::now();
        let output = Command::new("sh")
            .arg("-c")
            .arg(script)
            .output()
            .await
            .context("failed to spawn shell")?;

        let code = output.status.code().unwrap_or(-1);
        let systemout = String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string();
        let systemerr = String::from_utf8_lossy(&output.stderr)
            .trim_end()
            .to_string();

        Ok(Some(json!({
            "code": code,
            "systemout": systemout,
            "systemerr": systemerr,
            "timeseconds": start.elapsed().as_secs_f64(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_output() {
        let text = r#"{"script":"echo hello; echo oops >&2; exit 3"}"#;
        let step = TestStep::parse(text, 0).unwrap();
        let result = ExecExecutor::new()
            .run(RunContext::default(), step)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["code"], json!(3));
        assert_eq!(result["systemout"], json!("hello"));
        assert_eq!(result["systemerr"], json!("oops"));
    }

    #[tokio::test]
    async fn test_exec_requires_script() {
        let step = TestStep::parse(r#"{"type":"exec"}"#, 0).unwrap();
        assert!(ExecExecutor::new()
            .run(RunContext::default(), step)
            .await
            .is_err());
    }
}
