//! `http`: sends one HTTP request.

use crate::executor::{Executor, RunContext};
use crate::model::TestStep;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, instrument};

#[derive(Debug)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create an executor with a custom client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn string_map(step: &TestStep, key: &str) -> HashMap<String, String> {
        step.get(key)
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), v)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn kind(&self) -> &str {
        "http"
    }

    fn zero_value_result(&self) -> Option<Value> {
        Some(json!({
            "statuscode": 0,
            "headers": {},
            "body": "",
            "bodyjson": {},
            "timeseconds": 0.0,
        }))
    }

    #[instrument(skip(self, ctx, step), fields(testcase = %ctx.testcase))]
    async fn run(
        &self,
        ctx: RunContext,
        step: TestStep,
    ) -> Result<Option<Value>> {
        let url = step
            .str_field("url")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("http step requires an url"))?;
        let method = step.str_field("method").unwrap_or("GET").to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .with_context(|| format!("invalid http method: {method}"))?;

        let mut req_builder = self.client.request(method, url);

        for (name, value) in Self::string_map(&step, "headers") {
            req_builder = req_builder.header(name, value);
        }

        let query = Self::string_map(&step, "query");
        if !query.is_empty() {
            req_builder = req_builder.query(&query);
        }

        match step.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(body)) => {
                req_builder = req_builder.body(body.clone());
            }
            Some(body) => {
                req_builder = req_builder
                    .header("Content-Type", "application/json")
                    .body(serde_json::to_string(body)?);
            }
        }

        debug!("Sending request to {}", url);
        let start = Instant::now();
        let response = req_builder
            .send()
            .await
            .context("Failed to send request")?;
        let status = response.status().as_u16();
        debug!("Received response with status: {}", status);

        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    Value::String(value.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        let mut result = Map::new();
        result.insert("statuscode".into(), json!(status));
        result.insert("headers".into(), Value::Object(headers));
        if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
            result.insert("bodyjson".into(), parsed);
        }
        result.insert("body".into(), Value::String(body));
        let elapsed = start.elapsed().as_secs_f64();
        result.insert("timeseconds".into(), json!(elapsed));

        Ok(Some(Value::Object(result)))
    }
}
