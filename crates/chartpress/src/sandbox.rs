//! The process/page boundary.
//!
//! A [`SandboxSession`] is one isolated page. The only way code or data crosses
//! into it is a [`SandboxCall`]: the source of a JavaScript function plus JSON
//! arguments. The function runs inside the page and its (JSON) result comes back.
//! Nothing from the host is captured by the function; closures, object handles and
//! DOM nodes never cross.

use crate::{ChartError, SandboxConfig};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

pub const CHART_CONTAINER_ID: &str = "chart";

/// Minimal page every session starts from: one empty chart container.
pub fn sandbox_document() -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    <meta charset=\"utf-8\">\n    <title>chartpress</title>\n  </head>\n  <body>\n    <div id=\"{CHART_CONTAINER_ID}\"></div>\n  </body>\n</html>\n"
    )
}

/// A function to execute inside the sandbox with serializable arguments.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SandboxCall {
    /// Short name used in logs and by test doubles to identify the call.
    pub label: String,
    /// JavaScript function source, e.g. `async function (src) { ... }`.
    pub function: String,
    pub args: Vec<Value>,
}

impl SandboxCall {
    pub fn new(label: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Serialize) -> Result<Self, ChartError> {
        let value = serde_json::to_value(value).map_err(|error| {
            ChartError::Sandbox(format!(
                "argument for '{}' is not serializable: {error}",
                self.label
            ))
        })?;
        self.args.push(value);
        Ok(self)
    }

    /// Expression that applies the function to its arguments.
    ///
    /// Arguments are embedded as a JSON array literal, which is valid JavaScript.
    pub fn to_expression(&self) -> Result<String, ChartError> {
        let args = serde_json::to_string(&self.args).map_err(|error| {
            ChartError::Sandbox(format!(
                "arguments for '{}' are not serializable: {error}",
                self.label
            ))
        })?;
        Ok(format!("({}).apply(null, {args})", self.function.trim()))
    }
}

/// One live page. Must be released exactly once; `release` is idempotent.
#[async_trait]
pub trait SandboxSession: Send {
    async fn run_in_sandbox(&mut self, call: &SandboxCall) -> Result<Value, ChartError>;

    async fn release(&mut self) -> Result<(), ChartError>;

    fn is_released(&self) -> bool;
}

#[async_trait]
pub trait SandboxLauncher: Send + Sync {
    async fn acquire(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxSession>, ChartError>;
}

/// Runs `call` and deserializes its result.
pub async fn run_typed<T: DeserializeOwned>(
    session: &mut dyn SandboxSession,
    call: &SandboxCall,
) -> Result<T, ChartError> {
    let value = session.run_in_sandbox(call).await?;
    serde_json::from_value(value).map_err(|error| {
        ChartError::Sandbox(format!(
            "'{}' returned an unexpected result: {error}",
            call.label
        ))
    })
}

/// Like [`run_typed`], bounded by `timeout_ms`. The in-page work is not cancelled
/// on timeout; releasing the session tears it down.
pub async fn run_typed_with_timeout<T: DeserializeOwned>(
    session: &mut dyn SandboxSession,
    call: &SandboxCall,
    operation: &str,
    timeout_ms: u64,
) -> Result<T, ChartError> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), run_typed(session, call)).await
    {
        Ok(result) => result,
        Err(_) => Err(ChartError::Timeout {
            operation: operation.to_string(),
            after_ms: timeout_ms,
        }),
    }
}
