//! Headless Chrome backend for [`SandboxLauncher`], driven over CDP by `chromiumoxide`.

use crate::{ChartError, SandboxCall, SandboxConfig, SandboxLauncher, SandboxSession, sandbox_document};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EvaluateParams, EventConsoleApiCalled, EventExceptionThrown,
    RemoteObject,
};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;

const BROWSER_EXIT_WAIT_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, Default)]
pub struct ChromeLauncher;

#[async_trait]
impl SandboxLauncher for ChromeLauncher {
    async fn acquire(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxSession>, ChartError> {
        let browser_config = browser_config(config)?;
        let (browser, mut handler) = tokio::time::timeout(
            Duration::from_millis(config.launch_timeout_ms),
            Browser::launch(browser_config),
        )
        .await
        .map_err(|_| ChartError::Timeout {
            operation: "browser launch".to_string(),
            after_ms: config.launch_timeout_ms,
        })?
        .map_err(|error| ChartError::Sandbox(format!("failed to launch browser: {error}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    tracing::debug!(error = %error, "CDP handler error");
                }
            }
        });

        let mut session = ChromeSession {
            browser: Some(browser),
            handler_task: Some(handler_task),
            page: None,
            forwarders: Vec::new(),
            request_timeout_ms: config.request_timeout_ms,
            released: false,
        };
        if let Err(error) = session.open_page().await {
            if let Err(release_error) = session.release().await {
                tracing::warn!(error = %release_error, "failed to release browser after setup error");
            }
            return Err(error);
        }
        tracing::debug!(headed = config.headed, "sandbox session acquired");
        Ok(Box::new(session))
    }
}

fn browser_config(config: &SandboxConfig) -> Result<BrowserConfig, ChartError> {
    let mut builder = BrowserConfig::builder()
        .window_size(config.window_width, config.window_height)
        .request_timeout(Duration::from_millis(config.request_timeout_ms));
    if config.headed {
        builder = builder.with_head();
    }
    if config.no_sandbox {
        builder = builder.no_sandbox();
    }
    if let Some(executable) = config.chrome_executable.as_ref() {
        builder = builder.chrome_executable(executable);
    }
    builder
        .build()
        .map_err(|error| ChartError::Sandbox(format!("invalid browser configuration: {error}")))
}

pub struct ChromeSession {
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    page: Option<Page>,
    forwarders: Vec<JoinHandle<()>>,
    request_timeout_ms: u64,
    released: bool,
}

impl ChromeSession {
    async fn open_page(&mut self) -> Result<(), ChartError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ChartError::Sandbox("browser is not running".to_string()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|error| ChartError::Sandbox(format!("failed to open page: {error}")))?;

        let mut console = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|error| ChartError::Sandbox(format!("console listener: {error}")))?;
        self.forwarders.push(tokio::spawn(async move {
            while let Some(event) = console.next().await {
                forward_console(&event);
            }
        }));

        let mut exceptions = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(|error| ChartError::Sandbox(format!("exception listener: {error}")))?;
        self.forwarders.push(tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let message = details
                    .exception
                    .as_ref()
                    .map(remote_object_text)
                    .unwrap_or_else(|| details.text.clone());
                tracing::error!(
                    target: "chartpress::sandbox",
                    line = details.line_number,
                    column = details.column_number,
                    "page error: {message}"
                );
            }
        }));

        page.set_content(sandbox_document())
            .await
            .map_err(|error| ChartError::Sandbox(format!("failed to set page content: {error}")))?;
        self.page = Some(page);
        Ok(())
    }
}

#[async_trait]
impl SandboxSession for ChromeSession {
    async fn run_in_sandbox(&mut self, call: &SandboxCall) -> Result<Value, ChartError> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| ChartError::Sandbox("sandbox session is not open".to_string()))?;
        let params = EvaluateParams::builder()
            .expression(call.to_expression()?)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ChartError::Sandbox)?;
        let result = page
            .evaluate_expression(params)
            .await
            .map_err(|error| evaluate_error(&call.label, error, self.request_timeout_ms))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn release(&mut self) -> Result<(), ChartError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        for task in self.forwarders.drain(..) {
            task.abort();
        }
        self.page = None;

        let mut outcome = Ok(());
        if let Some(mut browser) = self.browser.take() {
            match browser.close().await {
                Ok(_) => {
                    let wait = tokio::time::timeout(
                        Duration::from_millis(BROWSER_EXIT_WAIT_MS),
                        browser.wait(),
                    )
                    .await;
                    if !matches!(wait, Ok(Ok(_))) {
                        tracing::warn!("browser did not exit cleanly after close");
                    }
                }
                Err(error) => {
                    outcome = Err(ChartError::Sandbox(format!(
                        "failed to close browser: {error}"
                    )));
                }
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        tracing::debug!("sandbox session released");
        outcome
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

/// The CDP handler evicts requests older than the browser's request timeout; that
/// eviction is a timeout of the call, not a sandbox fault.
fn evaluate_error(label: &str, error: CdpError, request_timeout_ms: u64) -> ChartError {
    match error {
        CdpError::Timeout => ChartError::Timeout {
            operation: format!("sandbox call '{label}'"),
            after_ms: request_timeout_ms,
        },
        other => ChartError::Sandbox(format!("'{label}' failed: {other}")),
    }
}

fn forward_console(event: &EventConsoleApiCalled) {
    let text = event
        .args
        .iter()
        .map(remote_object_text)
        .collect::<Vec<_>>()
        .join(" ");
    match event.r#type {
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => {
            tracing::error!(target: "chartpress::sandbox", "console: {text}");
        }
        ConsoleApiCalledType::Warning => {
            tracing::warn!(target: "chartpress::sandbox", "console: {text}");
        }
        ConsoleApiCalledType::Debug => {
            tracing::debug!(target: "chartpress::sandbox", "console: {text}");
        }
        _ => {
            tracing::info!(target: "chartpress::sandbox", "console: {text}");
        }
    }
}

fn remote_object_text(object: &RemoteObject) -> String {
    match object.value.as_ref() {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => object
            .description
            .clone()
            .unwrap_or_else(|| format!("{:?}", object.r#type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicted_cdp_request_expected_timeout_error() {
        let error = evaluate_error("load_script", CdpError::Timeout, 95_000);

        assert!(matches!(
            error,
            ChartError::Timeout {
                ref operation,
                after_ms: 95_000
            } if operation.contains("load_script")
        ));
        assert_eq!(error.exit_code(), 6);
    }

    #[test]
    fn other_cdp_error_expected_sandbox_error_with_label() {
        let error = evaluate_error("render_chart", CdpError::NotFound, 30_000);

        assert!(matches!(
            error,
            ChartError::Sandbox(ref reason) if reason.starts_with("'render_chart' failed")
        ));
    }
}
