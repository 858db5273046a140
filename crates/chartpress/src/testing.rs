//! In-process stand-in for the browser sandbox.
//!
//! [`ScriptedSandbox`] answers the calls the injector and bridge make without a
//! browser, records acquire/call/release order, and can be told to fail or hang at
//! any stage.

use crate::{
    ChartError, LOAD_SCRIPT_CALL, DISCOVER_CATALOG_CALL, RENDER_CHART_CALL, RenderingResult,
    SandboxCall, SandboxConfig, SandboxLauncher, SandboxSession,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SandboxLogEntry {
    Acquired,
    CallStarted { label: String, detail: String },
    CallFinished { label: String, detail: String },
    Released,
}

impl SandboxLogEntry {
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::CallStarted { label, .. } | Self::CallFinished { label, .. } => Some(label),
            Self::Acquired | Self::Released => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::CallStarted { detail, .. } | Self::CallFinished { detail, .. } => Some(detail),
            Self::Acquired | Self::Released => None,
        }
    }
}

#[derive(Clone, Debug)]
enum ScriptBehavior {
    Fail(String),
    Hang,
}

#[derive(Clone, Debug)]
struct ScriptedPlan {
    fail_acquire: Option<String>,
    scripts: BTreeMap<String, ScriptBehavior>,
    core_global: bool,
    catalog_global: bool,
    chart_kinds: Vec<String>,
    render_result: Option<RenderingResult>,
    hang_render: bool,
    fail_release: Option<String>,
}

impl Default for ScriptedPlan {
    fn default() -> Self {
        Self {
            fail_acquire: None,
            scripts: BTreeMap::new(),
            core_global: true,
            catalog_global: true,
            chart_kinds: vec!["beeswarm".to_string(), "bubblechart".to_string()],
            render_result: None,
            hang_render: false,
            fail_release: None,
        }
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    acquire_count: usize,
    acquired_with: Option<SandboxConfig>,
    release_count: usize,
    log: Vec<SandboxLogEntry>,
    render_requests: Vec<Value>,
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedSandbox {
    plan: Arc<ScriptedPlan>,
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_plan(mut self, edit: impl FnOnce(&mut ScriptedPlan)) -> Self {
        edit(Arc::make_mut(&mut self.plan));
        self
    }

    pub fn fail_acquire(self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.with_plan(|plan| plan.fail_acquire = Some(reason))
    }

    /// Makes loading `src` report a failed load with `reason`.
    pub fn fail_script(self, src: impl Into<String>, reason: impl Into<String>) -> Self {
        let (src, reason) = (src.into(), reason.into());
        self.with_plan(|plan| {
            plan.scripts.insert(src, ScriptBehavior::Fail(reason));
        })
    }

    /// Makes loading `src` never settle.
    pub fn hang_script(self, src: impl Into<String>) -> Self {
        let src = src.into();
        self.with_plan(|plan| {
            plan.scripts.insert(src, ScriptBehavior::Hang);
        })
    }

    pub fn without_core_global(self) -> Self {
        self.with_plan(|plan| plan.core_global = false)
    }

    pub fn without_catalog_global(self) -> Self {
        self.with_plan(|plan| plan.catalog_global = false)
    }

    pub fn catalog<I, S>(self, chart_kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chart_kinds: Vec<String> = chart_kinds.into_iter().map(Into::into).collect();
        self.with_plan(|plan| plan.chart_kinds = chart_kinds)
    }

    /// Replaces the markup the fake would otherwise draw from the request data.
    pub fn render_result(self, result: RenderingResult) -> Self {
        self.with_plan(|plan| plan.render_result = Some(result))
    }

    pub fn hang_render(self) -> Self {
        self.with_plan(|plan| plan.hang_render = true)
    }

    pub fn fail_release(self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.with_plan(|plan| plan.fail_release = Some(reason))
    }

    pub fn acquire_count(&self) -> usize {
        self.lock().map(|state| state.acquire_count).unwrap_or_default()
    }

    /// Sandbox settings handed to the most recent `acquire`.
    pub fn acquired_with(&self) -> Option<SandboxConfig> {
        self.lock().ok().and_then(|state| state.acquired_with.clone())
    }

    pub fn release_count(&self) -> usize {
        self.lock().map(|state| state.release_count).unwrap_or_default()
    }

    pub fn log(&self) -> Vec<SandboxLogEntry> {
        self.lock()
            .map(|state| state.log.clone())
            .unwrap_or_default()
    }

    /// Labels of the calls that finished, in order.
    pub fn finished_calls(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                SandboxLogEntry::CallFinished { label, .. } => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn last_render_request(&self) -> Option<Value> {
        self.lock()
            .ok()
            .and_then(|state| state.render_requests.last().cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ScriptedState>, ChartError> {
        self.state
            .lock()
            .map_err(|_| ChartError::Sandbox("scripted sandbox mutex poisoned".to_string()))
    }
}

#[async_trait]
impl SandboxLauncher for ScriptedSandbox {
    async fn acquire(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxSession>, ChartError> {
        if let Some(reason) = self.plan.fail_acquire.as_ref() {
            return Err(ChartError::Sandbox(reason.clone()));
        }
        {
            let mut state = self.lock()?;
            state.acquire_count += 1;
            state.acquired_with = Some(config.clone());
            state.log.push(SandboxLogEntry::Acquired);
        }
        Ok(Box::new(ScriptedSession {
            sandbox: self.clone(),
            released: false,
        }))
    }
}

struct ScriptedSession {
    sandbox: ScriptedSandbox,
    released: bool,
}

enum Reply {
    Ready(Value),
    Hang,
}

impl ScriptedSession {
    fn reply(&self, call: &SandboxCall) -> Result<Reply, ChartError> {
        let plan = &self.sandbox.plan;
        match call.label.as_str() {
            LOAD_SCRIPT_CALL => {
                let src = first_arg_text(call);
                Ok(match plan.scripts.get(&src) {
                    Some(ScriptBehavior::Fail(reason)) => {
                        Reply::Ready(json!({ "status": "failed", "reason": reason }))
                    }
                    Some(ScriptBehavior::Hang) => Reply::Hang,
                    None => Reply::Ready(json!({ "status": "loaded" })),
                })
            }
            DISCOVER_CATALOG_CALL => {
                let chart_kinds = if plan.catalog_global {
                    plan.chart_kinds.clone()
                } else {
                    Vec::new()
                };
                Ok(Reply::Ready(json!({
                    "core": plan.core_global,
                    "catalog": plan.catalog_global,
                    "chartKinds": chart_kinds,
                })))
            }
            RENDER_CHART_CALL => {
                let request = call.args.first().cloned().unwrap_or(Value::Null);
                self.sandbox.lock()?.render_requests.push(request.clone());
                if plan.hang_render {
                    return Ok(Reply::Hang);
                }
                let result = plan
                    .render_result
                    .clone()
                    .unwrap_or_else(|| RenderingResult::Rendered {
                        markup: draw_markup(&request),
                    });
                serde_json::to_value(result)
                    .map(Reply::Ready)
                    .map_err(|error| ChartError::Sandbox(error.to_string()))
            }
            other => Err(ChartError::Sandbox(format!(
                "scripted sandbox has no answer for '{other}'"
            ))),
        }
    }

    fn record(&self, entry: SandboxLogEntry) -> Result<(), ChartError> {
        self.sandbox.lock()?.log.push(entry);
        Ok(())
    }
}

#[async_trait]
impl SandboxSession for ScriptedSession {
    async fn run_in_sandbox(&mut self, call: &SandboxCall) -> Result<Value, ChartError> {
        if self.released {
            return Err(ChartError::Sandbox(format!(
                "'{}' called on a released session",
                call.label
            )));
        }
        let detail = call_detail(call);
        self.record(SandboxLogEntry::CallStarted {
            label: call.label.clone(),
            detail: detail.clone(),
        })?;
        match self.reply(call)? {
            Reply::Ready(value) => {
                self.record(SandboxLogEntry::CallFinished {
                    label: call.label.clone(),
                    detail,
                })?;
                Ok(value)
            }
            Reply::Hang => std::future::pending::<Result<Value, ChartError>>().await,
        }
    }

    async fn release(&mut self) -> Result<(), ChartError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        {
            let mut state = self.sandbox.lock()?;
            state.release_count += 1;
            state.log.push(SandboxLogEntry::Released);
        }
        match self.sandbox.plan.fail_release.as_ref() {
            Some(reason) => Err(ChartError::Sandbox(reason.clone())),
            None => Ok(()),
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

fn first_arg_text(call: &SandboxCall) -> String {
    match call.args.first() {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn call_detail(call: &SandboxCall) -> String {
    if call.label == RENDER_CHART_CALL {
        return call
            .args
            .first()
            .and_then(|request| request.get("chartKind"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }
    first_arg_text(call)
}

// One circle per datum, sized by the requested options.
fn draw_markup(request: &Value) -> String {
    let options = request.get("options");
    let dimension = |name: &str, fallback: f64| {
        options
            .and_then(|options| options.get(name))
            .and_then(Value::as_f64)
            .unwrap_or(fallback)
    };
    let width = dimension("width", 800.0);
    let height = dimension("height", 600.0);
    let data_len = request
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or_default();

    let mut markup = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\"><g>"
    );
    for index in 0..data_len {
        markup.push_str(&format!("<circle cx=\"{}\" cy=\"10\" r=\"4\"></circle>", index * 10));
    }
    markup.push_str("</g></svg>");
    markup
}
