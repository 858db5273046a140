use crate::{ChartError, SandboxCall, SandboxSession, ScriptSources, run_typed, run_typed_with_timeout};
use serde::{Deserialize, Serialize};

pub const LOAD_SCRIPT_CALL: &str = "load_script";
pub const DISCOVER_CATALOG_CALL: &str = "discover_catalog";

const LOAD_SCRIPT_FN: &str = r#"
async function (src) {
    return await new Promise((resolve) => {
        const script = document.createElement('script');
        script.src = src;
        script.onload = () => resolve({ status: 'loaded' });
        script.onerror = () => resolve({ status: 'failed', reason: `failed to load ${src}` });
        document.head.appendChild(script);
    });
}
"#;

const DISCOVER_CATALOG_FN: &str = r#"
function (coreGlobal, catalogGlobal) {
    const core = window[coreGlobal];
    const catalog = window[catalogGlobal];
    return {
        core: core !== undefined && core !== null,
        catalog: catalog !== undefined && catalog !== null,
        chartKinds: catalog ? Object.keys(catalog) : [],
    };
}
"#;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScriptLoadOutcome {
    Loaded,
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDiscovery {
    pub core: bool,
    pub catalog: bool,
    pub chart_kinds: Vec<String>,
}

/// Handle to the charting runtime once both bundles are live in a session.
///
/// The bridge resolves the core and catalog through the global names held here
/// instead of assuming them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartCatalog {
    pub core_global: String,
    pub catalog_global: String,
    pub chart_kinds: Vec<String>,
}

impl ChartCatalog {
    pub fn supports(&self, chart_kind: &str) -> bool {
        self.chart_kinds.iter().any(|kind| kind == chart_kind)
    }

    pub fn require(&self, chart_kind: &str) -> Result<(), ChartError> {
        if self.supports(chart_kind) {
            return Ok(());
        }
        Err(ChartError::UnknownChartKind {
            kind: chart_kind.to_string(),
            available: self.chart_kinds.clone(),
        })
    }
}

/// Appends a `<script src>` to the sandbox document and waits for it to load.
pub async fn load_script(
    session: &mut dyn SandboxSession,
    src: &str,
    timeout_ms: u64,
) -> Result<(), ChartError> {
    let call = SandboxCall::new(LOAD_SCRIPT_CALL, LOAD_SCRIPT_FN).arg(src)?;
    let outcome: ScriptLoadOutcome =
        run_typed_with_timeout(session, &call, &format!("loading script '{src}'"), timeout_ms)
            .await?;
    match outcome {
        ScriptLoadOutcome::Loaded => {
            tracing::debug!(src, "script loaded");
            Ok(())
        }
        ScriptLoadOutcome::Failed { reason } => Err(ChartError::ScriptLoad {
            src: src.to_string(),
            reason,
        }),
    }
}

/// Loads the core bundle, then the catalog bundle (which needs the core's globals),
/// and returns the capability handle.
pub async fn inject_chart_runtime(
    session: &mut dyn SandboxSession,
    sources: &ScriptSources,
) -> Result<ChartCatalog, ChartError> {
    load_script(session, &sources.core_url, sources.load_timeout_ms).await?;
    load_script(session, &sources.catalog_url, sources.load_timeout_ms).await?;

    let call = SandboxCall::new(DISCOVER_CATALOG_CALL, DISCOVER_CATALOG_FN)
        .arg(&sources.core_global)?
        .arg(&sources.catalog_global)?;
    let discovery: CatalogDiscovery = run_typed(session, &call).await?;
    if !discovery.core {
        return Err(ChartError::ScriptLoad {
            src: sources.core_url.clone(),
            reason: format!("global '{}' is not defined after load", sources.core_global),
        });
    }
    if !discovery.catalog {
        return Err(ChartError::ScriptLoad {
            src: sources.catalog_url.clone(),
            reason: format!(
                "global '{}' is not defined after load",
                sources.catalog_global
            ),
        });
    }

    tracing::info!(chart_kinds = discovery.chart_kinds.len(), "chart runtime injected");
    Ok(ChartCatalog {
        core_global: sources.core_global.clone(),
        catalog_global: sources.catalog_global.clone(),
        chart_kinds: discovery.chart_kinds,
    })
}
