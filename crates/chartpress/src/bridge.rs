use crate::{
    CHART_CONTAINER_ID, ChartCatalog, ChartError, Record, RenderOptions, SandboxCall,
    SandboxSession, VisualMapping, run_typed,
};
use serde::{Deserialize, Serialize};

pub const RENDER_CHART_CALL: &str = "render_chart";

// Every failure inside the page is caught and reported as a `failed` result so a
// throwing chart never surfaces as an uncaught exception in the host.
const RENDER_CHART_FN: &str = r#"
function (request) {
    try {
        const container = document.getElementById(request.containerId);
        if (!container) {
            return {
                status: 'failed',
                failure: 'container_not_found',
                reason: `no element with id '${request.containerId}'`,
            };
        }
        const core = window[request.coreGlobal];
        const catalog = window[request.catalogGlobal];
        const chart = catalog ? catalog[request.chartKind] : undefined;
        if (!core || !chart) {
            return {
                status: 'failed',
                failure: 'render',
                reason: `chart '${request.chartKind}' is not available`,
            };
        }
        const viz = core.chart(chart, {
            data: request.data,
            mapping: request.mapping,
            options: request.options,
        });
        viz.renderToDOM(container);
        const svg = container.querySelector('svg');
        if (!svg) {
            return {
                status: 'failed',
                failure: 'svg_not_found',
                reason: `chart '${request.chartKind}' rendered no <svg> element`,
            };
        }
        return { status: 'rendered', markup: new XMLSerializer().serializeToString(svg) };
    } catch (error) {
        return {
            status: 'failed',
            failure: 'render',
            reason: String(error && error.message ? error.message : error),
        };
    }
}
"#;

/// Payload for the single cross-boundary render call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest<'a> {
    pub container_id: &'a str,
    pub core_global: &'a str,
    pub catalog_global: &'a str,
    pub chart_kind: &'a str,
    pub data: &'a [Record],
    pub mapping: &'a VisualMapping,
    pub options: &'a RenderOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFailure {
    ContainerNotFound,
    SvgNotFound,
    Render,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderingResult {
    Rendered { markup: String },
    Failed { failure: RenderFailure, reason: String },
}

impl RenderingResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Rendered { .. })
    }

    pub fn into_markup(self) -> Result<String, ChartError> {
        match self {
            Self::Rendered { markup } => Ok(markup),
            Self::Failed { failure, reason } => Err(match failure {
                RenderFailure::ContainerNotFound => ChartError::ContainerNotFound(reason),
                RenderFailure::SvgNotFound => ChartError::SvgNotFound(reason),
                RenderFailure::Render => ChartError::Render(reason),
            }),
        }
    }
}

/// Renders `chart_kind` into the sandbox's chart container and returns the
/// serialized `<svg>` markup, or the typed in-page failure.
///
/// `Err` is reserved for transport problems and unknown chart kinds; anything the
/// page itself reports comes back as [`RenderingResult::Failed`].
pub async fn render_chart(
    session: &mut dyn SandboxSession,
    catalog: &ChartCatalog,
    records: &[Record],
    mapping: &VisualMapping,
    options: &RenderOptions,
    chart_kind: &str,
) -> Result<RenderingResult, ChartError> {
    catalog.require(chart_kind)?;
    let request = RenderRequest {
        container_id: CHART_CONTAINER_ID,
        core_global: &catalog.core_global,
        catalog_global: &catalog.catalog_global,
        chart_kind,
        data: records,
        mapping,
        options,
    };
    let call = SandboxCall::new(RENDER_CHART_CALL, RENDER_CHART_FN).arg(&request)?;
    let result: RenderingResult = run_typed(session, &call).await?;
    match &result {
        RenderingResult::Rendered { markup } => {
            tracing::debug!(chart_kind, bytes = markup.len(), "chart rendered");
        }
        RenderingResult::Failed { failure, reason } => {
            tracing::warn!(chart_kind, ?failure, reason = %reason, "chart render failed");
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSandbox;
    use crate::{FieldValue, SandboxConfig, SandboxLauncher};
    use serde_json::json;

    fn catalog() -> ChartCatalog {
        ChartCatalog {
            core_global: "raw".to_string(),
            catalog_global: "rawcharts".to_string(),
            chart_kinds: vec!["bubblechart".to_string()],
        }
    }

    fn records() -> Vec<Record> {
        vec![
            [
                ("age", FieldValue::Number(10.0)),
                ("group", FieldValue::Text("A".to_string())),
            ]
            .into_iter()
            .collect(),
        ]
    }

    #[tokio::test(flavor = "current_thread")]
    async fn render_chart_sends_data_mapping_and_options_in_one_call() {
        let sandbox = ScriptedSandbox::new();
        let mut session = sandbox
            .acquire(&SandboxConfig::default())
            .await
            .expect("acquire should succeed");
        let mapping = VisualMapping::new().channel_field("x", "age");
        let options = RenderOptions {
            width: Some(640.0),
            ..RenderOptions::default()
        };

        let result = render_chart(
            session.as_mut(),
            &catalog(),
            &records(),
            &mapping,
            &options,
            "bubblechart",
        )
        .await
        .expect("render call should succeed");

        assert!(result.is_ok());
        let request = sandbox
            .last_render_request()
            .expect("render request should be recorded");
        assert_eq!(
            request,
            json!({
                "containerId": "chart",
                "coreGlobal": "raw",
                "catalogGlobal": "rawcharts",
                "chartKind": "bubblechart",
                "data": [{ "age": 10.0, "group": "A" }],
                "mapping": { "x": { "value": "age" } },
                "options": { "width": 640.0 }
            })
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn render_chart_unknown_kind_expected_error_before_sandbox_call() {
        let sandbox = ScriptedSandbox::new();
        let mut session = sandbox
            .acquire(&SandboxConfig::default())
            .await
            .expect("acquire should succeed");

        let error = render_chart(
            session.as_mut(),
            &catalog(),
            &records(),
            &VisualMapping::new().channel_field("x", "age"),
            &RenderOptions::default(),
            "treemap",
        )
        .await
        .expect_err("unknown kind should fail");

        assert!(matches!(error, ChartError::UnknownChartKind { .. }));
        assert!(sandbox.last_render_request().is_none());
    }

    #[test]
    fn rendering_result_failures_map_to_typed_errors() {
        let container: RenderingResult = serde_json::from_value(json!({
            "status": "failed",
            "failure": "container_not_found",
            "reason": "no element with id 'chart'"
        }))
        .expect("failure should deserialize");
        assert!(matches!(
            container.into_markup(),
            Err(ChartError::ContainerNotFound(_))
        ));

        let missing_svg = RenderingResult::Failed {
            failure: RenderFailure::SvgNotFound,
            reason: "empty".to_string(),
        };
        assert!(matches!(
            missing_svg.into_markup(),
            Err(ChartError::SvgNotFound(_))
        ));

        let thrown = RenderingResult::Failed {
            failure: RenderFailure::Render,
            reason: "boom".to_string(),
        };
        assert!(matches!(thrown.into_markup(), Err(ChartError::Render(reason)) if reason == "boom"));
    }
}
