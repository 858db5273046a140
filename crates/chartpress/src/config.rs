use crate::{ChartError, RenderOptions, VisualMapping};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CORE_URL: &str = "https://cdn.jsdelivr.net/npm/@rawgraphs/rawgraphs-core";
pub const DEFAULT_CATALOG_URL: &str = "https://cdn.jsdelivr.net/npm/@rawgraphs/rawgraphs-charts";
pub const DEFAULT_CORE_GLOBAL: &str = "raw";
pub const DEFAULT_CATALOG_GLOBAL: &str = "rawcharts";
pub const DEFAULT_SCRIPT_LOAD_TIMEOUT_MS: u64 = 30_000;
/// Headroom a CDP request keeps over the in-page script load it carries.
pub const REQUEST_TIMEOUT_MARGIN_MS: u64 = 5_000;

/// Launch settings for the headless browser that hosts the sandbox page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub headed: bool,
    pub chrome_executable: Option<PathBuf>,
    pub no_sandbox: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub launch_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            headed: false,
            chrome_executable: None,
            no_sandbox: false,
            window_width: 1280,
            window_height: 1024,
            launch_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// The two remote bundles injected into the sandbox, core first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSources {
    pub core_url: String,
    pub catalog_url: String,
    /// Global the core bundle defines on `window`.
    pub core_global: String,
    /// Global the catalog bundle defines on `window`.
    pub catalog_global: String,
    pub load_timeout_ms: u64,
}

impl Default for ScriptSources {
    fn default() -> Self {
        Self {
            core_url: DEFAULT_CORE_URL.to_string(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            core_global: DEFAULT_CORE_GLOBAL.to_string(),
            catalog_global: DEFAULT_CATALOG_GLOBAL.to_string(),
            load_timeout_ms: DEFAULT_SCRIPT_LOAD_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    /// Drop the row and record a warning.
    #[default]
    Skip,
    /// Abort the load with a parse error.
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    pub delimiter: u8,
    pub malformed_rows: MalformedRowPolicy,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            malformed_rows: MalformedRowPolicy::Skip,
        }
    }
}

/// One parameterized chart run: where the data comes from, how it maps onto the
/// chart, and where the artifact goes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub chart_kind: String,
    pub mapping: VisualMapping,
    #[serde(default)]
    pub options: RenderOptions,
    #[serde(default)]
    pub numeric_fields: Vec<String>,
}

impl ChartJob {
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ChartError> {
        let raw = std::fs::read_to_string(path).map_err(|error| ChartError::io(path, error))?;
        serde_json::from_str(&raw).map_err(|error| {
            ChartError::InvalidConfiguration(format!(
                "job file '{}' is not valid: {error}",
                path.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<(), ChartError> {
        if self.chart_kind.trim().is_empty() {
            return Err(ChartError::InvalidConfiguration(
                "chart kind cannot be empty".to_string(),
            ));
        }
        if self.mapping.is_empty() {
            return Err(ChartError::InvalidConfiguration(format!(
                "mapping for chart '{}' has no channels",
                self.chart_kind
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(ChartError::InvalidConfiguration(
                "output path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the pipeline needs besides the job itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sandbox: SandboxConfig,
    pub scripts: ScriptSources,
    pub loader: LoaderOptions,
}

impl PipelineConfig {
    /// Sandbox settings for a run. A script load is a single awaited CDP request,
    /// so the request timeout is raised to outlast `scripts.load_timeout_ms`.
    pub fn effective_sandbox(&self) -> SandboxConfig {
        let floor = self
            .scripts
            .load_timeout_ms
            .saturating_add(REQUEST_TIMEOUT_MARGIN_MS);
        let mut sandbox = self.sandbox.clone();
        sandbox.request_timeout_ms = sandbox.request_timeout_ms.max(floor);
        sandbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pipeline_config_defaults_match_rawgraphs_bundles() {
        let config = PipelineConfig::default();
        assert!(!config.sandbox.headed);
        assert_eq!(config.scripts.core_url, DEFAULT_CORE_URL);
        assert_eq!(config.scripts.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.scripts.core_global, "raw");
        assert_eq!(config.scripts.catalog_global, "rawcharts");
        assert_eq!(config.scripts.load_timeout_ms, 30_000);
        assert_eq!(config.loader.delimiter, b',');
        assert_eq!(config.loader.malformed_rows, MalformedRowPolicy::Skip);
    }

    #[test]
    fn effective_sandbox_long_script_timeout_expected_request_timeout_raised() {
        let mut config = PipelineConfig::default();
        config.scripts.load_timeout_ms = 90_000;

        let sandbox = config.effective_sandbox();
        assert_eq!(sandbox.request_timeout_ms, 95_000);
        assert_eq!(config.sandbox.request_timeout_ms, 30_000);
    }

    #[test]
    fn effective_sandbox_larger_request_timeout_expected_kept() {
        let mut config = PipelineConfig::default();
        config.sandbox.request_timeout_ms = 120_000;
        config.scripts.load_timeout_ms = 10_000;

        assert_eq!(config.effective_sandbox().request_timeout_ms, 120_000);
    }

    #[test]
    fn chart_job_json_file_expected_parsed_with_defaults() {
        let temp = TempDir::new().expect("tempdir should create");
        let path = temp.path().join("job.json");
        std::fs::write(
            &path,
            r#"{
                "input": "data.csv",
                "output": "chart.svg",
                "chart_kind": "bubblechart",
                "mapping": { "x": { "value": "age" } }
            }"#,
        )
        .expect("job file should write");

        let job = ChartJob::load_from_path(&path).expect("job should parse");
        assert_eq!(job.chart_kind, "bubblechart");
        assert!(job.numeric_fields.is_empty());
        assert_eq!(job.options, RenderOptions::default());
        job.validate().expect("job should validate");
    }

    #[test]
    fn chart_job_empty_mapping_expected_invalid_configuration() {
        let job = ChartJob {
            input: PathBuf::from("data.csv"),
            output: PathBuf::from("chart.svg"),
            chart_kind: "beeswarm".to_string(),
            mapping: VisualMapping::new(),
            options: RenderOptions::default(),
            numeric_fields: Vec::new(),
        };
        let error = job.validate().expect_err("empty mapping should be rejected");
        assert!(matches!(error, ChartError::InvalidConfiguration(_)));
    }
}
