use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the chartpress pipeline.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV parse error at line {line}: {message}")]
    Parse { line: u64, message: String },
    #[error("failed to load script '{src}': {reason}")]
    ScriptLoad { src: String, reason: String },
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },
    #[error("chart container not found: {0}")]
    ContainerNotFound(String),
    #[error("SVG element not found: {0}")]
    SvgNotFound(String),
    #[error("chart render failed: {0}")]
    Render(String),
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error("unknown chart kind '{kind}' (catalog offers: {})", available.join(", "))]
    UnknownChartKind {
        kind: String,
        available: Vec<String>,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("publish request '{operation}' failed: {reason}")]
    Publish { operation: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Parse,
    ScriptLoad,
    Timeout,
    ContainerNotFound,
    SvgNotFound,
    Render,
    Sandbox,
    UnknownChartKind,
    InvalidConfiguration,
    Publish,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Parse => "parse",
            Self::ScriptLoad => "script_load",
            Self::Timeout => "timeout",
            Self::ContainerNotFound => "container_not_found",
            Self::SvgNotFound => "svg_not_found",
            Self::Render => "render",
            Self::Sandbox => "sandbox",
            Self::UnknownChartKind => "unknown_chart_kind",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::Publish => "publish",
        }
    }

    /// Process exit code reported by the CLI for this failure kind.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::InvalidConfiguration => 2,
            Self::Io => 3,
            Self::Parse => 4,
            Self::ScriptLoad => 5,
            Self::Timeout => 6,
            Self::ContainerNotFound => 7,
            Self::SvgNotFound => 8,
            Self::Render => 9,
            Self::Sandbox => 10,
            Self::UnknownChartKind => 11,
            Self::Publish => 12,
        }
    }
}

impl ChartError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::ScriptLoad { .. } => ErrorKind::ScriptLoad,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ContainerNotFound(_) => ErrorKind::ContainerNotFound,
            Self::SvgNotFound(_) => ErrorKind::SvgNotFound,
            Self::Render(_) => ErrorKind::Render,
            Self::Sandbox(_) => ErrorKind::Sandbox,
            Self::UnknownChartKind { .. } => ErrorKind::UnknownChartKind,
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::Publish { .. } => ErrorKind::Publish,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}
