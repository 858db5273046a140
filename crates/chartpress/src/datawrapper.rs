//! Publishing to the Datawrapper charting service: create a chart, upload its CSV
//! data, then publish it under a public URL.

use crate::ChartError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const DEFAULT_DATAWRAPPER_API_URL: &str = "https://api.datawrapper.de/v3";
pub const DEFAULT_DATAWRAPPER_PUBLIC_URL: &str = "https://datawrapper.dwcdn.net";
pub const DATAWRAPPER_TOKEN_ENV: &str = "DATAWRAPPER_API_TOKEN";
pub const DEFAULT_DATAWRAPPER_CHART_TYPE: &str = "d3-bars-stacked";

const CSV_CONTENT_TYPE: &str = "text/csv";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the API base URL, e.g. `/charts`.
    pub path: String,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Authenticated transport to the Datawrapper REST API.
#[async_trait]
pub trait DatawrapperHttp: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ChartError>;
}

#[derive(Clone, Debug)]
pub struct ReqwestDatawrapperHttp {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ReqwestDatawrapperHttp {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Reads the API token from `DATAWRAPPER_API_TOKEN`.
    pub fn from_env(base_url: impl Into<String>) -> Result<Self, ChartError> {
        let token = std::env::var(DATAWRAPPER_TOKEN_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                ChartError::InvalidConfiguration(format!(
                    "{DATAWRAPPER_TOKEN_ENV} is not set"
                ))
            })?;
        Ok(Self::new(base_url, token))
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl DatawrapperHttp for ReqwestDatawrapperHttp {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ChartError> {
        let url = self.endpoint(&request.path);
        let mut builder = match request.method {
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
        }
        .bearer_auth(&self.token);
        if let Some(content_type) = request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|err| publish_error(&request.path, format!("http request failed: {err}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| publish_error(&request.path, format!("http read body failed: {err}")))?;
        Ok(ApiResponse { status, body })
    }
}

/// What to create on the service before the data goes up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatawrapperChart {
    pub title: String,
    pub chart_type: String,
    /// Extra chart properties (`theme`, `language`, `metadata`, ...) merged into the
    /// creation payload. Nested objects merge key by key.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl DatawrapperChart {
    pub fn new(title: impl Into<String>, chart_type: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            chart_type: chart_type.into(),
            properties: Map::new(),
        }
    }

    /// Creation body. Bars are stacked unless `properties` says otherwise.
    pub fn create_payload(&self) -> Value {
        let mut payload = json!({
            "title": self.title,
            "type": self.chart_type,
            "metadata": { "visualize": { "stacking": "normal" } },
        });
        merge_object(&mut payload, &Value::Object(self.properties.clone()));
        payload
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedChart {
    pub id: String,
    pub public_url: String,
}

pub struct DatawrapperClient<H> {
    http: H,
    public_url: String,
}

impl<H: DatawrapperHttp> DatawrapperClient<H> {
    pub fn new(http: H) -> Self {
        Self {
            http,
            public_url: DEFAULT_DATAWRAPPER_PUBLIC_URL.to_string(),
        }
    }

    pub fn with_public_url(mut self, public_url: impl Into<String>) -> Self {
        self.public_url = public_url.into();
        self
    }

    /// Creates an empty chart and returns its id.
    pub async fn create_chart(&self, chart: &DatawrapperChart) -> Result<String, ChartError> {
        let path = "/charts".to_string();
        let body = serde_json::to_vec(&chart.create_payload())
            .map_err(|err| publish_error(&path, format!("payload encode failed: {err}")))?;
        let response = self
            .expect_success(ApiRequest {
                method: HttpMethod::Post,
                path: path.clone(),
                content_type: Some(JSON_CONTENT_TYPE),
                body,
            })
            .await?;
        let created: Value = serde_json::from_str(&response.body)
            .map_err(|err| publish_error(&path, format!("http json decode failed: {err}")))?;
        let chart_id = created
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| publish_error(&path, "response has no chart id".to_string()))?
            .to_string();
        tracing::info!(chart_id = %chart_id, title = %chart.title, "datawrapper chart created");
        Ok(chart_id)
    }

    pub async fn update_chart_data(&self, chart_id: &str, csv: &str) -> Result<(), ChartError> {
        self.expect_success(ApiRequest {
            method: HttpMethod::Put,
            path: format!("/charts/{chart_id}/data"),
            content_type: Some(CSV_CONTENT_TYPE),
            body: csv.as_bytes().to_vec(),
        })
        .await?;
        tracing::info!(chart_id, bytes = csv.len(), "datawrapper chart data updated");
        Ok(())
    }

    /// Publishes the chart and returns where it can be viewed.
    pub async fn publish_chart(&self, chart_id: &str) -> Result<String, ChartError> {
        self.expect_success(ApiRequest {
            method: HttpMethod::Post,
            path: format!("/charts/{chart_id}/publish"),
            content_type: None,
            body: Vec::new(),
        })
        .await?;
        let public_url = format!("{}/{chart_id}", self.public_url.trim_end_matches('/'));
        tracing::info!(chart_id, public_url = %public_url, "datawrapper chart published");
        Ok(public_url)
    }

    /// Create, upload, publish. Stops at the first failing request.
    pub async fn publish_csv(
        &self,
        chart: &DatawrapperChart,
        csv: &str,
    ) -> Result<PublishedChart, ChartError> {
        let id = self.create_chart(chart).await?;
        self.update_chart_data(&id, csv).await?;
        let public_url = self.publish_chart(&id).await?;
        Ok(PublishedChart { id, public_url })
    }

    async fn expect_success(&self, request: ApiRequest) -> Result<ApiResponse, ChartError> {
        let path = request.path.clone();
        let response = self.http.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        Err(publish_error(
            &path,
            format!("status {}: {}", response.status, response.body.trim()),
        ))
    }
}

fn publish_error(operation: &str, reason: String) -> ChartError {
    ChartError::Publish {
        operation: operation.to_string(),
        reason,
    }
}

fn merge_object(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let slot = target.entry(key.clone()).or_insert(Value::Null);
                if slot.is_object() && value.is_object() {
                    merge_object(slot, value);
                } else {
                    *slot = value.clone();
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
