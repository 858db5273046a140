//! Declarative inputs handed to the charting library untouched: the visual mapping
//! (channel -> dataset fields) and the render options record.

use crate::ChartError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Channel -> field association, e.g. `{ "x": { "value": "age" } }`.
///
/// The pipeline never interprets the channels; the structure crosses into the
/// sandbox exactly as built here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisualMapping(Map<String, Value>);

impl VisualMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `channel` to a list of fields (`{ "value": [..] }`).
    pub fn channel<I, S>(mut self, channel: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<Value> = fields
            .into_iter()
            .map(|field| Value::String(field.into()))
            .collect();
        self.0.insert(channel.into(), json!({ "value": fields }));
        self
    }

    /// Maps `channel` to a single field (`{ "value": "field" }`).
    pub fn channel_field(mut self, channel: impl Into<String>, field: impl Into<String>) -> Self {
        self.0
            .insert(channel.into(), json!({ "value": field.into() }));
        self
    }

    pub fn insert_raw(&mut self, channel: impl Into<String>, spec: Value) {
        self.0.insert(channel.into(), spec);
    }

    /// Parses a CLI-style assignment: `x=age` or `series=topic,region`.
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<(), ChartError> {
        let Some((channel, fields)) = assignment.split_once('=') else {
            return Err(ChartError::InvalidConfiguration(format!(
                "mapping '{assignment}' must look like channel=field[,field]"
            )));
        };
        let channel = channel.trim();
        let fields: Vec<&str> = fields
            .split(',')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .collect();
        if channel.is_empty() || fields.is_empty() {
            return Err(ChartError::InvalidConfiguration(format!(
                "mapping '{assignment}' needs a channel and at least one field"
            )));
        }
        let value = match fields.as_slice() {
            [single] => Value::String((*single).to_string()),
            many => Value::Array(many.iter().map(|f| Value::String(f.to_string())).collect()),
        };
        self.0.insert(channel.to_string(), json!({ "value": value }));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Field names referenced by any channel, in first-seen order.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for spec in self.0.values() {
            let value = spec.get("value").unwrap_or(spec);
            let names: Vec<&str> = match value {
                Value::String(name) => vec![name.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            for name in names {
                if !fields.iter().any(|seen| seen == name) {
                    fields.push(name.to_string());
                }
            }
        }
        fields
    }

    pub fn as_json(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margin {
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Options record consumed by the chart; unset fields are left to the chart's defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<Margin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_labels: Option<bool>,
    /// Chart-specific options passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RenderOptions {
    /// Overlays every key present in `overrides` (a JSON object) onto these options.
    pub fn merge_json(&mut self, overrides: &Value) -> Result<(), ChartError> {
        let Value::Object(overrides) = overrides else {
            return Err(ChartError::InvalidConfiguration(
                "render options override must be a JSON object".to_string(),
            ));
        };
        let mut base = match serde_json::to_value(&*self) {
            Ok(Value::Object(base)) => base,
            Ok(_) => Map::new(),
            Err(error) => {
                return Err(ChartError::InvalidConfiguration(format!(
                    "render options could not be serialized: {error}"
                )));
            }
        };
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
        *self = serde_json::from_value(Value::Object(base)).map_err(|error| {
            ChartError::InvalidConfiguration(format!("invalid render options: {error}"))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_options_serialize_camel_case_and_skip_unset() {
        let options = RenderOptions {
            width: Some(800.0),
            show_labels: Some(false),
            orientation: Some(Orientation::Horizontal),
            ..RenderOptions::default()
        };
        let value = serde_json::to_value(&options).expect("options should serialize");
        assert_eq!(
            value,
            json!({ "width": 800.0, "orientation": "horizontal", "showLabels": false })
        );
    }

    #[test]
    fn render_options_merge_json_keeps_unknown_keys_in_extra() {
        let mut options = RenderOptions {
            width: Some(800.0),
            height: Some(600.0),
            ..RenderOptions::default()
        };
        options
            .merge_json(&json!({ "height": 400, "sortSeriesBy": "Total value (descending)" }))
            .expect("merge should succeed");

        assert_eq!(options.width, Some(800.0));
        assert_eq!(options.height, Some(400.0));
        assert_eq!(
            options.extra.get("sortSeriesBy"),
            Some(&json!("Total value (descending)"))
        );
    }

    #[test]
    fn mapping_assignment_single_and_multiple_fields() {
        let mut mapping = VisualMapping::new();
        mapping.apply_assignment("x=age").expect("single field");
        mapping
            .apply_assignment("series = topic, region")
            .expect("multiple fields");

        assert_eq!(
            serde_json::to_value(&mapping).expect("mapping should serialize"),
            json!({
                "x": { "value": "age" },
                "series": { "value": ["topic", "region"] }
            })
        );
        assert_eq!(mapping.referenced_fields(), vec!["age", "topic", "region"]);
    }

    #[test]
    fn mapping_assignment_without_field_expected_error() {
        let mut mapping = VisualMapping::new();
        assert!(mapping.apply_assignment("x=").is_err());
        assert!(mapping.apply_assignment("age").is_err());
        assert!(mapping.is_empty());
    }
}
