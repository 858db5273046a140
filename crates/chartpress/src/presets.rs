//! Ready-made jobs for the chart kinds this tool is usually pointed at.

use crate::{ChartJob, Margin, Orientation, RenderOptions, VisualMapping};
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq)]
pub struct ChartPreset {
    pub chart_kind: &'static str,
    pub description: &'static str,
    pub mapping: VisualMapping,
    pub numeric_fields: Vec<String>,
    pub options: RenderOptions,
}

impl ChartPreset {
    pub fn into_job(self, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> ChartJob {
        ChartJob {
            input: input.into(),
            output: output.into(),
            chart_kind: self.chart_kind.to_string(),
            mapping: self.mapping,
            options: self.options,
            numeric_fields: self.numeric_fields,
        }
    }
}

pub fn presets() -> Vec<ChartPreset> {
    vec![beeswarm(), bubblechart()]
}

pub fn preset(chart_kind: &str) -> Option<ChartPreset> {
    presets()
        .into_iter()
        .find(|preset| preset.chart_kind == chart_kind)
}

/// Sentiment bee swarm: one dot per post, grouped and colored by topic, sized by likes.
fn beeswarm() -> ChartPreset {
    ChartPreset {
        chart_kind: "beeswarm",
        description: "posts by sentiment, grouped by topic, sized by likes",
        mapping: VisualMapping::new()
            .channel("xValue", ["sentiment_vader"])
            .channel("series", ["topic_nmf"])
            .channel("color", ["topic_nmf"])
            .channel("size", ["likes"]),
        numeric_fields: vec!["likes".to_string(), "sentiment_vader".to_string()],
        options: RenderOptions {
            width: Some(800.0),
            height: Some(600.0),
            margin: Some(Margin {
                top: 50.0,
                right: 50.0,
                bottom: 50.0,
                left: 100.0,
            }),
            padding: Some(1.0),
            orientation: Some(Orientation::Horizontal),
            show_labels: Some(false),
            ..RenderOptions::default()
        },
    }
}

fn bubblechart() -> ChartPreset {
    ChartPreset {
        chart_kind: "bubblechart",
        description: "age against height, sized by age, colored by group",
        mapping: VisualMapping::new()
            .channel_field("x", "age")
            .channel_field("y", "height")
            .channel_field("size", "age")
            .channel_field("color", "group"),
        numeric_fields: vec!["age".to_string(), "height".to_string()],
        options: RenderOptions {
            width: Some(800.0),
            height: Some(600.0),
            margin: Some(Margin::uniform(50.0)),
            ..RenderOptions::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn beeswarm_preset_mapping_uses_field_lists() {
        let preset = preset("beeswarm").expect("beeswarm preset should exist");
        assert_eq!(
            serde_json::to_value(&preset.mapping).expect("mapping should serialize"),
            json!({
                "xValue": { "value": ["sentiment_vader"] },
                "series": { "value": ["topic_nmf"] },
                "color": { "value": ["topic_nmf"] },
                "size": { "value": ["likes"] }
            })
        );
        assert_eq!(
            serde_json::to_value(&preset.options).expect("options should serialize"),
            json!({
                "width": 800.0,
                "height": 600.0,
                "margin": { "top": 50.0, "right": 50.0, "bottom": 50.0, "left": 100.0 },
                "padding": 1.0,
                "orientation": "horizontal",
                "showLabels": false
            })
        );
    }

    #[test]
    fn bubblechart_preset_into_job_validates() {
        let job = preset("bubblechart")
            .expect("bubblechart preset should exist")
            .into_job("data.csv", "chart.svg");
        assert_eq!(job.chart_kind, "bubblechart");
        assert_eq!(job.numeric_fields, vec!["age", "height"]);
        job.validate().expect("preset job should validate");
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("sankey").is_none());
    }
}
