use crate::error::AdapterError;
use crate::model::{FeatureValue, Prediction};
use anyhow::Result;
use serde_json::json;

pub const CSV: &str = "text/csv";
pub const JSON: &str = "application/json";
pub const JSON_LINES: &str = "application/jsonlines";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Csv,
    Json,
    JsonLines,
}

impl ResponseFormat {
    /// Picks the first supported media type of an `Accept` header. A missing
    /// header or a wildcard selects CSV.
    pub fn from_accept(accept: Option<&str>) -> Result<Self> {
        let Some(accept) = accept.map(str::trim).filter(|a| !a.is_empty()) else {
            return Ok(ResponseFormat::Csv);
        };
        accept
            .split(',')
            .filter_map(|entry| entry.split(';').next())
            .map(str::trim)
            .find_map(|media_type| match media_type.to_ascii_lowercase().as_str() {
                CSV | "*/*" | "text/*" => Some(ResponseFormat::Csv),
                JSON => Some(ResponseFormat::Json),
                JSON_LINES | "application/jsonl" => Some(ResponseFormat::JsonLines),
                _ => None,
            })
            .ok_or_else(|| AdapterError::unsupported_accept(accept).into())
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseFormat::Csv => CSV,
            ResponseFormat::Json => JSON,
            ResponseFormat::JsonLines => JSON_LINES,
        }
    }
}

fn csv_field(value: &FeatureValue) -> String {
    match value {
        FeatureValue::Number(v) => v.to_string(),
        FeatureValue::Missing => String::new(),
    }
}

fn to_json(prediction: &Prediction) -> serde_json::Value {
    match prediction {
        Prediction::Scores(scores) if scores.len() == 1 => {
            json!({"predictions": [{"score": scores[0]}]})
        }
        Prediction::Scores(scores) => json!({"predictions": [{"scores": scores}]}),
        Prediction::Features(input) => json!({"features": input}),
    }
}

pub fn encode_prediction(prediction: &Prediction, format: ResponseFormat) -> Result<String> {
    let body = match format {
        ResponseFormat::Csv => match prediction {
            Prediction::Scores(scores) => scores
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(","),
            Prediction::Features(input) => input
                .values
                .iter()
                .map(csv_field)
                .collect::<Vec<_>>()
                .join(","),
        },
        ResponseFormat::Json => serde_json::to_string(&to_json(prediction))?,
        ResponseFormat::JsonLines => {
            let mut line = serde_json::to_string(&to_json(prediction))?;
            line.push('\n');
            line
        }
    };
    Ok(body)
}
