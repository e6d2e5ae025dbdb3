//! JSON bodies returned to HTTP clients

use serde::{Deserialize, Serialize};

use super::engine::PredictionResult;

/// Successful `/predict` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f32,
    pub status: String,
}

impl PredictionResponse {
    /// Top class of `result`, or `None` when nothing was ranked
    pub fn from_result(result: &PredictionResult) -> Option<Self> {
        result.top().map(|top| Self {
            prediction: top.label.to_string(),
            confidence: top.confidence,
            status: "success".to_string(),
        })
    }
}

/// Failure body: `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
