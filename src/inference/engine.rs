//! Inference Engine
//!
//! Forward pass, softmax and top-K ranking on a loaded [`Classifier`].

use std::time::{Duration, Instant};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::labels::{ClassLabel, NUM_CLASSES};
use crate::preprocess::ImageTensor;
use crate::utils::error::{Result, TriageError};
use crate::utils::{format_confidence, format_progress_bar};

/// One ranked class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: ClassLabel,
    /// Softmax probability, in [0, 1]
    pub confidence: f32,
}

/// Ranked output of a single forward pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Top-K classes, highest confidence first
    pub predictions: Vec<Prediction>,

    /// Full probability distribution over all classes, in label order
    pub probabilities: Vec<f32>,

    /// Forward pass time in milliseconds
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Rank a probability distribution and keep the best `top_k` classes
    pub fn from_probabilities(
        probabilities: Vec<f32>,
        top_k: usize,
        inference_time: Duration,
    ) -> Result<Self> {
        if probabilities.len() != NUM_CLASSES {
            return Err(TriageError::Inference(format!(
                "model produced {} scores for {} classes",
                probabilities.len(),
                NUM_CLASSES
            )));
        }
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
            return Err(TriageError::Inference(format!(
                "model produced a non-finite probability ({})",
                bad
            )));
        }

        let predictions = rank(&probabilities, top_k)
            .into_iter()
            .filter_map(|(index, confidence)| {
                ClassLabel::from_index(index).map(|label| Prediction {
                    label,
                    confidence: confidence.clamp(0.0, 1.0),
                })
            })
            .collect();

        Ok(Self {
            predictions,
            probabilities,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        })
    }

    /// Best class, if any was requested
    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Entropy of the full distribution (uncertainty of the prediction)
    pub fn entropy(&self) -> f32 {
        self.probabilities
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| -p * p.ln())
            .sum()
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        let mut output = String::new();

        if let Some(top) = self.top() {
            output.push_str(&format!(
                "Prediction: {} ({})\n",
                top.label,
                format_confidence(top.confidence)
            ));
        }
        output.push_str(&format!("Entropy: {:.3} nats\n", self.entropy()));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        if self.len() > 1 {
            output.push_str("\nRanked:\n");
            for (rank, prediction) in self.predictions.iter().enumerate() {
                output.push_str(&format!(
                    "  {}. {:<11} {}\n",
                    rank + 1,
                    prediction.label.as_str(),
                    format_confidence(prediction.confidence)
                ));
            }
        }

        output.push_str("\nClass distribution:\n");
        for (label, p) in ClassLabel::ALL.iter().zip(&self.probabilities) {
            output.push_str(&format!(
                "  {:<11} {}\n",
                label.as_str(),
                format_progress_bar(*p as f64, 20)
            ));
        }

        output
    }
}

/// Indices of the `k` highest probabilities, highest first.
///
/// Ties go to the lower class index so repeated calls on identical input
/// always rank identically. Returns `min(k, probabilities.len())` entries.
pub fn rank(probabilities: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    indexed.truncate(k);
    indexed
}

/// Run one preprocessed image through the classifier.
///
/// The input shape is checked up front, so a malformed tensor comes back as
/// [`TriageError::Inference`] instead of a panic inside the backend.
pub fn infer<B: Backend>(
    classifier: &Classifier<B>,
    input: &ImageTensor,
    top_k: usize,
) -> Result<PredictionResult> {
    let tensor = input.to_tensor::<B>(classifier.device())?;

    let start = Instant::now();
    let output = classifier.model().forward_softmax(tensor);
    let probabilities = output
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TriageError::Inference(format!("failed to read output: {:?}", e)))?;
    let elapsed = start.elapsed();

    PredictionResult::from_probabilities(probabilities, top_k, elapsed)
}
