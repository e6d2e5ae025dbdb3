//! Prediction facade
//!
//! Load once at startup, then classify image files or uploaded bytes.

use std::path::Path;
use std::time::Instant;

use burn::tensor::backend::Backend;
use tracing::{debug, info};

use super::engine::{infer, PredictionResult};
use crate::backend::{backend_name, default_device, InferenceBackend};
use crate::classifier::Classifier;
use crate::model::ResNeXtConfig;
use crate::preprocess::{decode_image, load_image};
use crate::utils::error::Result;

/// Number of classes returned when the caller does not ask for more
pub const DEFAULT_TOP_K: usize = 1;

/// Load the ResNeXt-50 32x4d classifier on the default device
pub fn load_model(checkpoint: &Path) -> Result<Classifier<InferenceBackend>> {
    info!(
        "Loading checkpoint {} on {}",
        checkpoint.display(),
        backend_name()
    );

    let classifier = Classifier::load(
        checkpoint,
        &ResNeXtConfig::resnext50_32x4d(),
        default_device(),
    )?;

    if let Some(report) = classifier.report() {
        info!(
            "Model ready: {} tensors applied ({:?}, {:?} layout) in {} ms",
            report.applied, report.format, report.layout, report.load_time_ms
        );
    }
    Ok(classifier)
}

/// Classify the image at `image_path`
pub fn predict<B: Backend>(
    image_path: &Path,
    classifier: &Classifier<B>,
    top_k: usize,
) -> Result<PredictionResult> {
    let start = Instant::now();
    let input = load_image(image_path)?;
    let result = infer(classifier, &input, top_k)?;

    debug!(
        "{}: {} in {:.1} ms",
        image_path.display(),
        describe(&result),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(result)
}

/// Classify an encoded image held in memory
pub fn predict_bytes<B: Backend>(
    bytes: &[u8],
    classifier: &Classifier<B>,
    top_k: usize,
) -> Result<PredictionResult> {
    let input = decode_image(bytes)?;
    let result = infer(classifier, &input, top_k)?;

    debug!("{} byte upload: {}", bytes.len(), describe(&result));
    Ok(result)
}

fn describe(result: &PredictionResult) -> String {
    match result.top() {
        Some(top) => format!("{} ({:.4})", top.label, top.confidence),
        None => "no classes requested".to_string(),
    }
}
