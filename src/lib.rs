//! # Tumor Triage
//!
//! Brain MRI triage inference with the Burn framework: a ResNeXt-50 (32x4d)
//! classifier that sorts a single scan into one of four categories
//! (glioma, meningioma, no tumor, pituitary).
//!
//! ## Modules
//!
//! - `preprocess`: decode, resize to 224x224 and normalize with ImageNet statistics
//! - `model`: the ResNeXt architecture built with Burn
//! - `checkpoint`: strict loading of PyTorch / safetensors weights
//! - `classifier`: the loaded, shareable model
//! - `inference`: softmax, top-K ranking and the prediction facade
//! - `config`: JSON service configuration
//! - `utils`: errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use tumor_triage::inference::{load_model, predict, DEFAULT_TOP_K};
//!
//! let classifier = load_model(Path::new("models/best_resnext50_model.pth"))?;
//! let result = predict(Path::new("scan.jpg"), &classifier, DEFAULT_TOP_K)?;
//! println!("{}", result.display());
//! ```

pub mod backend;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod inference;
pub mod labels;
pub mod model;
pub mod preprocess;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used items for convenience
pub use backend::{backend_name, default_device, InferenceBackend};
pub use checkpoint::{load_checkpoint, LoadReport};
pub use classifier::Classifier;
pub use config::ServiceConfig;
pub use inference::{
    load_model, predict, predict_bytes, Prediction, PredictionResult, DEFAULT_TOP_K,
};
pub use labels::{ClassLabel, CLASS_NAMES, NUM_CLASSES};
pub use model::{ResNeXt, ResNeXtConfig};
pub use preprocess::{ImageTensor, IMAGE_SIZE};
pub use utils::error::{Result, TriageError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
