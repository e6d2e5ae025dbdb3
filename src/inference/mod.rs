//! Inference: forward pass, ranking and the prediction facade
//!
//! - [`engine`]: softmax and deterministic top-K on a loaded classifier
//! - [`predictor`]: `load_model` / `predict` entry points
//! - [`response`]: JSON bodies for the HTTP service

pub mod engine;
pub mod predictor;
pub mod response;

pub use engine::{infer, rank, Prediction, PredictionResult};
pub use predictor::{load_model, predict, predict_bytes, DEFAULT_TOP_K};
pub use response::{ErrorResponse, PredictionResponse};
