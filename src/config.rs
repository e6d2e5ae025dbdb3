//! Service configuration
//!
//! Optional JSON file read by the CLI and the HTTP server. Command-line flags
//! and `TRIAGE_*` environment variables override what it contains.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::{default_device, InferenceBackend};
use crate::classifier::Classifier;
use crate::inference::DEFAULT_TOP_K;
use crate::labels::NUM_CLASSES;
use crate::model::ResNeXtConfig;
use crate::utils::error::{Result, TriageError};

/// Default checkpoint location, relative to the working directory
pub const DEFAULT_CHECKPOINT: &str = "models/best_resnext50_model.pth";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Trained weights (`.pth` or `.safetensors`)
    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,

    /// Classes returned per prediction
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Network architecture the checkpoint was trained with
    #[serde(default = "ResNeXtConfig::resnext50_32x4d")]
    pub model: ResNeXtConfig,
}

fn default_checkpoint() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT)
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            checkpoint: default_checkpoint(),
            top_k: default_top_k(),
            model: ResNeXtConfig::resnext50_32x4d(),
        }
    }
}

impl ServiceConfig {
    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.checkpoint = checkpoint.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.as_os_str().is_empty() {
            return Err(TriageError::Config("checkpoint path is empty".to_string()));
        }
        if self.top_k == 0 {
            return Err(TriageError::Config(
                "top_k must be greater than 0".to_string(),
            ));
        }
        if self.model.num_classes != NUM_CLASSES {
            return Err(TriageError::Config(format!(
                "model.num_classes is {} but the label set has {} classes",
                self.model.num_classes, NUM_CLASSES
            )));
        }
        if self.model.groups == 0 || self.model.width_per_group == 0 {
            return Err(TriageError::Config(
                "model.groups and model.width_per_group must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(TriageError::Config(
                "model.dropout must be in range [0.0, 1.0)".to_string(),
            ));
        }
        Ok(())
    }

    /// Load the configured checkpoint on the default device
    pub fn load_classifier(&self) -> Result<Classifier<InferenceBackend>> {
        self.validate()?;
        Classifier::load(&self.checkpoint, &self.model, default_device())
    }
}
