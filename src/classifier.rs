//! The loaded, ready-to-serve model
//!
//! A [`Classifier`] only exists once weights are in place, so holding one is
//! the "ready" state. It is never mutated afterwards; share it by reference
//! or behind an `Arc` across request threads.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use burn::tensor::backend::Backend;

use crate::checkpoint::{load_checkpoint, LoadReport};
use crate::labels::NUM_CLASSES;
use crate::model::{ResNeXt, ResNeXtConfig};
use crate::utils::error::{Result, TriageError};

/// Network, device and provenance of the weights
#[derive(Debug)]
pub struct Classifier<B: Backend> {
    // Burn modules are `Send` but not guaranteed `Sync`; each forward pass
    // works on a clone, which shares tensor storage with this one.
    model: Mutex<ResNeXt<B>>,
    num_classes: usize,
    device: B::Device,
    report: Option<LoadReport>,
}

impl<B: Backend> Classifier<B> {
    /// Build the network from `config` and restore its weights from `path`
    pub fn load(path: &Path, config: &ResNeXtConfig, device: B::Device) -> Result<Self> {
        ensure_serving_backend::<B>()?;
        ensure_label_count(config.num_classes)?;

        let (model, report) = load_checkpoint::<B>(path, config, &device)?;

        Ok(Self {
            num_classes: model.num_classes(),
            model: Mutex::new(model),
            device,
            report: Some(report),
        })
    }

    /// Wrap a network that is already in memory (no checkpoint provenance)
    pub fn from_model(model: ResNeXt<B>, device: B::Device) -> Result<Self> {
        ensure_serving_backend::<B>()?;
        ensure_label_count(model.num_classes())?;

        Ok(Self {
            num_classes: model.num_classes(),
            model: Mutex::new(model),
            device,
            report: None,
        })
    }

    /// Handle to the network for one forward pass
    pub fn model(&self) -> ResNeXt<B> {
        // Nothing mutates the network under the lock, so a poisoned guard is still valid.
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// How the weights were loaded, if they came from a checkpoint
    pub fn report(&self) -> Option<&LoadReport> {
        self.report.as_ref()
    }
}

/// Serving runs in inference mode: an autodiff backend would record a graph
/// and keep dropout active.
fn ensure_serving_backend<B: Backend>() -> Result<()> {
    if B::ad_enabled() {
        return Err(TriageError::Config(
            "classifier must run on a backend without autodiff".to_string(),
        ));
    }
    Ok(())
}

fn ensure_label_count(num_classes: usize) -> Result<()> {
    if num_classes != NUM_CLASSES {
        return Err(TriageError::Config(format!(
            "network has {} outputs but the label set has {} classes",
            num_classes, NUM_CLASSES
        )));
    }
    Ok(())
}
