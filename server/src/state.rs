//! Application state for the triage server
//!
//! Holds the service configuration and the model lifecycle. The classifier is
//! never a nullable global: handlers read an explicit [`ModelState`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;

use tumor_triage::{Classifier, InferenceBackend, ServiceConfig, TriageError};

/// Default request body limit for uploads (16 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub type ServingClassifier = Classifier<InferenceBackend>;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Checkpoint, top-k and architecture
    pub service: ServiceConfig,
    /// Stage uploads here under UUID names; decode in memory when `None`
    pub upload_dir: Option<PathBuf>,
    /// Largest accepted request body
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            upload_dir: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Lifecycle of the served model
#[derive(Clone, Debug)]
pub enum ModelState {
    /// Checkpoint load in progress
    Loading,
    /// Weights in place; predictions are served
    Ready(Arc<ServingClassifier>),
    /// Load failed; the server is shutting down
    Failed(String),
}

/// Model status as reported by `/health`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed,
}

impl ModelState {
    pub fn status(&self) -> ModelStatus {
        match self {
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
            ModelState::Failed(_) => ModelStatus::Failed,
        }
    }
}

/// Failure message published in [`ModelState::Failed`]
pub fn load_failure_reason(err: &TriageError) -> String {
    if err.is_startup_fatal() {
        format!("checkpoint rejected: {}", err)
    } else {
        format!("model could not be initialized: {}", err)
    }
}

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Current model lifecycle stage
    model: RwLock<ModelState>,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    /// State for a server whose model is still loading
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            model: RwLock::new(ModelState::Loading),
            started_at: Instant::now(),
        }
    }

    /// State for a server with a classifier already in hand
    pub fn ready(config: ServerConfig, classifier: ServingClassifier) -> Self {
        Self {
            config,
            model: RwLock::new(ModelState::Ready(Arc::new(classifier))),
            started_at: Instant::now(),
        }
    }

    pub async fn set_ready(&self, classifier: ServingClassifier) {
        *self.model.write().await = ModelState::Ready(Arc::new(classifier));
    }

    pub async fn set_failed(&self, reason: impl Into<String>) {
        *self.model.write().await = ModelState::Failed(reason.into());
    }

    /// The classifier, if the model is ready
    pub async fn classifier(&self) -> Option<Arc<ServingClassifier>> {
        match &*self.model.read().await {
            ModelState::Ready(classifier) => Some(Arc::clone(classifier)),
            _ => None,
        }
    }

    /// Why the model failed to load, if it did
    pub async fn failure(&self) -> Option<String> {
        match &*self.model.read().await {
            ModelState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub async fn model_status(&self) -> ModelStatus {
        self.model.read().await.status()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
