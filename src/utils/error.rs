//! Error Handling Module
//!
//! Defines the error taxonomy for the triage core.
//! Uses thiserror for ergonomic error definitions.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Keys that stopped a checkpoint from matching the network topology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchReport {
    /// Parameters of the network that the checkpoint did not provide
    pub missing: Vec<String>,
    /// Checkpoint tensors with no counterpart in the network
    pub unexpected: Vec<String>,
    /// Tensors present on both sides that could not be applied (shape, dtype)
    pub errors: Vec<String>,
}

impl MismatchReport {
    /// True when nothing is missing, unexpected or broken
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.errors.is_empty()
    }
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Long key lists are truncated; the counts are always exact.
        fn sample(keys: &[String]) -> String {
            const SHOWN: usize = 5;
            let mut out = keys.iter().take(SHOWN).cloned().collect::<Vec<_>>().join(", ");
            if keys.len() > SHOWN {
                out.push_str(&format!(", ... ({} more)", keys.len() - SHOWN));
            }
            out
        }

        write!(
            f,
            "{} missing, {} unexpected, {} invalid",
            self.missing.len(),
            self.unexpected.len(),
            self.errors.len()
        )?;
        if !self.missing.is_empty() {
            write!(f, "; missing: [{}]", sample(&self.missing))?;
        }
        if !self.unexpected.is_empty() {
            write!(f, "; unexpected: [{}]", sample(&self.unexpected))?;
        }
        if !self.errors.is_empty() {
            write!(f, "; invalid: [{}]", sample(&self.errors))?;
        }
        Ok(())
    }
}

/// Main error type for triage operations
#[derive(Error, Debug)]
pub enum TriageError {
    /// Checkpoint path does not resolve to a readable file
    #[error("Checkpoint not found at '{}'", .0.display())]
    CheckpointNotFound(PathBuf),

    /// Checkpoint exists but could not be parsed
    #[error("Checkpoint at '{}' could not be read: {reason}", .path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    /// Checkpoint keys or shapes do not match the constructed network
    #[error("Checkpoint does not match the network architecture: {0}")]
    ArchitectureMismatch(MismatchReport),

    /// Input is not a decodable image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Forward pass could not be run or produced unusable output
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TriageError {
    /// Errors raised while loading the model; the service must not serve after one of these
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            TriageError::CheckpointNotFound(_)
                | TriageError::CorruptCheckpoint { .. }
                | TriageError::ArchitectureMismatch(_)
        )
    }

    /// Errors caused by the caller's input rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, TriageError::Decode(_))
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        TriageError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for TriageError {
    fn from(err: image::ImageError) -> Self {
        TriageError::Decode(err.to_string())
    }
}

/// Convenience Result type for triage operations
pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TriageError::Inference("bad shape".to_string());
        assert_eq!(format!("{}", err), "Inference error: bad shape");
    }

    #[test]
    fn test_checkpoint_not_found_mentions_path() {
        let err = TriageError::CheckpointNotFound(PathBuf::from("/models/best.pth"));
        assert!(err.to_string().contains("best.pth"));
        assert!(err.is_startup_fatal());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_decode_is_client_error() {
        let err = TriageError::Decode("not an image".to_string());
        assert!(err.is_client_error());
        assert!(!err.is_startup_fatal());
    }

    #[test]
    fn test_mismatch_report_truncates_long_lists() {
        let report = MismatchReport {
            missing: (0..8).map(|i| format!("layer1.{i}.conv1.weight")).collect(),
            unexpected: vec!["head.weight".to_string()],
            errors: Vec::new(),
        };
        let text = report.to_string();

        assert!(text.starts_with("8 missing, 1 unexpected, 0 invalid"));
        assert!(text.contains("(3 more)"));
        assert!(text.contains("head.weight"));
        assert!(!report.is_clean());
        assert!(MismatchReport::default().is_clean());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TriageError = io_err.into();
        assert!(matches!(err, TriageError::Io(_)));
    }
}
