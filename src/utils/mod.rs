//! Utilities module for logging, error types and small formatting helpers

pub mod error;
pub mod logging;

pub use error::{MismatchReport, Result, TriageError};
pub use logging::init_logging;

/// Format a probability as a percentage with two decimals
pub fn format_confidence(confidence: f32) -> String {
    format!("{:.2}%", confidence * 100.0)
}

/// Format a percentage with a progress bar
pub fn format_progress_bar(progress: f64, width: usize) -> String {
    let filled = (progress.clamp(0.0, 1.0) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        progress * 100.0
    )
}
