//! Prediction endpoint - classify an uploaded scan

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use tumor_triage::inference::{predict, predict_bytes, ErrorResponse, PredictionResponse};
use tumor_triage::TriageError;

use crate::state::SharedState;
use crate::upload::{allowed_extension, StagedUpload};

/// Multipart field carrying the scan
pub const IMAGE_FIELD: &str = "image";

/// Failures of `/predict`, each rendered as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    ModelNotLoaded,
    NoImage,
    NoFileSelected,
    InvalidFileType,
    /// Malformed or oversized multipart body
    Upload { status: StatusCode, message: String },
    Prediction(TriageError),
    NoResults,
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NoImage | ApiError::NoFileSelected | ApiError::InvalidFileType => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Upload { status, .. } => *status,
            ApiError::Prediction(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Prediction(_) | ApiError::NoResults | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::ModelNotLoaded => "Model not loaded".to_string(),
            ApiError::NoImage => "No image uploaded".to_string(),
            ApiError::NoFileSelected => "No file selected".to_string(),
            ApiError::InvalidFileType => {
                "Invalid file type. Allowed types: png, jpg, jpeg, gif".to_string()
            }
            ApiError::Upload { message, .. } => message.clone(),
            ApiError::Prediction(e) => format!("Prediction failed: {}", e),
            ApiError::NoResults => "No prediction results".to_string(),
            ApiError::Internal(reason) => format!("Prediction failed: {}", reason),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();

        if status.is_server_error() {
            error!("/predict: {}", message);
        } else {
            warn!("/predict: {}", message);
        }

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

/// A file part pulled out of the multipart body
struct Upload {
    filename: String,
    bytes: Bytes,
}

/// POST /predict - Classify the image in multipart field `image`
pub async fn predict_image(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let classifier = state.classifier().await.ok_or(ApiError::ModelNotLoaded)?;

    // A body that is not multipart carries no files at all
    let multipart = multipart.map_err(|_| ApiError::NoImage)?;
    let upload = read_image_field(multipart).await?;

    if upload.filename.is_empty() {
        return Err(ApiError::NoFileSelected);
    }
    let extension = allowed_extension(&upload.filename).ok_or(ApiError::InvalidFileType)?;

    let staged = match &state.config.upload_dir {
        Some(dir) => Some(
            StagedUpload::write(dir, &extension, &upload.bytes)
                .await
                .map_err(|e| ApiError::Internal(format!("failed to stage upload: {}", e)))?,
        ),
        None => None,
    };

    let top_k = state.config.service.top_k;
    let bytes = upload.bytes;
    let result = tokio::task::spawn_blocking(move || match staged {
        // Dropped at the end of this arm, removing the staged file
        Some(staged) => predict(staged.path(), &classifier, top_k),
        None => predict_bytes(&bytes, &classifier, top_k),
    })
    .await
    .map_err(|e| ApiError::Internal(format!("prediction task failed: {}", e)))?
    .map_err(ApiError::Prediction)?;

    let response = PredictionResponse::from_result(&result).ok_or(ApiError::NoResults)?;
    info!(
        "{}: {} ({:.4}) in {:.1} ms",
        upload.filename, response.prediction, response.confidence, result.inference_time_ms
    );

    Ok(Json(response))
}

/// Find the first file part named [`IMAGE_FIELD`]
async fn read_image_field(mut multipart: Multipart) -> Result<Upload, ApiError> {
    loop {
        let field = multipart.next_field().await.map_err(|e| ApiError::Upload {
            status: e.status(),
            message: e.body_text(),
        })?;

        let Some(field) = field else {
            return Err(ApiError::NoImage);
        };

        // Plain form values are not files
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let bytes = field.bytes().await.map_err(|e| ApiError::Upload {
            status: e.status(),
            message: e.body_text(),
        })?;
        return Ok(Upload { filename, bytes });
    }
}
