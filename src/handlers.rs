use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::models::{ErrorResponse, HealthResponse, UploadResponse};
use crate::protocol::ClientId;
use crate::staging::{FileDescriptor, StagingError, UploadRole};
use crate::state::AppState;
use crate::utils::stored_file_name;

/// connection id of the uploading client, as announced in its `welcome`
pub const CLIENT_ID_HEADER: &str = "x-client-id";
/// `host` or `viewer`
pub const CLIENT_ROLE_HEADER: &str = "x-client-role";
/// public prefix uploaded files are served under
pub const FILES_ROUTE: &str = "/files";

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn staging_error(e: StagingError) -> ApiError {
    let status = match &e {
        StagingError::UnknownUploader(_) => StatusCode::CONFLICT,
        StagingError::MissingUploader | StagingError::UnknownRole(_) => StatusCode::BAD_REQUEST,
    };
    api_error(status, e.to_string())
}

// pull uploader identity out of the request headers
fn uploader_from_headers(headers: &HeaderMap) -> Result<(Option<ClientId>, UploadRole), ApiError> {
    let role = headers
        .get(CLIENT_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("viewer")
        .parse::<UploadRole>()
        .map_err(|e| {
            tracing::warn!("Upload rejected: {}", e);
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        })?;

    let uploader = match headers.get(CLIENT_ID_HEADER) {
        None => None,
        Some(raw) => {
            let parsed = raw.to_str().ok().and_then(ClientId::parse);
            Some(parsed.ok_or_else(|| {
                tracing::warn!("Upload rejected: malformed {} header", CLIENT_ID_HEADER);
                api_error(StatusCode::BAD_REQUEST, "Malformed client id")
            })?)
        }
    };

    if role == UploadRole::Host && uploader.is_none() {
        tracing::warn!("Host upload without a client id");
        return Err(api_error(StatusCode::BAD_REQUEST, StagingError::MissingUploader.to_string()));
    }

    Ok((uploader, role))
}

// upload one file via multipart form data
//
// Host uploads are staged until the host sends productUploadComplete;
// viewer uploads just get a url back.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let (uploader, role) = uploader_from_headers(&headers)?;
    tracing::debug!("Processing {:?} upload from {:?}", role, uploader);

    state.staging.check(uploader, role).map_err(|e| {
        tracing::warn!("Upload rejected: {}", e);
        staging_error(e)
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        api_error(StatusCode::BAD_REQUEST, format!("Failed to read multipart field: {}", e))
    })? {
        // plain form fields carry no filename
        let Some(original) = field.file_name().map(str::to_string) else {
            tracing::trace!("Skipping non-file field {:?}", field.name());
            continue;
        };

        let data = field.bytes().await.map_err(|e| {
            tracing::error!("Failed to read file data for {}: {}", original, e);
            api_error(StatusCode::BAD_REQUEST, format!("Failed to read file data: {}", e))
        })?;

        let stored = stored_file_name(&data, &original);
        let file_path = state.files_dir.join(&stored);
        tracing::trace!("Storing {} ({} bytes) at {:?}", original, data.len(), file_path);

        // identical content may already be stored by an earlier upload
        let existed = fs::try_exists(&file_path).await.unwrap_or(false);

        let mut file = fs::File::create(&file_path).await.map_err(|e| {
            tracing::error!("Failed to create file {}: {}", stored, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to create file: {}", e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            tracing::error!("Failed to write to file {}: {}", stored, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to write file: {}", e))
        })?;

        file.sync_all().await.map_err(|e| {
            tracing::error!("Failed to sync file {}: {}", stored, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to sync file: {}", e))
        })?;

        let descriptor = FileDescriptor {
            url: format!("{}/{}", FILES_ROUTE, stored),
            original_filename: original.clone(),
        };
        // the uploader can still disconnect while the body is being read
        let url = match state.staging.stage(uploader, role, descriptor) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Failed to stage {}: {}", original, e);
                if !existed {
                    if let Err(rm) = fs::remove_file(&file_path).await {
                        tracing::error!("Failed to remove unstaged file {}: {}", stored, rm);
                    }
                }
                return Err(staging_error(e));
            }
        };

        tracing::info!("✅ Uploaded file: {} as {} ({} bytes)", original, stored, data.len());

        return Ok(Json(UploadResponse { url, name: original }));
    }

    tracing::warn!("Upload request contained no file field");
    Err(api_error(StatusCode::BAD_REQUEST, "No file provided"))
}

// health check endpoint
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let session = state.coordinator.snapshot().await.map_err(|e| {
        tracing::error!("Health check failed: {}", e);
        api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: "stagecast".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        session,
    }))
}
