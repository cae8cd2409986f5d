use serde::Serialize;

use crate::coordinator::SessionSnapshot;

// response for the upload endpoint
#[derive(Serialize, Debug)]
pub struct UploadResponse {
    /// public url the stored file is served from
    pub url: String,
    /// filename as uploaded
    pub name: String,
}

// response for the health endpoint
#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub session: SessionSnapshot,
}

// generic error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
