use std::path::PathBuf;
use std::sync::Arc;

use crate::coordinator::CoordinatorHandle;
use crate::staging::UploadStaging;

/// shared application state
#[derive(Clone)]
pub struct AppState {
    /// directory uploaded files are written to
    pub files_dir: PathBuf,
    /// host uploads waiting for their batch to complete
    pub staging: Arc<UploadStaging>,
    pub coordinator: CoordinatorHandle,
    /// per-connection outbound queue capacity
    pub client_queue_depth: usize,
}

impl AppState {
    /// create the app state and start the session coordinator
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(files_dir: PathBuf, transfer_timeout: std::time::Duration, client_queue_depth: usize) -> Self {
        let staging = Arc::new(UploadStaging::new());
        let coordinator = CoordinatorHandle::spawn(staging.clone(), transfer_timeout);
        Self {
            files_dir,
            staging,
            coordinator,
            client_queue_depth: client_queue_depth.max(1),
        }
    }
}
