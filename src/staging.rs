//! Per-uploader staging of host uploads.
//!
//! A host uploads the parts of a product one file at a time. Parts are held
//! here, keyed by the uploader's connection, until that connection sends
//! `productUploadComplete`; only then does the whole ordered batch go out.
//! A batch slot exists for every connected client so that an upload racing
//! a disconnect can't leave an unreachable batch behind.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::protocol::ClientId;

/// role the uploader claims in the upload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRole {
    Host,
    Viewer,
}

impl FromStr for UploadRole {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "viewer" | "" => Ok(Self::Viewer),
            other => Err(StagingError::UnknownRole(other.to_string())),
        }
    }
}

/// a stored file as seen by clients
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub url: String,
    pub original_filename: String,
}

/// one file of a staged product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    pub url: String,
    pub original_filename: String,
    pub part_id: Uuid,
    pub uploader_id: ClientId,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StagingError {
    #[error("host uploads must identify the uploading connection")]
    MissingUploader,
    #[error("uploader {0} is not connected")]
    UnknownUploader(ClientId),
    #[error("unknown upload role: {0}")]
    UnknownRole(String),
}

#[derive(Default)]
pub struct UploadStaging {
    batches: DashMap<ClientId, Vec<UploadPart>>,
}

impl UploadStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// open an empty batch slot for a freshly connected client
    pub fn open(&self, client: ClientId) {
        self.batches.entry(client).or_default();
    }

    /// whether `stage` would accept an upload from this uploader
    ///
    /// Lets the upload handler reject before anything touches disk.
    pub fn check(&self, uploader: Option<ClientId>, role: UploadRole) -> Result<(), StagingError> {
        if role == UploadRole::Viewer {
            return Ok(());
        }
        let uploader = uploader.ok_or(StagingError::MissingUploader)?;
        if !self.batches.contains_key(&uploader) {
            return Err(StagingError::UnknownUploader(uploader));
        }
        Ok(())
    }

    /// stage a stored file and hand back its public url
    ///
    /// Viewer uploads are personal: the url is returned and nothing is staged.
    pub fn stage(
        &self,
        uploader: Option<ClientId>,
        role: UploadRole,
        descriptor: FileDescriptor,
    ) -> Result<String, StagingError> {
        if role == UploadRole::Viewer {
            tracing::debug!("Viewer upload {} not staged", descriptor.url);
            return Ok(descriptor.url);
        }

        let uploader = uploader.ok_or(StagingError::MissingUploader)?;
        let mut batch = self
            .batches
            .get_mut(&uploader)
            .ok_or(StagingError::UnknownUploader(uploader))?;

        let url = descriptor.url.clone();
        batch.push(UploadPart {
            url: descriptor.url,
            original_filename: descriptor.original_filename,
            part_id: Uuid::new_v4(),
            uploader_id: uploader,
        });
        tracing::debug!("Staged part {} for {} ({} pending)", url, uploader, batch.len());
        Ok(url)
    }

    /// take the uploader's whole batch, leaving the slot empty
    ///
    /// Returns `None` when nothing is pending; callers treat that as a no-op.
    pub fn complete(&self, uploader: ClientId) -> Option<Vec<UploadPart>> {
        let mut batch = self.batches.get_mut(&uploader)?;
        if batch.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *batch))
    }

    /// drop the client's slot and anything still staged in it
    pub fn discard(&self, client: ClientId) -> usize {
        self.batches
            .remove(&client)
            .map(|(_, parts)| parts.len())
            .unwrap_or(0)
    }

    pub fn pending_parts(&self, client: ClientId) -> usize {
        self.batches.get(&client).map(|b| b.len()).unwrap_or(0)
    }
}
