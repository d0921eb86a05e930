//! crates/bridge_core/src/ingestion.rs
//!
//! Validates inbound files, stores them, and registers `Document` rows.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Document, DocumentListing, DocumentResult, NewDocument};
use crate::ports::{BlobStorage, DatabaseService, PortError, PortResult};

/// Hard ceiling on upload size: 10 MiB, inclusive.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

const STORAGE_ID_LEN: usize = 21;

/// The only content types accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMimeType {
    Pdf,
    Jpeg,
    Png,
    Jpg,
}

impl UploadMimeType {
    pub const ALL: [UploadMimeType; 4] = [Self::Pdf, Self::Jpeg, Self::Png, Self::Jpg];

    pub fn parse(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == mime)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Jpg => "image/jpg",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg | Self::Jpg => "jpg",
            Self::Png => "png",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("No file provided")]
    MissingFile,
    #[error("Invalid file type '{0}'. Only PDF, JPG, and PNG are allowed.")]
    UnsupportedType(String),
    #[error("File too large ({size} bytes). Maximum size is 10MB.")]
    TooLarge { size: u64 },
    #[error("File URL does not point into blob storage")]
    ForeignUrl,
    #[error("Failed to store file: {0}")]
    Storage(#[source] PortError),
}

/// Checks type and size before anything is written. The larger of the declared
/// and actual sizes is the one held against the ceiling.
pub fn validate_upload(declared_mime: &str, size: u64) -> Result<UploadMimeType, IngestionError> {
    let mime = UploadMimeType::parse(declared_mime)
        .ok_or_else(|| IngestionError::UnsupportedType(declared_mime.to_string()))?;
    if size > MAX_UPLOAD_BYTES {
        return Err(IngestionError::TooLarge { size });
    }
    Ok(mime)
}

/// Checks a client-supplied reference to an uploaded file: the same type and
/// size rules as an upload, and a URL that belongs to our blob store.
pub fn validate_file_reference(
    blob: &dyn BlobStorage,
    file_url: &str,
    declared_mime: &str,
    size: u64,
) -> Result<UploadMimeType, IngestionError> {
    let mime = validate_upload(declared_mime, size)?;
    if !blob.holds_url(file_url) {
        return Err(IngestionError::ForeignUrl);
    }
    Ok(mime)
}

/// A random, collision-resistant blob name that keeps the original extension.
pub fn storage_pathname(original_filename: &str, mime: UploadMimeType) -> String {
    let id: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STORAGE_ID_LEN)
        .map(char::from)
        .collect();

    let extension = original_filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| mime.default_extension().to_string());

    format!("{id}.{extension}")
}

/// Loads a document and checks that `requester` owns it. Ownership never
/// changes, so every owner-only operation goes through here.
pub async fn owned_document(
    db: &dyn DatabaseService,
    document_id: Uuid,
    requester: Uuid,
) -> PortResult<Document> {
    let document = db.get_document(document_id).await?;
    if document.owner_id != requester {
        return Err(PortError::Forbidden(format!(
            "document {document_id} belongs to another user"
        )));
    }
    Ok(document)
}

/// What the client gets back after an accepted upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub url: String,
    pub pathname: String,
    pub content_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DocumentIngestion {
    db: Arc<dyn DatabaseService>,
    blob: Arc<dyn BlobStorage>,
}

impl DocumentIngestion {
    pub fn new(db: Arc<dyn DatabaseService>, blob: Arc<dyn BlobStorage>) -> Self {
        Self { db, blob }
    }

    pub async fn accept_upload(
        &self,
        data: Bytes,
        filename: &str,
        declared_mime: &str,
        declared_size: u64,
    ) -> Result<UploadedFile, IngestionError> {
        let size = declared_size.max(data.len() as u64);
        let mime = validate_upload(declared_mime, size)?;

        let pathname = storage_pathname(filename, mime);
        let stored = self
            .blob
            .put(&pathname, data, mime.as_str())
            .await
            .map_err(IngestionError::Storage)?;

        info!(pathname = %stored.pathname, size, content_type = mime.as_str(), "Stored upload");

        Ok(UploadedFile {
            url: stored.url,
            pathname: stored.pathname,
            content_type: stored.content_type,
            size,
            uploaded_at: Utc::now(),
        })
    }

    /// Inserts exactly one row. Page count is left unknown.
    pub async fn create_document_record(
        &self,
        owner_id: Uuid,
        blob_url: &str,
        filename: &str,
        mime_type: &str,
        file_size: u64,
    ) -> PortResult<Document> {
        self.db
            .create_document(NewDocument {
                owner_id,
                blob_url: blob_url.to_string(),
                filename: filename.to_string(),
                mime_type: mime_type.to_string(),
                file_size,
            })
            .await
    }

    pub async fn owned_document(&self, document_id: Uuid, requester: Uuid) -> PortResult<Document> {
        owned_document(self.db.as_ref(), document_id, requester).await
    }

    /// Document metadata plus its result, if one has been produced.
    pub async fn get_document(
        &self,
        document_id: Uuid,
        requester: Uuid,
    ) -> PortResult<(Document, Option<DocumentResult>)> {
        let document = self.owned_document(document_id, requester).await?;
        let result = match self.db.get_result_by_document(document_id).await {
            Ok(result) => Some(result),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok((document, result))
    }

    pub async fn list_documents(&self, owner_id: Uuid) -> PortResult<Vec<DocumentListing>> {
        self.db.list_documents(owner_id).await
    }

    /// Owner-only delete. The blob goes first on a best-effort basis, then the
    /// result row, then the document row.
    pub async fn delete_document(&self, document_id: Uuid, requester: Uuid) -> PortResult<()> {
        let document = self.owned_document(document_id, requester).await?;

        if let Err(e) = self.blob.delete(&document.blob_url).await {
            warn!(%document_id, error = %e, "Failed to delete blob; continuing with record deletion");
        }

        self.db.delete_result(document_id).await?;
        self.db.delete_document(document_id).await?;

        info!(%document_id, "Document deleted");
        Ok(())
    }
}
