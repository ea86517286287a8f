//! Ingestion core
//!
//! Turns an inbound upload (raw body or multipart) into stored objects under
//! the configured storage root.
//!
//! # Flow
//!
//! 1. Classify the request by content type ([`classify`])
//! 2. Derive a safe, unique destination name ([`sanitize`])
//! 3. Stream the bytes into a staging file under `<root>/.incoming` ([`writer`])
//! 4. Publish the staging file under its final name without overwriting ([`commit`])
//!
//! Every failure path removes the staging file ([`temp_file::TemporaryArtifact`]).
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use futures::StreamExt;
//! use local_uploadr::config::{RouteConfig, StorageConfig};
//! use local_uploadr::ingest::{prepare_storage, IngestOutcome, Ingestor, UploadRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = StorageConfig::with_root("uploads");
//! prepare_storage(&storage).await?;
//!
//! let ingestor = Ingestor::new(storage);
//! let body = futures::stream::iter(vec![Ok(Bytes::from_static(b"hello"))]).boxed();
//! let request = UploadRequest::new(Some("application/octet-stream"), body)
//!     .with_declared_name("hello.txt");
//!
//! if let IngestOutcome::Single(object) = ingestor
//!     .ingest(&RouteConfig::raw("/binaryUpload"), request)
//!     .await?
//! {
//!     println!("stored {} ({} bytes)", object.name, object.size_bytes);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::{RouteConfig, RouteMode, StorageConfig};
use crate::metrics;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod classify;
pub mod commit;
pub mod multipart;
pub mod sanitize;
pub mod temp_file;
pub mod writer;

pub use classify::ContentKind;
pub use sanitize::SanitizedName;
pub use temp_file::TemporaryArtifact;

/// Directory under the storage root holding in-flight uploads
pub const STAGING_DIR: &str = ".incoming";

/// Request body as a stream of byte chunks
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Error taxonomy callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedMediaType,
    MissingMetadata,
    MissingPayload,
    PayloadTooLarge,
    IoError,
    CommitFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedMediaType => "unsupported_media_type",
            ErrorKind::MissingMetadata => "missing_metadata",
            ErrorKind::MissingPayload => "missing_payload",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::IoError => "io_error",
            ErrorKind::CommitFailed => "commit_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    #[error("Missing payload: {0}")]
    MissingPayload(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::UnsupportedMediaType(_) => ErrorKind::UnsupportedMediaType,
            IngestError::MissingMetadata(_) => ErrorKind::MissingMetadata,
            IngestError::MissingPayload(_) => ErrorKind::MissingPayload,
            IngestError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            IngestError::Io(_) => ErrorKind::IoError,
            IngestError::CommitFailed(_) => ErrorKind::CommitFailed,
        }
    }
}

/// One inbound upload, as handed over by the HTTP layer
pub struct UploadRequest {
    /// Raw `Content-Type` header value
    pub content_type: Option<String>,
    /// Untrusted name from a side-channel header (raw uploads)
    pub declared_name: Option<String>,
    /// `Content-Length`, if the client sent one
    pub declared_length: Option<u64>,
    pub body: ByteStream,
}

impl UploadRequest {
    pub fn new(content_type: Option<&str>, body: ByteStream) -> Self {
        Self {
            content_type: content_type.map(str::to_string),
            declared_name: None,
            declared_length: None,
            body,
        }
    }

    pub fn with_declared_name(mut self, name: &str) -> Self {
        self.declared_name = Some(name.to_string());
        self
    }

    pub fn with_declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }
}

/// One file part of a multipart upload
pub struct UploadPart {
    pub field: Option<String>,
    /// Untrusted file name from the part's `Content-Disposition`
    pub declared_name: Option<String>,
    pub body: ByteStream,
}

/// A published object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub name: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the stored bytes
    pub sha256: String,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Result for one part of a multi-file upload
#[derive(Debug)]
pub struct PartOutcome {
    pub index: usize,
    pub field: Option<String>,
    pub declared_name: Option<String>,
    pub result: Result<StoredObject, IngestError>,
}

/// Per-part results of a multi-file upload
#[derive(Debug, Default)]
pub struct BatchReport {
    pub parts: Vec<PartOutcome>,
}

impl BatchReport {
    pub fn committed(&self) -> impl Iterator<Item = &StoredObject> {
        self.parts.iter().filter_map(|part| part.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PartOutcome> {
        self.parts.iter().filter(|part| part.result.is_err())
    }

    /// True when at least one part failed
    pub fn is_partial(&self) -> bool {
        self.failed().next().is_some()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Successful ingestion result
#[derive(Debug)]
pub enum IngestOutcome {
    Single(StoredObject),
    Batch(BatchReport),
}

/// Create the storage root and its staging directory.
///
/// Startup routine; the ingestion calls themselves never create directories.
pub async fn prepare_storage(storage: &StorageConfig) -> io::Result<()> {
    tokio::fs::create_dir_all(storage.root.join(STAGING_DIR)).await?;
    info!(root = %storage.root.display(), "Storage root ready");
    Ok(())
}

/// Ingestion core
///
/// Stateless apart from its configuration; one instance serves any number of
/// concurrent calls.
#[derive(Debug, Clone)]
pub struct Ingestor {
    storage: StorageConfig,
    staging: PathBuf,
}

impl Ingestor {
    pub fn new(storage: StorageConfig) -> Self {
        let staging = storage.root.join(STAGING_DIR);
        Self { storage, staging }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn root(&self) -> &Path {
        &self.storage.root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Ingest one request arriving on `route`
    #[tracing::instrument(
        name = "ingest",
        skip(self, route, request),
        fields(
            route = %route.path,
            mode = route.mode.as_str(),
            http.content_type = ?request.content_type,
            upload.declared_length = ?request.declared_length
        ),
        err
    )]
    pub async fn ingest(
        &self,
        route: &RouteConfig,
        request: UploadRequest,
    ) -> Result<IngestOutcome, IngestError> {
        let start_time = Instant::now();
        let result = self.dispatch(route, request).await;
        let duration = start_time.elapsed();

        metrics::record_upload_duration(&route.path, route.mode.as_str(), duration.as_secs_f64());
        match &result {
            Ok(IngestOutcome::Single(object)) => {
                metrics::record_upload_success(&route.path, object.size_bytes);
                info!(
                    name = %object.name,
                    size_bytes = object.size_bytes,
                    duration_ms = duration.as_millis(),
                    "Upload committed"
                );
            }
            Ok(IngestOutcome::Batch(report)) => {
                metrics::record_batch_parts(report.len());
                for part in &report.parts {
                    match &part.result {
                        Ok(object) => metrics::record_upload_success(&route.path, object.size_bytes),
                        Err(e) => metrics::record_upload_failure(&route.path, e.kind().as_str()),
                    }
                }
                info!(
                    parts = report.len(),
                    committed = report.committed().count(),
                    failed = report.failed().count(),
                    duration_ms = duration.as_millis(),
                    "Multi-file upload finished"
                );
            }
            Err(e) => {
                metrics::record_upload_failure(&route.path, e.kind().as_str());
            }
        }

        result
    }

    async fn dispatch(
        &self,
        route: &RouteConfig,
        request: UploadRequest,
    ) -> Result<IngestOutcome, IngestError> {
        let kind = classify::classify(
            route,
            request.content_type.as_deref(),
            request.declared_name.as_deref(),
        )?;
        debug!(?kind, "Upload classified");

        match (kind, route.mode) {
            (ContentKind::RawBinary { declared_name }, _) => self
                .ingest_raw(&declared_name, request.declared_length, request.body)
                .await
                .map(IngestOutcome::Single),
            (ContentKind::Multipart { boundary }, RouteMode::Multiple) => {
                let parts = multipart::parts(request.body, boundary, &route.field);
                Ok(IngestOutcome::Batch(self.ingest_parts(parts).await))
            }
            (ContentKind::Multipart { boundary }, _) => {
                let parts = multipart::parts(request.body, boundary, &route.field);
                self.ingest_single(parts).await.map(IngestOutcome::Single)
            }
        }
    }

    /// Store a raw body under `declared_name`
    pub async fn ingest_raw(
        &self,
        declared_name: &str,
        declared_length: Option<u64>,
        body: ByteStream,
    ) -> Result<StoredObject, IngestError> {
        self.store(Some(declared_name), declared_length, body).await
    }

    /// Store the first part of `parts`; later parts are dropped unread
    pub async fn ingest_single<S>(&self, parts: S) -> Result<StoredObject, IngestError>
    where
        S: Stream<Item = Result<UploadPart, IngestError>>,
    {
        futures::pin_mut!(parts);

        let part = match parts.next().await {
            Some(part) => part?,
            None => {
                return Err(IngestError::MissingPayload(
                    "no file part in multipart body".into(),
                ))
            }
        };
        let object = self
            .store(part.declared_name.as_deref(), None, part.body)
            .await?;

        let mut ignored = 0usize;
        while let Some(extra) = parts.next().await {
            match extra {
                Ok(_) => ignored += 1,
                Err(e) => {
                    warn!(error = %e, "Multipart body broke after the stored part");
                    break;
                }
            }
        }
        if ignored > 0 {
            warn!(ignored, name = %object.name, "Ignored extra file parts on single-file route");
        }

        Ok(object)
    }

    /// Store every part independently; one failing part never undoes another
    pub async fn ingest_parts<S>(&self, parts: S) -> BatchReport
    where
        S: Stream<Item = Result<UploadPart, IngestError>>,
    {
        futures::pin_mut!(parts);

        let mut report = BatchReport::default();
        let mut index = 0usize;

        while let Some(item) = parts.next().await {
            match item {
                Ok(part) => {
                    let field = part.field;
                    let declared_name = part.declared_name;
                    let result = self.store(declared_name.as_deref(), None, part.body).await;
                    if let Err(e) = &result {
                        warn!(index, error = %e, "Multipart part failed");
                    }
                    report.parts.push(PartOutcome {
                        index,
                        field,
                        declared_name,
                        result,
                    });
                }
                Err(e) => {
                    // Framing lost before a part's headers were read; no part to name.
                    warn!(index, error = %e, "Multipart body broke");
                    report.parts.push(PartOutcome {
                        index,
                        field: None,
                        declared_name: None,
                        result: Err(e),
                    });
                    break;
                }
            }
            index += 1;
        }

        report
    }

    /// Sanitize, stream, commit
    async fn store(
        &self,
        declared_name: Option<&str>,
        declared_length: Option<u64>,
        body: ByteStream,
    ) -> Result<StoredObject, IngestError> {
        writer::check_declared_length(declared_length, self.storage.max_upload_bytes)?;

        let name = sanitize::resolve(self.root(), declared_name).await?;
        debug!(declared = ?declared_name, name = %name, "Upload name sanitized");

        let mut artifact = TemporaryArtifact::create(&self.staging).await?;
        let written = writer::write_stream(
            &mut artifact,
            body,
            self.storage.max_upload_bytes,
            self.storage.buffer_size,
        )
        .await?;
        debug!(name = %name, size_bytes = written.size_bytes, "Upload written to staging");

        commit::commit(artifact, self.root(), name, written).await
    }
}
