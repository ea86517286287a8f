//! Streaming writer
//!
//! Copies a byte stream into a staging file through a fixed-size buffer, so
//! memory use does not grow with the payload. Size limits are enforced both
//! up front (declared length) and while streaming (running total).

use super::temp_file::TemporaryArtifact;
use super::IngestError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::io;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Default copy buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 65536; // 64KB

/// Result of a completed copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub size_bytes: u64,
    /// Hex SHA-256 of everything written
    pub sha256: String,
}

/// Reject a payload whose declared length already exceeds `limit`
pub fn check_declared_length(declared: Option<u64>, limit: Option<u64>) -> Result<(), IngestError> {
    match (declared, limit) {
        (Some(size), Some(limit)) if size > limit => {
            Err(IngestError::PayloadTooLarge { size, limit })
        }
        _ => Ok(()),
    }
}

/// Copy `source` into `artifact`, then flush and fsync it.
///
/// On error the artifact is left as is; its owner drops it, which removes the
/// partial file.
#[tracing::instrument(
    name = "ingest.write",
    skip(artifact, source),
    fields(
        staging = %artifact.path().display(),
        upload.bytes = tracing::field::Empty
    ),
    err
)]
pub async fn write_stream<S>(
    artifact: &mut TemporaryArtifact,
    source: S,
    limit: Option<u64>,
    buffer_size: usize,
) -> Result<Written, IngestError>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    futures::pin_mut!(source);

    let mut writer = BufWriter::with_capacity(buffer_size, artifact.file_mut()?);
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;

    while let Some(chunk) = source.next().await {
        let chunk = chunk?;
        let next = total.saturating_add(chunk.len() as u64);
        if let Some(limit) = limit {
            if next > limit {
                return Err(IngestError::PayloadTooLarge { size: next, limit });
            }
        }

        hasher.update(&chunk);
        writer.write_all(&chunk).await?;
        total = next;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    artifact.set_size(total);

    tracing::Span::current().record("upload.bytes", total);

    Ok(Written {
        size_bytes: total,
        sha256: hex::encode(hasher.finalize()),
    })
}
