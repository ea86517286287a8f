//! Commit step
//!
//! Publishes a fully written staging file under its final name. The publish
//! is a single filesystem operation that refuses to replace an existing
//! entry, so readers never see a partial file and concurrent uploads never
//! overwrite each other.

use super::sanitize::{self, SanitizedName};
use super::temp_file::TemporaryArtifact;
use super::writer::Written;
use super::{IngestError, StoredObject};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Publish `artifact` as `<root>/<name>`.
///
/// If `name` was taken between sanitizing and now, the publish is retried
/// once under a randomized variant; a second collision fails the commit.
#[tracing::instrument(
    name = "ingest.commit",
    skip(artifact, root, name, written),
    fields(name = %name),
    err
)]
pub async fn commit(
    mut artifact: TemporaryArtifact,
    root: &Path,
    name: SanitizedName,
    written: Written,
) -> Result<StoredObject, IngestError> {
    commit_with(artifact, root, name, written, sanitize::with_random_suffix).await
}

/// [`commit`] with the name used for the single retry supplied by `retry_name`
async fn commit_with<F>(
    mut artifact: TemporaryArtifact,
    root: &Path,
    name: SanitizedName,
    written: Written,
    retry_name: F,
) -> Result<StoredObject, IngestError>
where
    F: FnOnce(&SanitizedName) -> SanitizedName,
{
    artifact.close();

    let name = match publish(artifact.path(), &root.join(name.as_str())).await {
        Ok(()) => name,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            // Racing uploads all lost to the same winner; counters would collide again.
            let retry = retry_name(&name);
            warn!(name = %name, retry = %retry, "Destination taken during commit, choosing another name");
            publish(artifact.path(), &root.join(retry.as_str()))
                .await
                .map_err(|e| IngestError::CommitFailed(format!("publishing {}: {}", retry, e)))?;
            retry
        }
        Err(e) => {
            return Err(IngestError::CommitFailed(format!("publishing {}: {}", name, e)));
        }
    };

    artifact.mark_published();
    sync_dir(root).await;

    let path = root.join(name.as_str());
    debug!(path = %path.display(), "Upload published");

    Ok(StoredObject {
        name: name.into_string(),
        size_bytes: written.size_bytes,
        sha256: written.sha256,
        path,
    })
}

/// Link `staging` to `target`, failing with `AlreadyExists` if `target` is taken.
///
/// The staging name itself is removed by the artifact's owner.
async fn publish(staging: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(staging, target).await {
        Ok(()) => Ok(()),
        Err(e) if is_link_unsupported(&e) => {
            // Check-then-rename leaves a narrow window; only reached on
            // filesystems without hard links.
            debug!(error = %e, "Hard links unavailable, publishing by rename");
            if fs::try_exists(target).await? {
                return Err(io::Error::from(io::ErrorKind::AlreadyExists));
            }
            fs::rename(staging, target).await
        }
        Err(e) => Err(e),
    }
}

fn is_link_unsupported(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
    )
}

/// Persist the new directory entry. Best effort: not every platform can
/// fsync a directory.
async fn sync_dir(dir: &Path) {
    let result = match fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!(dir = %dir.display(), error = %e, "Directory sync skipped");
    }
}
