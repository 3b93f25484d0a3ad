//! Small filesystem helpers shared by the file-backed queue and result
//! store: atomic writes and best-effort directory fsync.

use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::error::BackendError;

/// Writes `bytes` to `path` atomically: write to `<path>.tmp`, flush, then
/// rename into place.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Flushes directory metadata so a rename survives power loss.
///
/// Directories cannot be fsynced on all platforms; failures are logged and
/// ignored.
#[cfg(unix)]
pub(crate) fn fsync_dir(dir: &Path) {
    match std::fs::File::open(dir) {
        Ok(f) => {
            if let Err(e) = f.sync_all() {
                log::debug!("fsync of {} failed: {e}", dir.display());
            }
        }
        Err(e) => log::debug!("open of {} for fsync failed: {e}", dir.display()),
    }
}

#[cfg(not(unix))]
pub(crate) fn fsync_dir(_dir: &Path) {}
