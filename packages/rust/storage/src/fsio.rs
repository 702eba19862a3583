//! Crash-safe file primitives shared by both stores.
//!
//! Writes go to a uniquely named dot-prefixed `.tmp` sibling, are fsynced,
//! then renamed over the target. Readers skip dot-files, so an interrupted
//! write is never observed.

use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use careerkb_shared::{CareerKbError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Whether a directory entry name belongs to the store (not a temp or
/// journal file).
pub(crate) fn is_visible(name: &str) -> bool {
    !name.starts_with('.')
}

/// Serialize `value` as pretty JSON.
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CareerKbError::validation(format!("JSON serialization failed: {e}")))
}

/// Replace `path` with `contents` atomically.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CareerKbError::validation(format!("{} has no parent", path.display())))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CareerKbError::validation(format!("bad file name {}", path.display())))?;
    let temp = dir.join(format!(".{name}.{}.tmp", Uuid::now_v7()));

    let result = async {
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| CareerKbError::io(&temp, e))?;
        file.write_all(contents)
            .await
            .map_err(|e| CareerKbError::io(&temp, e))?;
        file.sync_all()
            .await
            .map_err(|e| CareerKbError::io(&temp, e))?;
        drop(file);

        tokio::fs::rename(&temp, path)
            .await
            .map_err(|e| CareerKbError::io(path, e))?;
        sync_dir(dir).await
    }
    .await;

    match &result {
        Ok(()) => debug!(path = %path.display(), size = contents.len(), "wrote file"),
        Err(_) => {
            let _ = tokio::fs::remove_file(&temp).await;
        }
    }
    result
}

/// Serialize and atomically write a JSON document.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = to_json(value)?;
    write_atomic(path, json.as_bytes()).await
}

/// Read and parse a JSON document. `Ok(None)` when the file does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CareerKbError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CareerKbError::validation(format!("{}: {e}", path.display())))
}

/// Remove a file, treating "already gone" as success.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CareerKbError::io(path, e)),
    }
}

/// Delete temp files abandoned by interrupted writes.
pub(crate) async fn remove_stale_temps(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CareerKbError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CareerKbError::io(dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(".tmp") {
            remove_if_exists(&entry.path()).await?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "removed stale temp files");
    }
    Ok(removed)
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    let handle = tokio::fs::File::open(dir)
        .await
        .map_err(|e| CareerKbError::io(dir, e))?;
    handle.sync_all().await.map_err(|e| CareerKbError::io(dir, e))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn is_transient(err: &CareerKbError) -> bool {
    matches!(
        err,
        CareerKbError::Io { source, .. }
            if matches!(
                source.kind(),
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
            )
    )
}

/// Run `op`, retrying once after `backoff` when it fails transiently.
pub(crate) async fn with_retry<T, F, Fut>(backoff: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(err) if is_transient(&err) => {
            warn!(error = %err, backoff_ms = backoff.as_millis() as u64, "transient store error, retrying");
            tokio::time::sleep(backoff).await;
            op().await
        }
        other => other,
    }
}
