//! The staging store: one JSON file per staged item, keyed by stage id.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use careerkb_shared::{
    CareerKbError, Entry, Result, SourceInfo, StageId, StageStatus, StagedItem, StoreSettings,
};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{fsio, lock};

const RESOURCE: &str = "staging";

/// Durable holding area for proposed knowledge-base changes.
///
/// Every mutation holds the store lock; reads rely on atomic renames and
/// never observe a partially written item.
#[derive(Debug)]
pub struct StagingStore {
    dir: PathBuf,
    settings: StoreSettings,
    lock: Mutex<()>,
}

impl StagingStore {
    /// Open (creating if needed) the staging directory.
    pub async fn open(dir: impl Into<PathBuf>, settings: StoreSettings) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CareerKbError::io(&dir, e))?;
        fsio::remove_stale_temps(&dir).await?;
        debug!(dir = %dir.display(), "opened staging store");
        Ok(Self {
            dir,
            settings,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn item_path(&self, id: StageId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Stage draft entries as a new Pending item.
    pub async fn stage(&self, entries: Vec<Entry>, source: SourceInfo) -> Result<StageId> {
        self.insert(StagedItem::new(entries, source)).await
    }

    /// Persist a freshly built Pending item. Fails if its id already exists.
    pub async fn insert(&self, item: StagedItem) -> Result<StageId> {
        if item.status != StageStatus::Pending {
            return Err(CareerKbError::validation(format!(
                "new staged item {} must be pending, not {}",
                item.id, item.status
            )));
        }
        let mut seen = HashSet::new();
        for entry in &item.payload {
            entry.validate()?;
            if !seen.insert(&entry.id) {
                return Err(CareerKbError::validation(format!(
                    "duplicate draft id {} in staged item {}",
                    entry.id, item.id
                )));
            }
        }

        let _guard = lock::acquire(&self.lock, RESOURCE, self.settings.lock_timeout).await?;
        let path = self.item_path(item.id);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CareerKbError::io(&path, e))?;
        if exists {
            return Err(CareerKbError::validation(format!(
                "staged item {} already exists",
                item.id
            )));
        }

        fsio::with_retry(self.settings.retry_backoff, || {
            fsio::write_json_atomic(&path, &item)
        })
        .await?;
        info!(stage_id = %item.id, entries = item.payload.len(), source = %item.source.label, "staged item");
        Ok(item.id)
    }

    pub async fn get(&self, id: StageId) -> Result<StagedItem> {
        let path = self.item_path(id);
        fsio::with_retry(self.settings.retry_backoff, || fsio::read_json(&path))
            .await?
            .ok_or_else(|| CareerKbError::NotFound(format!("staged item {id}")))
    }

    /// All staged items, newest first, optionally filtered by status.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub async fn list(&self, status: Option<StageStatus>) -> Result<Vec<StagedItem>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CareerKbError::io(&self.dir, e))?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CareerKbError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !fsio::is_visible(&name) || !name.ends_with(".json") {
                continue;
            }
            let path = entry.path();
            match fsio::read_json::<StagedItem>(&path).await {
                Ok(Some(item)) => {
                    if status.is_none_or(|s| s == item.status) {
                        items.push(item);
                    }
                }
                // Deleted between read_dir and read.
                Ok(None) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable staged item"),
            }
        }

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    /// Read-modify-write of one item under the store lock.
    ///
    /// `f` may reject the change by returning an error, in which case nothing
    /// is written.
    pub async fn modify<F>(&self, id: StageId, f: F) -> Result<StagedItem>
    where
        F: FnOnce(&mut StagedItem) -> Result<()>,
    {
        let _guard = lock::acquire(&self.lock, RESOURCE, self.settings.lock_timeout).await?;
        let mut item = self.get(id).await?;
        f(&mut item)?;
        if item.id != id {
            return Err(CareerKbError::validation("staged item id cannot change"));
        }
        item.updated_at = Utc::now();

        let path = self.item_path(id);
        fsio::with_retry(self.settings.retry_backoff, || {
            fsio::write_json_atomic(&path, &item)
        })
        .await?;
        debug!(stage_id = %id, status = %item.status, "updated staged item");
        Ok(item)
    }

    /// Delete a resolved item. Pending items cannot be deleted.
    pub async fn delete(&self, id: StageId) -> Result<()> {
        let _guard = lock::acquire(&self.lock, RESOURCE, self.settings.lock_timeout).await?;
        let item = self.get(id).await?;
        if item.status == StageStatus::Pending {
            return Err(CareerKbError::validation(format!(
                "staged item {id} is pending review and cannot be deleted"
            )));
        }
        fsio::remove_if_exists(&self.item_path(id)).await?;
        info!(stage_id = %id, status = %item.status, "deleted staged item");
        Ok(())
    }

    /// Delete resolved items whose resolution is older than `older_than`.
    pub async fn purge(&self, older_than: chrono::Duration) -> Result<Vec<StageId>> {
        let cutoff = Utc::now() - older_than;
        let candidates = self.list(None).await?;

        let _guard = lock::acquire(&self.lock, RESOURCE, self.settings.lock_timeout).await?;
        let mut removed = Vec::new();
        for item in candidates {
            if !item.status.is_terminal() {
                continue;
            }
            let resolved_at = item
                .resolution
                .as_ref()
                .map_or(item.updated_at, |r| r.at());
            if resolved_at < cutoff && fsio::remove_if_exists(&self.item_path(item.id)).await? {
                removed.push(item.id);
            }
        }
        info!(removed = removed.len(), "purged resolved staged items");
        Ok(removed)
    }
}
