//! The live knowledge base: one JSON array per category plus `manifest.json`.
//!
//! Commits go through a redo journal (`.commit.json`) holding the complete
//! new contents of every file the commit touches. Writing the journal is the
//! commit point; the files are then replaced one by one and the journal is
//! removed. A journal left behind by a crash is replayed on open and before
//! every load, so readers only ever see the pre-commit or post-commit state.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use careerkb_shared::{
    CareerKbError, Category, Entry, EntryId, KbManifest, KnowledgeBase, MalformedEntry, Result,
    RevisionMarker, StageId, StoreSettings,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::{fsio, lock};

const RESOURCE: &str = "knowledge base";
const MANIFEST_FILE: &str = "manifest.json";
const JOURNAL_FILE: &str = ".commit.json";

/// The entries a single approval writes.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub stage_id: StageId,
    /// Entries to insert, or to replace in place when an entry with the
    /// same id already exists in the category.
    pub upserts: Vec<Entry>,
    /// Draft ids skipped as duplicates, recorded in the revision marker.
    pub skipped: Vec<EntryId>,
    pub overridden: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    revision: u64,
    files: Vec<JournalFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalFile {
    name: String,
    contents: String,
}

/// Where a simulated crash interrupts a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(test), allow(dead_code))]
enum Interrupt {
    Never,
    /// The journal temp file is written but never renamed into place.
    DuringJournal,
    /// The journal is durable but no file has been replaced.
    AfterJournal,
    /// This many files have been replaced.
    AfterFiles(usize),
}

/// File-backed knowledge base guarded by a single-writer lock.
#[derive(Debug)]
pub struct KnowledgeBaseStore {
    root: PathBuf,
    name: String,
    settings: StoreSettings,
    lock: Mutex<()>,
}

/// Exclusive access to the knowledge base for the guard's lifetime.
pub struct KbGuard<'a> {
    store: &'a KnowledgeBaseStore,
    _guard: MutexGuard<'a, ()>,
}

impl KnowledgeBaseStore {
    /// Open (creating if needed) the knowledge-base directory and replay any
    /// unfinished commit.
    pub async fn open(root: impl Into<PathBuf>, settings: StoreSettings) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| CareerKbError::io(&root, e))?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "knowledge_base".into());

        let store = Self {
            root,
            name,
            settings,
            lock: Mutex::new(()),
        };
        {
            let _guard = store.lock().await?;
            store.recover().await?;
            fsio::remove_stale_temps(&store.root).await?;
        }
        debug!(root = %store.root.display(), "opened knowledge base");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the writer lock, bounded by the configured timeout.
    pub async fn lock(&self) -> Result<KbGuard<'_>> {
        let guard = lock::acquire(&self.lock, RESOURCE, self.settings.lock_timeout).await?;
        Ok(KbGuard {
            store: self,
            _guard: guard,
        })
    }

    /// Load a consistent copy of the knowledge base.
    pub async fn snapshot(&self) -> Result<KnowledgeBase> {
        self.lock().await?.load().await
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Finish a commit interrupted after its journal became durable.
    async fn recover(&self) -> Result<()> {
        let journal_path = self.path(JOURNAL_FILE);
        let journal: Journal = match fsio::read_json(&journal_path).await {
            Ok(Some(journal)) => journal,
            Ok(None) => return Ok(()),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                // The journal is renamed into place whole, so this is not a torn write.
                return Err(CareerKbError::validation(format!(
                    "unreadable commit journal: {err}"
                )));
            }
        };
        warn!(revision = journal.revision, "replaying interrupted knowledge-base commit");
        self.apply(&journal, Interrupt::Never).await?;
        fsio::remove_if_exists(&journal_path).await?;
        info!(revision = journal.revision, "recovered knowledge-base commit");
        Ok(())
    }

    async fn apply(&self, journal: &Journal, interrupt: Interrupt) -> Result<()> {
        for (done, file) in journal.files.iter().enumerate() {
            if interrupt == Interrupt::AfterFiles(done) {
                return Err(simulated_crash());
            }
            let path = self.path(&file.name);
            fsio::with_retry(self.settings.retry_backoff, || {
                fsio::write_atomic(&path, file.contents.as_bytes())
            })
            .await?;
        }
        Ok(())
    }

    async fn read_manifest(&self) -> Result<KbManifest> {
        let path = self.path(MANIFEST_FILE);
        let manifest = fsio::with_retry(self.settings.retry_backoff, || {
            fsio::read_json::<KbManifest>(&path)
        })
        .await?;
        Ok(manifest.unwrap_or_else(|| KbManifest::new(self.name.clone())))
    }

    async fn read_category(&self, category: Category) -> Result<(Vec<Entry>, Vec<MalformedEntry>)> {
        let path = self.path(category.file_name());
        let raw = match fsio::read_json::<serde_json::Value>(&path).await {
            Ok(raw) => raw,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                return Ok((
                    Vec::new(),
                    vec![MalformedEntry {
                        category,
                        index: 0,
                        reason: err.to_string(),
                    }],
                ));
            }
        };

        let values = match raw {
            None => return Ok((Vec::new(), Vec::new())),
            Some(serde_json::Value::Array(values)) => values,
            Some(_) => {
                return Ok((
                    Vec::new(),
                    vec![MalformedEntry {
                        category,
                        index: 0,
                        reason: format!("{} is not a JSON array", category.file_name()),
                    }],
                ));
            }
        };

        let mut entries = Vec::with_capacity(values.len());
        let mut malformed = Vec::new();
        let mut ids = HashSet::new();
        for (index, value) in values.into_iter().enumerate() {
            let reason = match serde_json::from_value::<Entry>(value) {
                Err(e) => Some(e.to_string()),
                Ok(entry) if entry.category() != category => Some(format!(
                    "{} entry stored in {}",
                    entry.category(),
                    category.file_name()
                )),
                Ok(entry) if !ids.insert(entry.id.clone()) => {
                    Some(format!("duplicate id {}", entry.id))
                }
                Ok(entry) => match entry.validate() {
                    Ok(()) => {
                        entries.push(entry);
                        None
                    }
                    Err(e) => Some(e.to_string()),
                },
            };
            if let Some(reason) = reason {
                malformed.push(MalformedEntry {
                    category,
                    index,
                    reason,
                });
            }
        }
        Ok((entries, malformed))
    }
}

impl KbGuard<'_> {
    /// Read the whole knowledge base, replaying an unfinished commit first.
    pub async fn load(&self) -> Result<KnowledgeBase> {
        self.store.recover().await?;

        let manifest = self.store.read_manifest().await?;
        let mut collections = BTreeMap::new();
        let mut malformed = Vec::new();
        for category in Category::ALL {
            let (entries, bad) = self.store.read_category(category).await?;
            if !bad.is_empty() {
                warn!(%category, count = bad.len(), "malformed knowledge-base entries");
            }
            collections.insert(category, entries);
            malformed.extend(bad);
        }
        Ok(KnowledgeBase {
            manifest,
            collections,
            malformed,
        })
    }

    /// Apply `change` as one atomic commit and return its revision marker.
    pub async fn commit(&self, change: ChangeSet) -> Result<RevisionMarker> {
        self.commit_with(change, Interrupt::Never).await
    }

    #[instrument(skip_all, fields(stage_id = %change.stage_id, upserts = change.upserts.len()))]
    async fn commit_with(&self, change: ChangeSet, interrupt: Interrupt) -> Result<RevisionMarker> {
        let mut kb = self.load().await?;

        let touched: BTreeSet<Category> = change.upserts.iter().map(Entry::category).collect();
        if let Some(bad) = touched
            .iter()
            .find_map(|c| kb.malformed_in(*c).next())
        {
            return Err(CareerKbError::validation(format!(
                "refusing to rewrite {} while entry {} is malformed: {}",
                bad.category.file_name(),
                bad.index,
                bad.reason
            )));
        }

        let mut applied = Vec::with_capacity(change.upserts.len());
        for entry in change.upserts {
            entry.validate()?;
            applied.push(entry.id.clone());
            let collection = kb.collections.entry(entry.category()).or_default();
            match collection.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => collection.push(entry),
            }
        }

        let now = Utc::now();
        let marker = RevisionMarker {
            revision: kb.manifest.revision + 1,
            stage_id: change.stage_id,
            applied,
            skipped: change.skipped,
            overridden: change.overridden,
            committed_at: now,
        };
        kb.manifest.revision = marker.revision;
        kb.manifest.updated_at = now;
        kb.manifest.revisions.push(marker.clone());

        let mut files = Vec::with_capacity(touched.len() + 1);
        for category in &touched {
            files.push(JournalFile {
                name: category.file_name().to_string(),
                contents: fsio::to_json(kb.entries(*category))?,
            });
        }
        files.push(JournalFile {
            name: MANIFEST_FILE.to_string(),
            contents: fsio::to_json(&kb.manifest)?,
        });
        let journal = Journal {
            revision: marker.revision,
            files,
        };

        let journal_path = self.store.path(JOURNAL_FILE);
        if interrupt == Interrupt::DuringJournal {
            let torn = fsio::to_json(&journal)?;
            let temp = self.store.path(".commit.json.torn.tmp");
            tokio::fs::write(&temp, &torn.as_bytes()[..torn.len() / 2])
                .await
                .map_err(|e| CareerKbError::io(&temp, e))?;
            return Err(simulated_crash());
        }
        fsio::with_retry(self.store.settings.retry_backoff, || {
            fsio::write_json_atomic(&journal_path, &journal)
        })
        .await?;
        if interrupt == Interrupt::AfterJournal {
            return Err(simulated_crash());
        }

        self.store.apply(&journal, interrupt).await?;
        fsio::remove_if_exists(&journal_path).await?;

        info!(revision = marker.revision, applied = marker.applied.len(), "committed revision");
        Ok(marker)
    }
}

fn simulated_crash() -> CareerKbError {
    CareerKbError::io(
        PathBuf::from(JOURNAL_FILE),
        std::io::Error::other("simulated crash"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use careerkb_shared::{EmploymentKind, EntryKind, Provenance};
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ckb_kb_{}", Uuid::now_v7()))
    }

    async fn test_store() -> (KnowledgeBaseStore, PathBuf) {
        let dir = temp_dir();
        let store = KnowledgeBaseStore::open(&dir, StoreSettings::default())
            .await
            .expect("open kb");
        (store, dir)
    }

    fn experience(title: &str) -> Entry {
        Entry::draft(
            EntryKind::experience(Some("Acme".into()), EmploymentKind::FullTime),
            title,
            Provenance::new("cv.txt"),
        )
    }

    fn project(title: &str) -> Entry {
        Entry::draft(EntryKind::Project { url: None }, title, Provenance::new("cv.txt"))
    }

    fn change(upserts: Vec<Entry>) -> ChangeSet {
        ChangeSet {
            stage_id: StageId::new(),
            upserts,
            skipped: Vec::new(),
            overridden: false,
        }
    }

    /// Raw bytes of every visible file, for comparing on-disk states.
    fn disk_state(dir: &Path) -> BTreeMap<String, String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| fsio::is_visible(&e.file_name().to_string_lossy()))
            .map(|e| {
                (
                    e.file_name().to_string_lossy().into_owned(),
                    std::fs::read_to_string(e.path()).unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn empty_store_loads_defaults() {
        let (store, dir) = test_store().await;
        let kb = store.snapshot().await.unwrap();
        assert!(kb.is_empty());
        assert_eq!(kb.manifest.revision, 0);
        assert!(kb.malformed.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn commit_writes_entries_and_marker() {
        let (store, dir) = test_store().await;
        let entry = experience("Engineer");
        let id = entry.id.clone();

        let set = change(vec![entry, project("careerkb")]);
        let stage_id = set.stage_id;
        let marker = store.lock().await.unwrap().commit(set).await.unwrap();
        assert_eq!(marker.revision, 1);
        assert_eq!(marker.applied.len(), 2);

        let kb = store.snapshot().await.unwrap();
        assert_eq!(kb.entries(Category::Experience).len(), 1);
        assert_eq!(kb.entries(Category::Project).len(), 1);
        assert!(kb.get(Category::Experience, &id).is_some());
        assert_eq!(kb.manifest.marker_for(stage_id), Some(&marker));
        assert!(dir.join("experience.json").exists());
        assert!(!dir.join(JOURNAL_FILE).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let (store, dir) = test_store().await;
        let first = experience("Engineer");
        let second = experience("Manager");
        let guard = store.lock().await.unwrap();
        guard
            .commit(change(vec![first.clone(), second.clone()]))
            .await
            .unwrap();

        let mut revised = first.clone();
        revised.body = "Now with more detail".into();
        guard.commit(change(vec![revised])).await.unwrap();

        let kb = guard.load().await.unwrap();
        let entries = kb.entries(Category::Experience);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[0].body, "Now with more detail");
        assert_eq!(entries[1].id, second.id);
        assert_eq!(kb.manifest.revision, 2);

        drop(guard);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn malformed_entries_are_reported_not_loaded() {
        let (store, dir) = test_store().await;
        let good = project("good");
        let raw = serde_json::json!([
            serde_json::to_value(&good).unwrap(),
            {"id": "x", "kind": "project"},
            serde_json::to_value(&good).unwrap(),
        ]);
        std::fs::write(dir.join("projects.json"), raw.to_string()).unwrap();

        let kb = store.snapshot().await.unwrap();
        assert_eq!(kb.entries(Category::Project).len(), 1);
        assert_eq!(kb.malformed.len(), 2);
        assert_eq!(kb.malformed[0].index, 1);
        assert!(kb.malformed[1].reason.contains("duplicate id"));

        let err = store
            .lock()
            .await
            .unwrap()
            .commit(change(vec![project("new")]))
            .await
            .unwrap_err();
        assert!(matches!(err, CareerKbError::Validation { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    async fn interrupted_commit(interrupt: Interrupt) -> (BTreeMap<String, String>, BTreeMap<String, String>, BTreeMap<String, String>) {
        let (store, dir) = test_store().await;
        let guard = store.lock().await.unwrap();
        guard
            .commit(change(vec![experience("Engineer")]))
            .await
            .unwrap();
        let before = disk_state(&dir);

        let err = guard
            .commit_with(change(vec![experience("Manager"), project("careerkb")]), interrupt)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        drop(guard);
        drop(store);

        // A fresh process opens the store after the crash.
        let reopened = KnowledgeBaseStore::open(&dir, StoreSettings::default())
            .await
            .unwrap();
        let after = disk_state(&dir);
        let kb = reopened.snapshot().await.unwrap();
        assert!(kb.malformed.is_empty());

        // Reference: the same commit run to completion on a copy.
        let reference_dir = temp_dir();
        let reference = KnowledgeBaseStore::open(&reference_dir, StoreSettings::default())
            .await
            .unwrap();
        let guard = reference.lock().await.unwrap();
        guard.commit(change(vec![experience("Engineer")])).await.unwrap();
        guard
            .commit(change(vec![experience("Manager"), project("careerkb")]))
            .await
            .unwrap();
        let full = disk_state(&reference_dir);

        let _ = std::fs::remove_dir_all(&dir);
        let _ = std::fs::remove_dir_all(&reference_dir);
        (before, after, full)
    }

    fn shape(state: &BTreeMap<String, String>) -> BTreeMap<String, usize> {
        state
            .iter()
            .map(|(name, contents)| {
                let value: serde_json::Value = serde_json::from_str(contents).unwrap();
                let size = match &value {
                    serde_json::Value::Array(items) => items.len(),
                    other => other["revision"].as_u64().unwrap() as usize,
                };
                (name.clone(), size)
            })
            .collect()
    }

    #[tokio::test]
    async fn torn_journal_leaves_pre_commit_state() {
        let (before, after, _) = interrupted_commit(Interrupt::DuringJournal).await;
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn durable_journal_is_replayed_to_post_commit_state() {
        for interrupt in [
            Interrupt::AfterJournal,
            Interrupt::AfterFiles(1),
            Interrupt::AfterFiles(2),
        ] {
            let (before, after, full) = interrupted_commit(interrupt).await;
            assert_ne!(after, before, "{interrupt:?}");
            // Ids and timestamps differ from the reference run; compare shape.
            assert_eq!(shape(&after), shape(&full), "{interrupt:?}");
        }
    }
}
