//! Batch ingestion: documents → sanitize → normalize → stage → analyze.
//!
//! Documents are prepared concurrently; each one yields at most one staged
//! item. A failure local to one document is recorded in the report and the
//! rest of the batch continues. Store failures abort the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use careerkb_normalizer::{DocumentKind, NormalizeHints};
use careerkb_sanitizer::{merge_findings, sanitize, sanitize_entry};
use careerkb_shared::{
    AppConfig, CareerKbError, ExtractionConfig, Result, SanitizeOptions, SourceInfo,
    StageId, StagedItem, StagedSummary,
};
use careerkb_sources::{
    DocumentType, FileExtractor, HttpProfileScraper, PatentFetcher, ProfileScraper, TextExtractor,
};
use careerkb_storage::{KnowledgeBaseStore, StagingStore};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::conflict::ConflictResolver;

/// What to ingest in one batch.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub files: Vec<PathBuf>,
    pub profile_url: Option<String>,
    pub patent_urls: Vec<String>,
    /// Name of the person the documents describe.
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
enum Document {
    File(PathBuf),
    Profile(String),
    Patent(String),
}

impl Document {
    fn label(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Profile(url) | Self::Patent(url) => url.clone(),
        }
    }
}

impl IngestRequest {
    fn documents(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.files.iter().cloned().map(Document::File).collect();
        docs.extend(self.profile_url.clone().map(Document::Profile));
        docs.extend(self.patent_urls.iter().cloned().map(Document::Patent));
        docs
    }
}

/// A document that produced no staged item.
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub source: String,
    pub error: String,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub staged: Vec<StagedSummary>,
    pub failures: Vec<IngestFailure>,
}

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called once with the number of documents in the batch.
    fn started(&self, total: usize);
    /// Called as each document finishes, successfully or not.
    fn document_done(&self, source: &str, staged: bool);
    fn done(&self, report: &IngestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _total: usize) {}
    fn document_done(&self, _source: &str, _staged: bool) {}
    fn done(&self, _report: &IngestReport) {}
}

/// External collaborators used to read documents.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub profiles: Arc<dyn ProfileScraper>,
    pub patents: Arc<PatentFetcher>,
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            extractor: Arc::new(FileExtractor::new(ExtractionConfig::from(config))),
            profiles: Arc::new(HttpProfileScraper::new(&config.http)?),
            patents: Arc::new(PatentFetcher::new(&config.http)?),
        })
    }
}

/// Runs ingestion batches against the two stores.
#[derive(Clone)]
pub struct Ingestor {
    staging: Arc<StagingStore>,
    kb: Arc<KnowledgeBaseStore>,
    resolver: ConflictResolver,
    sanitize: Arc<SanitizeOptions>,
    sources: Collaborators,
    concurrency: usize,
}

/// Text read from one document, ready for sanitizing.
struct Extracted {
    text: String,
    hints: NormalizeHints,
    source: SourceInfo,
}

fn is_patent_file(path: &Path, kind: DocumentType) -> bool {
    kind == DocumentType::Pdf
        && path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_uppercase().starts_with("US"))
            .unwrap_or(false)
}

impl Ingestor {
    pub fn new(
        staging: Arc<StagingStore>,
        kb: Arc<KnowledgeBaseStore>,
        resolver: ConflictResolver,
        sanitize: SanitizeOptions,
        sources: Collaborators,
        concurrency: usize,
    ) -> Self {
        Self {
            staging,
            kb,
            resolver,
            sanitize: Arc::new(sanitize),
            sources,
            concurrency: concurrency.max(1),
        }
    }

    /// Ingest every document of `request`.
    ///
    /// Returns `Err` only for store failures; everything else is reported per
    /// document.
    #[instrument(skip_all, fields(files = request.files.len(), patents = request.patent_urls.len()))]
    pub async fn run(
        &self,
        request: &IngestRequest,
        progress: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        let docs = request.documents();
        progress.started(docs.len());
        info!(documents = docs.len(), concurrency = self.concurrency, "starting ingestion");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, doc) in docs.into_iter().enumerate() {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let name = request.name.clone();
            tasks.spawn(async move {
                let label = doc.label();
                let result = this.ingest_one(&doc, name, &semaphore, &cancel).await;
                (index, label, result)
            });
        }

        let mut staged = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, label, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    failures.push((usize::MAX, IngestFailure {
                        source: "task".into(),
                        error: e.to_string(),
                        cancelled: e.is_cancelled(),
                    }));
                    continue;
                }
            };
            match result {
                Ok(summary) => {
                    progress.document_done(&label, true);
                    staged.push((index, summary));
                }
                Err(e) if e.is_fatal() => {
                    warn!(source = %label, error = %e, "store failure, aborting batch");
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    warn!(source = %label, error = %e, "document failed");
                    progress.document_done(&label, false);
                    failures.push((index, IngestFailure {
                        source: label,
                        cancelled: matches!(e, CareerKbError::Cancelled(_)),
                        error: e.to_string(),
                    }));
                }
            }
        }

        staged.sort_by_key(|(index, _)| *index);
        failures.sort_by_key(|(index, _)| *index);
        let report = IngestReport {
            staged: staged.into_iter().map(|(_, s)| s).collect(),
            failures: failures.into_iter().map(|(_, f)| f).collect(),
        };
        info!(
            staged = report.staged.len(),
            failed = report.failures.len(),
            "ingestion finished"
        );
        progress.done(&report);
        Ok(report)
    }

    /// Prepare, stage and annotate one document. Cancellation is honored
    /// until the item is staged.
    async fn ingest_one(
        &self,
        doc: &Document,
        name: Option<String>,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<StagedSummary> {
        let cancelled = || CareerKbError::Cancelled(doc.label());
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            prepared = async {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| cancelled())?;
                self.prepare(doc, name).await
            } => prepared?,
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let id = self.staging.insert(item).await?;
        info!(stage_id = %id, source = %doc.label(), "staged document");
        self.annotate(id).await
    }

    /// Extract, sanitize and normalize one document into a Pending item.
    async fn prepare(&self, doc: &Document, name: Option<String>) -> Result<StagedItem> {
        let Extracted {
            text,
            hints,
            source,
        } = self.extract(doc, name).await?;
        let label = source.label.clone();

        let sanitized = sanitize(&text, &self.sanitize);
        if sanitized.encoding_warning {
            return Err(CareerKbError::parse(format!(
                "{label}: text encoding not recognized"
            )));
        }

        let normalized = careerkb_normalizer::normalize(&sanitized.text, &hints)?;
        let mut findings = sanitized.findings;
        let mut entries = normalized.entries;
        for entry in &mut entries {
            let extra = sanitize_entry(entry, &self.sanitize);
            merge_findings(&mut findings, &extra);
        }
        for finding in &findings {
            warn!(source = %label, category = %finding.category, count = finding.count, "redacted PII");
        }

        let mut item = StagedItem::new(entries, source);
        item.warnings = normalized.warnings;
        item.findings = findings;
        debug!(source = %label, entries = item.payload.len(), "prepared document");
        Ok(item)
    }

    async fn extract(&self, doc: &Document, name: Option<String>) -> Result<Extracted> {
        match doc {
            Document::File(path) => {
                let kind = DocumentType::from_path(path)?;
                let text = self.sources.extractor.extract(path, kind).await?;
                let label = path.display().to_string();
                let hints = NormalizeHints {
                    name: name.clone(),
                    kind: if is_patent_file(path, kind) {
                        DocumentKind::Patent
                    } else {
                        DocumentKind::General
                    },
                    ..NormalizeHints::file(&label)
                };
                Ok(Extracted {
                    text,
                    hints,
                    source: SourceInfo::file(label, name),
                })
            }
            Document::Profile(url) => {
                let fields = self.sources.profiles.scrape(url).await?;
                let name = name.or_else(|| fields.name.clone());
                Ok(Extracted {
                    text: fields.to_document_text(),
                    hints: NormalizeHints {
                        name: name.clone(),
                        source: url.clone(),
                        source_url: Some(url.clone()),
                        kind: DocumentKind::General,
                    },
                    source: SourceInfo::profile(url, name),
                })
            }
            Document::Patent(url) => {
                let page = self.sources.patents.fetch(url).await?;
                Ok(Extracted {
                    text: page.to_document_text(),
                    hints: NormalizeHints {
                        name: name.clone(),
                        source: url.clone(),
                        source_url: Some(url.clone()),
                        kind: DocumentKind::General,
                    },
                    source: SourceInfo {
                        label: url.clone(),
                        name_hint: name,
                        ..SourceInfo::default()
                    },
                })
            }
        }
    }

    /// Annotate a freshly staged item. Analysis errors leave it unannotated
    /// with a warning.
    async fn annotate(&self, id: StageId) -> Result<StagedSummary> {
        let kb = self.kb.snapshot().await?;
        let item = self.staging.get(id).await?;
        let stored = match self.resolver.analyze(&item, &kb) {
            Ok(analyzed) => {
                self.staging
                    .modify(id, move |stored| {
                        stored.annotations = analyzed.annotations;
                        stored.analyzed_at = analyzed.analyzed_at;
                        Ok(())
                    })
                    .await?
            }
            Err(e) => {
                warn!(stage_id = %id, error = %e, "conflict analysis failed, item left unannotated");
                let message = e.to_string();
                self.staging
                    .modify(id, move |stored| {
                        stored.warnings.push(message);
                        Ok(())
                    })
                    .await?
            }
        };
        Ok(stored.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use careerkb_shared::{
        Category, HttpConfig, PiiCategory, Relation, ScrapeFailure, StageStatus, StoreSettings,
    };
    use careerkb_sources::ProfileFields;
    use uuid::Uuid;

    const RESUME: &str = include_str!("../../../../fixtures/documents/resume.txt");

    struct FakeProfiles(Result<ProfileFields>);

    #[async_trait]
    impl ProfileScraper for FakeProfiles {
        async fn scrape(&self, url: &str) -> Result<ProfileFields> {
            match &self.0 {
                Ok(fields) => Ok(ProfileFields {
                    url: url.to_string(),
                    ..fields.clone()
                }),
                Err(_) => Err(CareerKbError::scrape(
                    url,
                    ScrapeFailure::PrivateProfile,
                    "login wall",
                )),
            }
        }
    }

    struct Fixture {
        dir: PathBuf,
        staging: Arc<StagingStore>,
        kb: Arc<KnowledgeBaseStore>,
        ingestor: Ingestor,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn fixture_with(profiles: FakeProfiles) -> Fixture {
        let dir = std::env::temp_dir().join(format!("ckb_ingest_{}", Uuid::now_v7()));
        std::fs::create_dir_all(dir.join("docs")).unwrap();
        let settings = StoreSettings::default();
        let staging = Arc::new(StagingStore::open(dir.join("staging"), settings).await.unwrap());
        let kb = Arc::new(KnowledgeBaseStore::open(dir.join("kb"), settings).await.unwrap());
        let sources = Collaborators {
            extractor: Arc::new(FileExtractor::default()),
            profiles: Arc::new(profiles),
            patents: Arc::new(PatentFetcher::new(&HttpConfig::default()).unwrap()),
        };
        let ingestor = Ingestor::new(
            staging.clone(),
            kb.clone(),
            ConflictResolver::default(),
            SanitizeOptions::default(),
            sources,
            2,
        );
        Fixture {
            dir,
            staging,
            kb,
            ingestor,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(FakeProfiles(Err(CareerKbError::parse("unused")))).await
    }

    fn write_doc(f: &Fixture, name: &str, contents: &[u8]) -> PathBuf {
        let path = f.dir.join("docs").join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn run(f: &Fixture, request: IngestRequest) -> IngestReport {
        f.ingestor
            .run(&request, Arc::new(SilentProgress), CancellationToken::new())
            .await
            .unwrap()
    }

    fn files(paths: Vec<PathBuf>) -> IngestRequest {
        IngestRequest {
            files: paths,
            ..IngestRequest::default()
        }
    }

    #[tokio::test]
    async fn staged_payload_contains_no_pii() {
        let f = fixture().await;
        let path = write_doc(&f, "resume.txt", RESUME.as_bytes());
        let report = run(&f, files(vec![path])).await;
        assert_eq!(report.staged.len(), 1, "{:?}", report.failures);

        let item = f.staging.get(report.staged[0].id).await.unwrap();
        let payload = serde_json::to_string(&item.payload).unwrap();
        for secret in [
            "jane.doe@example.com",
            "platform@acme.example",
            "415 555 0142",
            "742 Evergreen Terrace",
            "123-45-6789",
        ] {
            assert!(!payload.contains(secret), "{secret} leaked");
        }
        assert!(payload.contains("[REDACTED_EMAIL]"));

        let count = |c: PiiCategory| {
            item.findings
                .iter()
                .find(|f| f.category == c)
                .map_or(0, |f| f.count)
        };
        assert_eq!(count(PiiCategory::Email), 2);
        assert_eq!(count(PiiCategory::Phone), 1);
        assert_eq!(count(PiiCategory::StreetAddress), 1);
        assert_eq!(count(PiiCategory::GovernmentId), 1);
    }

    #[tokio::test]
    async fn documents_are_staged_and_annotated() {
        let f = fixture().await;
        let path = write_doc(&f, "resume.txt", RESUME.as_bytes());
        let report = run(&f, files(vec![path])).await;

        let summary = &report.staged[0];
        assert!(summary.analyzed);
        assert_eq!(summary.new, summary.entries);
        let item = f.staging.get(summary.id).await.unwrap();
        assert_eq!(item.status, StageStatus::Pending);
        assert!(item.payload.iter().any(|e| e.category() == Category::Certification));
        assert!(item.payload.iter().all(|e| e.provenance.stage_id == Some(item.id)));
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_batch() {
        let f = fixture().await;
        let good = write_doc(&f, "resume.txt", RESUME.as_bytes());
        let blank = write_doc(&f, "blank.txt", b"   \n\n");
        let garbled = write_doc(&f, "garbled.txt", b"ab\0cd");
        let missing = f.dir.join("docs").join("missing.pdf");
        let legacy = write_doc(&f, "old.doc", b"binary");

        let report = run(&f, files(vec![blank, good, garbled, missing, legacy])).await;
        assert_eq!(report.staged.len(), 1);
        let sources: Vec<_> = report
            .failures
            .iter()
            .map(|f| Path::new(&f.source).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(sources, ["blank.txt", "garbled.txt", "missing.pdf", "old.doc"]);
        assert!(report.failures[0].error.starts_with("parse error"));
        assert!(report.failures[1].error.contains("encoding"));
        assert!(report.failures[2].error.contains("(missing)"));
        assert!(report.failures[3].error.contains("unsupported"));
        assert_eq!(f.staging.list(None).await.unwrap().len(), 1);
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: std::sync::Mutex<Vec<(String, bool)>>,
        finished: std::sync::atomic::AtomicBool,
    }

    impl ProgressReporter for RecordingProgress {
        fn started(&self, _total: usize) {}
        fn document_done(&self, source: &str, staged: bool) {
            self.events.lock().unwrap().push((source.to_string(), staged));
        }
        fn done(&self, _report: &IngestReport) {
            self.finished.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn store_failure_aborts_the_batch() {
        let f = fixture().await;
        let good = write_doc(&f, "resume.txt", RESUME.as_bytes());
        let missing = f.dir.join("docs").join("missing.pdf");
        std::fs::remove_dir_all(f.staging.dir()).unwrap();

        let progress = Arc::new(RecordingProgress::default());
        let err = f
            .ingestor
            .run(&files(vec![missing, good]), progress.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal(), "got {err}");
        assert!(matches!(err, CareerKbError::Io { .. }));

        let events = progress.events.lock().unwrap().clone();
        assert!(events.iter().all(|(_, staged)| !staged), "{events:?}");
        assert!(!progress.finished.load(std::sync::atomic::Ordering::SeqCst));

        std::fs::create_dir_all(f.staging.dir()).unwrap();
        assert!(f.staging.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_knowledge_base_leaves_item_unannotated() {
        let f = fixture().await;
        std::fs::write(
            f.kb.root().join(Category::Experience.file_name()),
            r#"[{"kind": "experience", "title": ""}]"#,
        )
        .unwrap();
        let path = write_doc(&f, "resume.txt", RESUME.as_bytes());
        let report = run(&f, files(vec![path])).await;

        let summary = &report.staged[0];
        assert!(!summary.analyzed);
        let item = f.staging.get(summary.id).await.unwrap();
        assert!(item.annotations.is_empty());
        assert!(item.warnings.iter().any(|w| w.starts_with("conflict analysis error")));
    }

    #[tokio::test]
    async fn reingesting_an_approved_document_is_all_duplicates() {
        let f = fixture().await;
        let path = write_doc(&f, "resume.txt", RESUME.as_bytes());
        let first = run(&f, files(vec![path.clone()])).await;
        let engine = crate::ApprovalEngine::new(
            f.staging.clone(),
            f.kb.clone(),
            ConflictResolver::default(),
        );
        engine.approve(first.staged[0].id, false).await.unwrap();

        let second = run(&f, files(vec![path])).await;
        let summary = &second.staged[0];
        assert_eq!(summary.duplicates, summary.entries);
        let item = f.staging.get(summary.id).await.unwrap();
        assert!(item.annotations.iter().all(|a| a.relation == Relation::Duplicate));
    }

    #[tokio::test]
    async fn profile_fields_flow_through_the_pipeline() {
        let f = fixture_with(FakeProfiles(Ok(ProfileFields {
            url: String::new(),
            name: Some("Jane Doe".into()),
            headline: Some("Staff Engineer at Acme".into()),
            about: Some("Write to jane@example.com about storage.".into()),
        })))
        .await;
        let report = run(
            &f,
            IngestRequest {
                profile_url: Some("https://www.linkedin.com/in/jane".into()),
                ..IngestRequest::default()
            },
        )
        .await;

        let item = f.staging.get(report.staged[0].id).await.unwrap();
        assert_eq!(item.source.profile_url.as_deref(), Some("https://www.linkedin.com/in/jane"));
        assert_eq!(item.source.name_hint.as_deref(), Some("Jane Doe"));
        let experience: Vec<_> = item
            .payload
            .iter()
            .filter(|e| e.category() == Category::Experience)
            .collect();
        assert_eq!(experience.len(), 1);
        assert_eq!(experience[0].title, "Staff Engineer");
        assert!(!serde_json::to_string(&item.payload).unwrap().contains("jane@example.com"));
    }

    #[tokio::test]
    async fn private_profile_is_a_reported_failure() {
        let f = fixture().await;
        let report = run(
            &f,
            IngestRequest {
                profile_url: Some("https://www.linkedin.com/in/jane".into()),
                ..IngestRequest::default()
            },
        )
        .await;
        assert!(report.staged.is_empty());
        assert!(report.failures[0].error.contains("private profile"));
    }

    #[tokio::test]
    async fn cancelled_batches_stage_nothing() {
        let f = fixture().await;
        let path = write_doc(&f, "resume.txt", RESUME.as_bytes());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = f
            .ingestor
            .run(&files(vec![path]), Arc::new(SilentProgress), cancel)
            .await
            .unwrap();
        assert!(report.staged.is_empty());
        assert!(report.failures[0].cancelled);
        assert!(f.staging.list(None).await.unwrap().is_empty());
    }

    #[test]
    fn patent_pdfs_are_detected_by_stem() {
        assert!(is_patent_file(Path::new("US9876543B2.pdf"), DocumentType::Pdf));
        assert!(!is_patent_file(Path::new("US9876543B2.txt"), DocumentType::Text));
        assert!(!is_patent_file(Path::new("resume.pdf"), DocumentType::Pdf));
    }
}
