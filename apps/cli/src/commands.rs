//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use careerkb_core::{
    ApprovalEngine, Collaborators, ConflictResolver, IngestReport, IngestRequest, Ingestor,
    ProgressReporter,
};
use careerkb_shared::{
    AppConfig, SanitizeOptions, SimilarityConfig, StageId, StageStatus, StoreSettings,
    init_config, load_config, load_config_from,
};
use careerkb_storage::{KnowledgeBaseStore, StagingStore};
use clap::{ArgGroup, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// careerkb: review career documents before they reach the knowledge base.
#[derive(Parser)]
#[command(
    name = "careerkb",
    version,
    about = "Stage, review and approve career knowledge-base entries.",
    long_about = None,
    args_conflicts_with_subcommands = true,
    group(
        ArgGroup::new("review")
            .args(["list_staged", "preview_id", "approve_id", "reject_id"])
            .multiple(false)
    ),
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.careerkb/careerkb.toml).
    #[arg(long, global = true, env = "CAREERKB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print summaries of staged items.
    #[arg(long)]
    pub list_staged: bool,

    /// Only list items with this status.
    #[arg(long, requires = "list_staged")]
    pub status: Option<StageStatus>,

    /// Print a staged item's annotated diff.
    #[arg(long, value_name = "ID")]
    pub preview_id: Option<StageId>,

    /// Approve a staged item.
    #[arg(long, value_name = "ID")]
    pub approve_id: Option<StageId>,

    /// Apply entries even when they contradict the knowledge base.
    #[arg(long, requires = "approve_id")]
    pub override_contradictions: bool,

    /// Reject a staged item.
    #[arg(long, value_name = "ID")]
    pub reject_id: Option<StageId>,

    /// Why the item was rejected.
    #[arg(long, requires = "reject_id")]
    pub reason: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Extract, sanitize and stage documents for review.
    Ingest {
        /// Resume or document files (pdf, docx, txt, md).
        files: Vec<PathBuf>,

        /// Public profile page to scrape.
        #[arg(long)]
        profile_url: Option<String>,

        /// Patent page to fetch (repeatable).
        #[arg(long = "patent-url")]
        patent_urls: Vec<String>,

        /// Name of the person the documents describe.
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Delete a resolved staged item.
    Delete {
        id: StageId,
    },

    /// Delete resolved staged items older than the cutoff.
    Purge {
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// machine-readable.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "careerkb=info",
        1 => "careerkb=debug",
        _ => "careerkb=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Some(Command::Config { action }) = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = resolve_config(cli.config.as_deref())?;
    let app = App::open(config).await?;

    if cli.list_staged {
        return app.list(cli.status).await;
    }
    if let Some(id) = cli.preview_id {
        return app.preview(id).await;
    }
    if let Some(id) = cli.approve_id {
        return app.approve(id, cli.override_contradictions).await;
    }
    if let Some(id) = cli.reject_id {
        return app.reject(id, cli.reason).await;
    }

    match cli.command {
        Some(Command::Ingest {
            files,
            profile_url,
            patent_urls,
            name,
        }) => {
            app.ingest(IngestRequest {
                files,
                profile_url,
                patent_urls,
                name,
            })
            .await
        }
        Some(Command::Delete { id }) => app.delete(id).await,
        Some(Command::Purge { older_than_days }) => app.purge(older_than_days).await,
        Some(Command::Config { .. }) => Ok(()),
        None => Err(eyre!(
            "nothing to do: pass one of --list-staged, --preview-id, --approve-id, \
             --reject-id or a subcommand (see --help)"
        )),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Stores and engines built from the resolved config.
struct App {
    config: AppConfig,
    staging: Arc<StagingStore>,
    kb: Arc<KnowledgeBaseStore>,
    resolver: ConflictResolver,
}

impl App {
    async fn open(config: AppConfig) -> Result<Self> {
        let settings = StoreSettings::from(&config);
        let staging = StagingStore::open(&config.paths.staging_dir, settings).await?;
        let kb = KnowledgeBaseStore::open(&config.paths.knowledge_base_dir, settings).await?;
        let resolver = ConflictResolver::new(SimilarityConfig::from(&config));
        Ok(Self {
            config,
            staging: Arc::new(staging),
            kb: Arc::new(kb),
            resolver,
        })
    }

    fn engine(&self) -> ApprovalEngine {
        ApprovalEngine::new(self.staging.clone(), self.kb.clone(), self.resolver)
    }

    async fn list(&self, status: Option<StageStatus>) -> Result<()> {
        let items = self.staging.list(status).await?;
        let summaries: Vec<_> = items.iter().map(|item| item.summary()).collect();
        print_json(&summaries)
    }

    async fn preview(&self, id: StageId) -> Result<()> {
        print_json(&self.engine().preview(id).await?)
    }

    async fn approve(&self, id: StageId, override_contradictions: bool) -> Result<()> {
        let outcome = self.engine().approve(id, override_contradictions).await?;
        print_json(&outcome)
    }

    async fn reject(&self, id: StageId, reason: Option<String>) -> Result<()> {
        self.engine().reject(id, reason).await?;
        print_json(&serde_json::json!({ "id": id, "status": StageStatus::Rejected }))
    }

    async fn delete(&self, id: StageId) -> Result<()> {
        self.staging.delete(id).await?;
        print_json(&serde_json::json!({ "deleted": id }))
    }

    async fn purge(&self, older_than_days: u32) -> Result<()> {
        let removed = self
            .staging
            .purge(chrono::Duration::days(i64::from(older_than_days)))
            .await?;
        print_json(&serde_json::json!({ "purged": removed }))
    }

    async fn ingest(&self, request: IngestRequest) -> Result<()> {
        let ingestor = Ingestor::new(
            self.staging.clone(),
            self.kb.clone(),
            self.resolver,
            SanitizeOptions::from(&self.config),
            Collaborators::from_config(&self.config)?,
            self.config.ingest.concurrency,
        );

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling documents not yet staged");
                on_interrupt.cancel();
            }
        });

        info!(files = request.files.len(), "ingesting documents");
        let report = ingestor
            .run(&request, Arc::new(CliProgress::new()), cancel)
            .await?;
        print_json(&report)?;

        if report.failures.is_empty() {
            Ok(())
        } else {
            Err(eyre!(
                "{} of {} document(s) failed",
                report.failures.len(),
                report.failures.len() + report.staged.len()
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("Preparing documents");
    }

    fn document_done(&self, source: &str, staged: bool) {
        self.bar.inc(1);
        let verb = if staged { "Staged" } else { "Failed" };
        self.bar.set_message(format!("{verb} {source}"));
    }

    fn done(&self, _report: &IngestReport) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn review_flags_are_mutually_exclusive() {
        let id = StageId::new().to_string();
        assert!(Cli::try_parse_from(["careerkb", "--approve-id", &id]).is_ok());
        assert!(
            Cli::try_parse_from(["careerkb", "--approve-id", &id, "--reject-id", &id]).is_err()
        );
        assert!(Cli::try_parse_from(["careerkb", "--override-contradictions"]).is_err());
        assert!(Cli::try_parse_from(["careerkb", "--preview-id", "not-a-uuid"]).is_err());
    }

    #[test]
    fn parses_ingest_and_list_filters() {
        let cli = Cli::try_parse_from([
            "careerkb",
            "ingest",
            "cv.pdf",
            "notes.md",
            "--patent-url",
            "https://patents.google.com/patent/US1B2/en",
            "--name",
            "Jane Doe",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Ingest {
                files,
                patent_urls,
                name,
                ..
            }) => {
                assert_eq!(files.len(), 2);
                assert_eq!(patent_urls.len(), 1);
                assert_eq!(name.as_deref(), Some("Jane Doe"));
            }
            _ => panic!("expected ingest"),
        }

        let cli = Cli::try_parse_from(["careerkb", "--list-staged", "--status", "pending"]).unwrap();
        assert!(cli.list_staged);
        assert_eq!(cli.status, Some(StageStatus::Pending));
    }
}
