//! Ingestion binary entry point.
//!
//! Feeds one paper's extracted questions into a subject's question bank,
//! reporting which were new and which recurred.
//!
//! # Examples
//!
//! Initialize a new database and create the subject:
//! ```bash
//! ingestion --mode init-new --input paper.json --subject Physics --create-subject
//! ```
//!
//! Add another paper to an existing subject:
//! ```bash
//! ingestion --input paper2.json --subject Physics
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use question_bank::{
    config::{ProviderKind, RecurrenceConfig, Settings},
    embedding::dynamic::DynamicEmbeddingProvider,
    ingestion::QuestionCorpusIngestor,
    models::{IngestionResult, Subject},
    provider::{json::JsonFileCandidateProvider, CandidateProvider},
    storage::{sqlite::SqliteStorage, QuestionStore},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Operation mode for the ingestor
#[derive(Debug, Clone, ValueEnum)]
enum Mode {
    /// Connect to existing database and validate embedding config (default)
    Connect,
    /// Initialize new database with fresh schema
    InitNew,
}

/// Ingestion CLI for building and updating a question bank
#[derive(Parser, Debug)]
#[command(
    name = "ingestion",
    version,
    about = "Add extracted exam questions to a subject's question bank",
    long_about = "Embeds each extracted question, matches it against the subject's existing \
                  questions, and either stores it as new or counts it as a recurrence.

EXAMPLES:
  Initialize new database:
    GEMINI_API_KEY=... ingestion --mode init-new --input paper.json --subject Physics --create-subject

  Add a paper to an existing subject:
    ingestion --input paper2.json --subject Physics

  Use OpenAI embeddings and a stricter threshold:
    OPENAI_API_KEY=sk-... ingestion --mode init-new --input paper.json --subject Physics \\
      --create-subject --embedding-provider open-ai --threshold 0.85"
)]
struct IngestionArgs {
    /// Input JSON file containing extracted questions
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Subject the paper belongs to
    #[arg(short, long, value_name = "NAME")]
    subject: String,

    /// Create the subject if it does not exist yet
    #[arg(long)]
    create_subject: bool,

    /// TOML settings file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file path
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Operation mode: connect to existing DB or initialize new DB
    #[arg(long, value_enum, default_value = "connect")]
    mode: Mode,

    /// Embedding provider to use
    #[arg(long, value_enum)]
    embedding_provider: Option<ProviderArg>,

    /// Specific embedding model name (provider-dependent, optional)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// Similarity at or above which a question counts as a recurrence
    #[arg(long, value_name = "0..1")]
    threshold: Option<f32>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

/// Embedding provider type
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    /// FastEmbed local embedding provider (needs the local-embeddings feature)
    FastEmbed,
    /// OpenAI embedding provider (requires OPENAI_API_KEY)
    OpenAi,
    /// Gemini embedding provider (requires GEMINI_API_KEY)
    Gemini,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::FastEmbed => ProviderKind::FastEmbed,
            ProviderArg::OpenAi => ProviderKind::OpenAi,
            ProviderArg::Gemini => ProviderKind::Gemini,
        }
    }
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Merge the settings file with command-line overrides
fn resolve_settings(args: &IngestionArgs) -> Result<Settings> {
    let mut settings = Settings::load_or_default(args.config.as_deref())
        .context("Failed to load settings")?;

    if let Some(db_path) = &args.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(provider) = args.embedding_provider {
        settings.embedding.provider = provider.into();
    }
    if let Some(model) = &args.embedding_model {
        settings.embedding.model = Some(model.clone());
    }
    if let Some(cache_dir) = &args.cache_dir {
        settings.embedding.cache_dir = Some(cache_dir.clone());
    }
    if let Some(threshold) = args.threshold {
        settings.recurrence =
            RecurrenceConfig::new(threshold).context("Invalid --threshold value")?;
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

/// Open the SQLite database, creating its parent directory if needed
fn create_storage(db_path: &Path) -> Result<SqliteStorage> {
    debug!("Opening SQLite storage at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
            info!("Created database directory: {:?}", parent);
        }
    }

    SqliteStorage::open(db_path).with_context(|| format!("Failed to open database {:?}", db_path))
}

/// Create the ingestor based on mode
async fn create_ingestor(
    mode: &Mode,
    embedding_provider: DynamicEmbeddingProvider,
    storage: Arc<SqliteStorage>,
    config: RecurrenceConfig,
) -> Result<QuestionCorpusIngestor<DynamicEmbeddingProvider, SqliteStorage>> {
    let ingestor = match mode {
        Mode::Connect => {
            info!("Connecting to existing database with config validation");
            QuestionCorpusIngestor::connect(embedding_provider, storage, config)
                .await
                .context("Failed to connect to existing database. Use --mode init-new to create a new database.")?
        }
        Mode::InitNew => {
            info!("Initializing new database");
            QuestionCorpusIngestor::initialize_new(embedding_provider, storage, config)
                .await
                .context("Failed to initialize new database")?
        }
    };

    debug!(
        "Ingestor ready with similarity threshold {}",
        config.similarity_threshold
    );
    Ok(ingestor)
}

/// Look the subject up, creating it when allowed
async fn resolve_subject(storage: &SqliteStorage, name: &str, create: bool) -> Result<Subject> {
    if let Some(subject) = storage.find_subject_by_name(name).await? {
        return Ok(subject);
    }

    if !create {
        anyhow::bail!(
            "Subject '{}' does not exist. Pass --create-subject to create it.",
            name
        );
    }

    let subject = storage
        .create_subject(name)
        .await
        .with_context(|| format!("Failed to create subject '{}'", name))?;
    info!("Created subject '{}' (id {})", subject.name, subject.id);
    Ok(subject)
}

/// Create a spinner shown while the batch runs
fn create_spinner(total: usize) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner:.cyan} {msg}")
            .expect("Invalid progress bar template"),
    );
    pb.set_message(format!("Ingesting {} questions...", total));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_summary(subject: &Subject, result: &IngestionResult, elapsed: Duration) {
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Ingestion Completed               ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Subject:              {:>16} ║", truncate(&subject.name, 16));
    println!("║ Total processed:      {:>16} ║", result.total_processed);
    println!("║ New questions:        {:>16} ║", result.new_count());
    println!("║ Recurrences:          {:>16} ║", result.recurrence_count());
    println!("║ Skipped (empty):      {:>16} ║", result.skipped_empty);
    println!("║ Failed:               {:>16} ║", result.failed());
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");

    if !result.recurrences.is_empty() {
        println!("\nRecurring questions:");
        for detail in &result.recurrences {
            println!(
                "  #{:<3} matched question {} (similarity {:.3}, seen {} times)",
                detail.candidate_index + 1,
                detail.matched_question_id,
                detail.similarity,
                detail.occurrence_count
            );
        }
    }

    if result.is_partial() {
        println!("\nFailed questions:");
        for failure in &result.failures {
            println!(
                "  #{:<3} {:<8} {:?}: {}",
                failure.candidate_index + 1,
                failure.identifier.as_deref().unwrap_or("-"),
                failure.kind,
                failure.message
            );
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestionArgs::parse();

    init_logging(&args.log_level).context("Failed to initialize logging")?;

    info!("Starting question ingestion");
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();

    if !args.input.exists() {
        error!("Input file does not exist: {:?}", args.input);
        anyhow::bail!("Input file not found: {:?}", args.input);
    }
    info!("Input file: {:?}", args.input);

    let settings = resolve_settings(&args)?;

    let embedding_provider = DynamicEmbeddingProvider::from_settings(&settings.embedding)
        .context("Failed to create embedding provider")?;

    let storage = Arc::new(create_storage(&settings.db_path).context("Failed to create storage")?);
    info!("Database path: {:?}", settings.db_path);

    let ingestor = create_ingestor(
        &args.mode,
        embedding_provider,
        Arc::clone(&storage),
        settings.recurrence,
    )
    .await
    .context("Failed to create ingestor")?;

    let subject = resolve_subject(&storage, &args.subject, args.create_subject).await?;

    info!("Loading questions from {:?}...", args.input);
    let provider = JsonFileCandidateProvider::from_file(&args.input)
        .await
        .with_context(|| format!("Failed to load questions from {:?}", args.input))?;

    let candidate_count = provider.count_candidates().await?;
    info!("Found {} questions from {}", candidate_count, provider.name());

    if candidate_count == 0 {
        warn!("No questions found in input file");
        return Ok(());
    }

    let spinner = create_spinner(candidate_count);
    let result = ingestor
        .ingest_from_provider(&provider, subject.id)
        .await
        .context("Failed to ingest questions")?;
    spinner.finish_and_clear();

    print_summary(&subject, &result, start_time.elapsed());

    if result.is_partial() {
        warn!(
            "{} questions failed to process - the rest were saved",
            result.failed()
        );
    }

    info!("Ingestion completed");

    Ok(())
}
