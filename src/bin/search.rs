//! Search binary entry point.
//!
//! Command-line access to a built question bank: semantic search within a
//! subject, the most frequently recurring questions, or an interactive REPL.
//!
//! # Examples
//!
//! Single query:
//! ```bash
//! search --db-path questions.db --subject Physics --query "newton's laws"
//! ```
//!
//! Most repeated questions as JSON:
//! ```bash
//! search --db-path questions.db --subject Physics --leaderboard --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --db-path questions.db --subject Physics --interactive
//! ```

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use question_bank::{
    config::EmbeddingSettings,
    embedding::{
        dynamic::{detect_provider, DynamicEmbeddingProvider},
        EmbeddingProvider,
    },
    models::{EmbeddingConfig, Question, RelevanceLevel, SearchResult, Subject},
    query::{leaderboard, BruteForceSearchEngine, SearchEngine, SearchQuery},
    storage::{sqlite::SqliteStorage, QuestionStore},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table with colored relevance levels
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Search binary CLI for querying a question bank
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search a subject's question bank or list its most repeated questions",
    long_about = "Query the question bank using semantic search, or rank a subject's questions \
                  by how many papers they appeared in.

EXAMPLES:
  Single query:
    search --db-path questions.db --subject Physics --query \"newton's laws\"

  Ten most repeated questions:
    search --db-path questions.db --subject Physics --leaderboard --limit 10

  Interactive mode:
    search --db-path questions.db --subject Physics --interactive"
)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["query", "leaderboard", "interactive"]),
))]
struct Args {
    /// Database file path
    #[arg(long, value_name = "PATH", default_value = "questions.db")]
    db_path: PathBuf,

    /// Subject to search within
    #[arg(short, long, value_name = "NAME")]
    subject: String,

    /// Search query
    #[arg(long, value_name = "TEXT")]
    query: Option<String>,

    /// List questions by occurrence count instead of searching
    #[arg(long)]
    leaderboard: bool,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Number of search results to return
    #[arg(long, value_name = "N", default_value = "10")]
    top_k: usize,

    /// Number of leaderboard entries to show
    #[arg(long, value_name = "N", default_value = "50")]
    limit: usize,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,

    /// FastEmbed model cache directory (only used with FastEmbed models)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Instantiate the provider that produced the stored embeddings
fn create_embedding_provider(
    config: &EmbeddingConfig,
    cache_dir: Option<PathBuf>,
) -> Result<DynamicEmbeddingProvider> {
    let provider_kind = detect_provider(&config.model_name);
    info!(
        "Auto-detected {:?} provider for model: {}",
        provider_kind, config.model_name
    );

    let settings = EmbeddingSettings {
        provider: provider_kind,
        model: Some(config.model_name.clone()),
        cache_dir,
        ..EmbeddingSettings::default()
    };
    let provider = DynamicEmbeddingProvider::from_settings(&settings)
        .context("Failed to create embedding provider")?;

    if provider.dimension() != config.dimension {
        anyhow::bail!(
            "Dimension mismatch: expected {} from database config, but provider returns {}",
            config.dimension,
            provider.dimension()
        );
    }

    Ok(provider)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn marks_cell(question: &Question) -> Cell {
    match question.marks {
        Some(marks) => Cell::new(format!("{}", marks)),
        None => Cell::new("-"),
    }
}

/// Format search results as a pretty table
fn format_results_table(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Question").add_attribute(Attribute::Bold),
        Cell::new("Marks").add_attribute(Attribute::Bold),
        Cell::new("Seen").add_attribute(Attribute::Bold),
        Cell::new("Relevance").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (idx, result) in results.iter().enumerate() {
        let (relevance_str, color) = match result.relevance {
            RelevanceLevel::Identical => ("IDENTICAL", Color::Green),
            RelevanceLevel::HighlySimilar => ("HIGHLY_SIMILAR", Color::Cyan),
            RelevanceLevel::Similar => ("SIMILAR", Color::Yellow),
            RelevanceLevel::Relevant => ("RELEVANT", Color::White),
        };

        table.add_row(vec![
            Cell::new(format!("{}", idx + 1)),
            Cell::new(truncate(&result.question.content, 70)),
            marks_cell(&result.question),
            Cell::new(result.question.occurrence_count),
            Cell::new(relevance_str).fg(color),
            Cell::new(format!("{:.4}", result.score)),
        ]);
    }

    table.to_string()
}

/// Format leaderboard entries as a pretty table
fn format_leaderboard_table(questions: &[Question]) -> String {
    if questions.is_empty() {
        return "No questions recorded for this subject.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Seen").add_attribute(Attribute::Bold),
        Cell::new("Question").add_attribute(Attribute::Bold),
        Cell::new("Marks").add_attribute(Attribute::Bold),
    ]);

    for (idx, question) in questions.iter().enumerate() {
        let seen = Cell::new(question.occurrence_count);
        let seen = if question.occurrence_count > 1 {
            seen.fg(Color::Green).add_attribute(Attribute::Bold)
        } else {
            seen
        };

        table.add_row(vec![
            Cell::new(format!("{}", idx + 1)),
            seen,
            Cell::new(truncate(&question.content, 80)),
            marks_cell(question),
        ]);
    }

    table.to_string()
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize results to JSON")
}

/// Display detailed view of a single result
fn display_result_detail(result: &SearchResult, rank: usize) {
    let question = &result.question;
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Question ID: {}", question.id);
    if let Some(identifier) = &question.identifier {
        println!("Identifier: {}", identifier);
    }
    if let Some(number) = question.question_number {
        println!("Number: {}", number);
    }
    if let Some(marks) = question.marks {
        println!("Marks: {}", marks);
    }
    println!("Seen in {} paper(s)", question.occurrence_count);
    println!("Relevance: {:?}", result.relevance);
    println!("Score: {:.4}", result.score);
    println!("\n{}", question.content);
    println!("{}", "═".repeat(80));
}

fn print_results(results: &[SearchResult], format: OutputFormat, elapsed_secs: f64) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(results));
            println!("\nFound {} results in {:.2}s", results.len(), elapsed_secs);
        }
        OutputFormat::Json => println!("{}", to_json(results)?),
    }
    Ok(())
}

async fn show_leaderboard(
    storage: &SqliteStorage,
    subject: &Subject,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let ranked = leaderboard(storage, subject.id, Some(limit))
        .await
        .with_context(|| format!("Failed to rank questions for '{}'", subject.name))?;

    match format {
        OutputFormat::Table => {
            println!("Most repeated questions in {}", subject.name);
            println!("{}", format_leaderboard_table(&ranked));
        }
        OutputFormat::Json => println!("{}", to_json(&ranked)?),
    }
    Ok(())
}

/// Execute a search query and return results
async fn execute_search<E: EmbeddingProvider, S: QuestionStore>(
    engine: &BruteForceSearchEngine<E, S>,
    query_text: &str,
    subject: &Subject,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    debug!("Executing search for query: {}", query_text);

    let query = SearchQuery::new(query_text.to_string(), subject.id, Some(top_k));
    engine
        .search(&query)
        .await
        .with_context(|| format!("Failed to execute search for query: '{}'", query_text))
}

fn print_help() {
    println!("Commands:");
    println!("  <query>          - Search the subject's questions");
    println!("  /top N           - Set number of results to N");
    println!("  /leaderboard [N] - Show the N most repeated questions");
    println!("  /format table    - Use table output format");
    println!("  /format json     - Use JSON output format");
    println!("  /detail N        - Show full details for result rank N");
    println!("  /help            - Show this help");
    println!("  Ctrl+D or Ctrl+C - Exit");
}

/// Run interactive REPL mode
async fn run_interactive(
    engine: BruteForceSearchEngine<DynamicEmbeddingProvider, SqliteStorage>,
    storage: &SqliteStorage,
    subject: &Subject,
    mut top_k: usize,
    limit: usize,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Question Search ({})", subject.name);
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut last_results: Vec<SearchResult> = Vec::new();

    loop {
        match rl.readline("Search> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line).ok();

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match parts[0] {
                        "/help" => print_help(),
                        "/top" => match parts.get(1).map(|n| n.parse::<usize>()) {
                            Some(Ok(n)) if n > 0 => {
                                top_k = n;
                                println!("Set top-k to {}", top_k);
                            }
                            _ => eprintln!("Usage: /top N (positive integer)"),
                        },
                        "/leaderboard" => {
                            let n = match parts.get(1).map(|n| n.parse::<usize>()) {
                                None => limit,
                                Some(Ok(n)) if n > 0 => n,
                                _ => {
                                    eprintln!("Usage: /leaderboard [N]");
                                    continue;
                                }
                            };
                            if let Err(e) = show_leaderboard(storage, subject, n, format).await {
                                eprintln!("{:#}", e);
                            }
                        }
                        "/format" => match parts.get(1).copied() {
                            Some("table") => {
                                format = OutputFormat::Table;
                                println!("Set output format to table");
                            }
                            Some("json") => {
                                format = OutputFormat::Json;
                                println!("Set output format to JSON");
                            }
                            _ => eprintln!("Usage: /format [table|json]"),
                        },
                        "/detail" => match parts.get(1).map(|n| n.parse::<usize>()) {
                            Some(Ok(rank)) if rank > 0 && rank <= last_results.len() => {
                                display_result_detail(&last_results[rank - 1], rank);
                            }
                            Some(Ok(rank)) if rank > last_results.len() => {
                                eprintln!(
                                    "Rank {} out of range (last search had {} results)",
                                    rank,
                                    last_results.len()
                                );
                            }
                            _ => eprintln!("Usage: /detail N (positive integer)"),
                        },
                        other => eprintln!(
                            "Unknown command: {}. Type /help for available commands.",
                            other
                        ),
                    }
                } else {
                    let start = Instant::now();
                    match execute_search(&engine, line, subject, top_k).await {
                        Ok(results) => {
                            if let Err(e) =
                                print_results(&results, format, start.elapsed().as_secs_f64())
                            {
                                eprintln!("{:#}", e);
                            }
                            last_results = results;
                        }
                        Err(e) => eprintln!("Search failed: {:#}", e),
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level);

    if !args.db_path.exists() {
        anyhow::bail!(
            "Database file not found: {}\n\
             Please run the ingestion binary first to create the database.",
            args.db_path.display()
        );
    }

    info!("Loading database from: {}", args.db_path.display());

    let storage = Arc::new(
        SqliteStorage::open(&args.db_path).context("Failed to open database")?,
    );
    storage
        .initialize()
        .await
        .context("Failed to initialize storage")?;

    let subject = storage
        .find_subject_by_name(&args.subject)
        .await
        .context("Failed to look up subject")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Subject '{}' not found.\n\
                 Run the ingestion binary with --create-subject to add it.",
                args.subject
            )
        })?;

    info!(
        "Subject '{}' has {} questions",
        subject.name,
        subject.questions.len()
    );

    // The leaderboard needs no embeddings
    if args.leaderboard {
        return show_leaderboard(&storage, &subject, args.limit, args.format).await;
    }

    let config = storage
        .get_config()
        .await
        .context("Failed to retrieve embedding configuration from database")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Database has no embedding configuration.\n\
                 Please run the ingestion binary with --mode init-new first."
            )
        })?;

    info!(
        "Using embedding model: {} (dimension: {})",
        config.model_name, config.dimension
    );

    let embedding_provider = create_embedding_provider(&config, args.cache_dir.clone())?;
    let engine = BruteForceSearchEngine::new(embedding_provider, Arc::clone(&storage));

    match args.query {
        Some(query) if !args.interactive => {
            let start = Instant::now();
            let results = execute_search(&engine, &query, &subject, args.top_k).await?;
            print_results(&results, args.format, start.elapsed().as_secs_f64())
        }
        _ => {
            run_interactive(
                engine,
                &storage,
                &subject,
                args.top_k,
                args.limit,
                args.format,
            )
            .await
        }
    }
}
