//! Rulecrawl main entry point
//!
//! This is the command-line interface for the Rulecrawl acquisition engine.

use clap::{Args, Parser, Subcommand};
use rulecrawl::config::{load_config_with_hash, Config};
use rulecrawl::crawler::{Fetcher, MetadataExtractor};
use rulecrawl::model::NewTask;
use rulecrawl::storage::{open_storage, Storage};
use rulecrawl::{Orchestrator, PatternCache, RuleSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Rulecrawl: a rule-driven novel acquisition engine
///
/// Rulecrawl fetches book metadata and chapters from third-party sites using
/// per-site extraction rules, downloading only chapters that are new or
/// renamed since the last visit.
#[derive(Parser, Debug)]
#[command(name = "rulecrawl")]
#[command(version = "1.0.0")]
#[command(about = "A rule-driven novel acquisition engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "rulecrawl.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every enabled source and the task queue until Ctrl-C
    Run,

    /// Manage crawl sources
    #[command(subcommand)]
    Source(SourceCommand),

    /// Manage single-book tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Extract one book's details with a rule file and print them as JSON
    Probe {
        /// Rule JSON file
        #[arg(long)]
        rule: PathBuf,

        /// Book ID on the source site
        #[arg(long)]
        book_id: String,
    },
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long, default_value_t = 20)]
    page_size: u32,
}

#[derive(Subcommand, Debug)]
enum SourceCommand {
    /// Register a new (disabled) source
    Add {
        #[arg(long)]
        name: String,

        /// Rule JSON file
        #[arg(long)]
        rule: PathBuf,
    },

    /// Rename a source or replace its rules; the source is disabled
    Update {
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        rule: Option<PathBuf>,
    },

    /// List sources, most recently updated first
    List(PageArgs),

    /// Validate a source's rules and mark it enabled
    Enable { id: i64 },

    /// Mark a source disabled
    Disable { id: i64 },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// Queue one book for ingestion
    Add {
        #[arg(long)]
        source: i64,

        #[arg(long)]
        book_id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        category: Option<u32>,
    },

    /// List tasks, newest first
    List(PageArgs),

    /// Remove a task
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Run => handle_run(&config).await,
        Command::Source(command) => handle_source(&config, command),
        Command::Task(command) => handle_task(&config, command),
        Command::Probe { rule, book_id } => handle_probe(&config, &rule, &book_id).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("rulecrawl=info,warn"),
            1 => EnvFilter::new("rulecrawl=debug,info"),
            2 => EnvFilter::new("rulecrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_orchestrator(config: &Config) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    Ok(Orchestrator::new(config, storage)?)
}

fn read_rule_file(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    // Reject broken files before they are stored
    RuleSet::load(&json, &PatternCache::new())?;
    Ok(json)
}

/// Handles the run mode: resumes enabled sources and drains tasks until Ctrl-C
async fn handle_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = open_orchestrator(config)?;

    let started = orchestrator.resume_enabled_sources()?;
    tracing::info!("{} sources running", started);
    orchestrator.start_task_loop()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, stopping workers...");
    orchestrator.shutdown().await?;

    Ok(())
}

fn handle_source(
    config: &Config,
    command: SourceCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = open_orchestrator(config)?;

    match command {
        SourceCommand::Add { name, rule } => {
            let json = read_rule_file(&rule)?;
            let id = orchestrator.add_source(&name, &json)?;
            println!("✓ Added source {} ({})", id, name);
        }
        SourceCommand::Update { id, name, rule } => {
            let json = rule.as_deref().map(read_rule_file).transpose()?;
            orchestrator.get_source(id)?;
            set_enabled(&orchestrator, id, false)?;
            let mut storage = orchestrator.storage().lock().map_err(|e| e.to_string())?;
            storage.update_source(id, name.as_deref(), json.as_deref())?;
            println!("✓ Updated source {} (disabled)", id);
        }
        SourceCommand::List(page) => {
            let sources = orchestrator.list_sources(page.page, page.page_size)?;
            println!("{:>6}  {:<8}  {:<25}  NAME", "ID", "ENABLED", "UPDATED");
            for source in sources {
                println!(
                    "{:>6}  {:<8}  {:<25}  {}",
                    source.id,
                    source.enabled,
                    source.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    source.name
                );
            }
        }
        SourceCommand::Enable { id } => {
            let source = orchestrator.get_source(id)?;
            RuleSet::load(&source.rule_json, orchestrator.patterns())?;
            set_enabled(&orchestrator, id, true)?;
            println!("✓ Source {} enabled; it starts with the next run", id);
        }
        SourceCommand::Disable { id } => {
            orchestrator.get_source(id)?;
            set_enabled(&orchestrator, id, false)?;
            println!("✓ Source {} disabled", id);
        }
    }

    Ok(())
}

// The admin commands only flip the persisted flag; workers belong to `run`.
fn set_enabled(
    orchestrator: &Orchestrator,
    id: i64,
    enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut storage = orchestrator.storage().lock().map_err(|e| e.to_string())?;
    storage.set_source_enabled(id, enabled)?;
    Ok(())
}

fn handle_task(config: &Config, command: TaskCommand) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = open_orchestrator(config)?;

    match command {
        TaskCommand::Add {
            source,
            book_id,
            name,
            author,
            category,
        } => {
            let id = orchestrator.add_task(NewTask {
                source_id: source,
                source_book_id: book_id,
                book_name: name,
                author,
                category_id: category,
            })?;
            println!("✓ Queued task {}", id);
        }
        TaskCommand::List(page) => {
            let tasks = orchestrator.list_tasks(page.page, page.page_size)?;
            println!(
                "{:>6}  {:>6}  {:<12}  {:<8}  {:>8}  BOOK",
                "ID", "SOURCE", "BOOK ID", "STATUS", "CHAPTERS"
            );
            for task in tasks {
                println!(
                    "{:>6}  {:>6}  {:<12}  {:<8}  {:>8}  {} {}",
                    task.id,
                    task.source_id,
                    task.source_book_id,
                    task.status,
                    task.chapters_collected,
                    task.book_name.as_deref().unwrap_or("-"),
                    task.author.as_deref().unwrap_or("")
                );
            }
        }
        TaskCommand::Delete { id } => {
            orchestrator.delete_task(id)?;
            println!("✓ Deleted task {}", id);
        }
    }

    Ok(())
}

/// Handles the probe mode: a dry run of detail extraction, nothing persisted
async fn handle_probe(
    config: &Config,
    rule: &Path,
    book_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let patterns = Arc::new(PatternCache::new());
    let json = std::fs::read_to_string(rule)?;
    let rules = RuleSet::load(&json, &patterns)?;
    tracing::info!("Rules loaded (fingerprint: {})", rules.fingerprint());

    let fetcher = Arc::new(Fetcher::new(&config.fetcher)?);
    let extractor = MetadataExtractor::new(fetcher, patterns);
    let book = extractor.extract_book(&rules, book_id).await;

    if book.is_empty() {
        tracing::warn!("No book record could be extracted for {}", book_id);
    }
    println!("{}", serde_json::to_string_pretty(&book)?);

    Ok(())
}
