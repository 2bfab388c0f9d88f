use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use quarry::{
    IndexEvents, IndexItem, IndexOperation, Indexer, IndexerConfig, IndexingError, ItemField,
    SynchronizationMode,
};
use serde::Deserialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quarry", about = "Index and search a quarry working folder")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file; QUARRY_* environment variables are used otherwise.
    #[arg(long, env = "QUARRY_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "QUARRY_WORKING_FOLDER")]
    working_folder: Option<PathBuf>,
    #[arg(long, env = "QUARRY_MACHINE_NAME")]
    machine_name: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the index, emptying it if it already exists
    Create,
    /// Print whether the index exists
    Exists,
    /// Index items from a JSON-lines file ("-" for stdin)
    Index {
        file: PathBuf,
        /// Drain on a background worker and wait for it
        #[arg(long)]
        background: bool,
    },
    /// Delete items by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Free-text search over every field
    Search {
        text: String,
        #[arg(long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        category: Option<String>,
        /// Print hits as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Deduplicate and merge the index now
    Optimize,
}

/// One input line: an item plus an optional delete marker. Field values may be
/// plain strings or full `{ "value", "data_type", "sortable" }` objects.
#[derive(Deserialize)]
struct InputLine {
    id: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    fields: IndexMap<String, InputField>,
    #[serde(default)]
    delete: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputField {
    Plain(String),
    Full(ItemField),
}

impl From<InputField> for ItemField {
    fn from(f: InputField) -> Self {
        match f {
            InputField::Plain(s) => ItemField::text(s),
            InputField::Full(f) => f,
        }
    }
}

impl InputLine {
    fn into_operation(self) -> quarry::Result<IndexOperation> {
        if self.delete {
            return Ok(IndexOperation::delete(self.id));
        }
        let mut item = IndexItem::new(self.id, self.category);
        for (name, field) in self.fields {
            item.fields.insert(name, ItemField::from(field));
        }
        IndexOperation::add(item)
    }
}

#[derive(Default)]
struct CliEvents {
    indexed: AtomicUsize,
    errors: AtomicUsize,
}

impl IndexEvents for CliEvents {
    fn indexing_error(&self, error: &IndexingError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "indexing error{}: {}{}",
            error
                .item_id
                .as_deref()
                .map(|id| format!(" for {}", id))
                .unwrap_or_default(),
            error.message,
            error
                .cause
                .as_deref()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default()
        );
    }

    fn nodes_indexed(&self, items: &[IndexItem]) {
        self.indexed.fetch_add(items.len(), Ordering::Relaxed);
    }

    fn executive_assigned(&self, machine_name: &str, server_count: usize) {
        tracing::info!(
            "{} is the executive machine of {} server(s)",
            machine_name,
            server_count
        );
    }
}

fn load_config(cli: &Cli, mode: SynchronizationMode) -> quarry::Result<IndexerConfig> {
    let mut config = match &cli.config {
        Some(path) => IndexerConfig::load(path)?,
        None => IndexerConfig::from_env(),
    };
    if let Some(folder) = &cli.working_folder {
        config.working_folder = folder.clone();
    }
    if let Some(name) = &cli.machine_name {
        config.machine_name = Some(name.clone());
    }
    config.synchronization = mode;
    Ok(config)
}

fn read_operations(file: &PathBuf) -> Result<Vec<IndexOperation>, Box<dyn std::error::Error>> {
    let reader: Box<dyn BufRead> = if file.as_os_str() == "-" {
        Box::new(std::io::BufReader::new(std::io::stdin()))
    } else {
        Box::new(std::io::BufReader::new(std::fs::File::open(file)?))
    };

    let mut ops = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let input: InputLine = serde_json::from_str(&line)
            .map_err(|e| format!("line {}: {}", n + 1, e))?;
        ops.push(input.into_operation()?);
    }
    Ok(ops)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mode = match &cli.command {
        Command::Index {
            background: true, ..
        } => SynchronizationMode::Background,
        _ => SynchronizationMode::Immediate,
    };
    let config = load_config(&cli, mode)?;
    let events = Arc::new(CliEvents::default());
    let indexer = Indexer::open(config, events.clone())?;

    match cli.command {
        Command::Create => {
            indexer.create_index()?;
            println!("created {}", indexer.config().index_path().display());
        }
        Command::Exists => {
            println!("{}", indexer.index_exists());
        }
        Command::Index { file, background } => {
            let ops = read_operations(&file)?;
            let submitted = ops.len();
            indexer.perform_indexing(ops)?;
            if background && !indexer.wait_for_idle(Duration::from_secs(300)).await {
                return Err("timed out waiting for the background worker".into());
            }
            println!(
                "submitted {}, indexed {}, errors {}",
                submitted,
                events.indexed.load(Ordering::Relaxed),
                events.errors.load(Ordering::Relaxed)
            );
        }
        Command::Delete { ids } => {
            let count = ids.len();
            indexer.perform_indexing(ids.into_iter().map(IndexOperation::delete).collect())?;
            println!("deleted {} id(s)", count);
        }
        Command::Search {
            text,
            limit,
            category,
            json,
        } => {
            let results = indexer
                .searcher()
                .search_text(&text, category.as_deref())?;
            for hit in results.hits.iter().take(limit) {
                if json {
                    println!("{}", serde_json::to_string(&hit.fields)?);
                } else {
                    println!(
                        "{:.3}\t{}\t{}",
                        hit.score,
                        hit.id,
                        hit.category().unwrap_or_default()
                    );
                }
            }
            if !json {
                println!("{} hit(s)", results.total_hits);
            }
        }
        Command::Optimize => {
            indexer.optimize()?;
            println!("optimized");
        }
    }

    indexer.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
