//! Flowgraph CLI
//!
//! A command-line interface and HTTP server for the Flowgraph system.

mod server;

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use flowgraph_agents::{
    ChatClient, EditorAgent, ExtractionOracle, GardenerAgent, LibrarianAgent, PipelineConfig,
    Prompts, SearchAgent,
};
use flowgraph_core::{ConversationTurn, EditRequest, GraphEdits, TilingParams};
use flowgraph_db::{init_memory, init_persistent, Repository};
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Flowgraph - Turn flowchart photos into a queryable knowledge graph
#[derive(Parser)]
#[command(name = "flowgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (defaults to ~/.flowgraph/data)
    #[arg(short, long, global = true)]
    db_path: Option<PathBuf>,

    /// Use in-memory database (for testing)
    #[arg(long, global = true)]
    memory: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a graph from flowchart images and merge it into the store
    Ingest {
        /// Image files
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Grid rows
        #[arg(long, default_value = "2")]
        rows: u32,

        /// Grid columns
        #[arg(long, default_value = "2")]
        cols: u32,

        /// Section overlap in pixels
        #[arg(long, default_value = "50")]
        overlap: u32,
    },

    /// Ask a question about the stored flowchart
    Query {
        /// Question
        text: String,

        /// Send the full graph instead of the relevant subgraph
        #[arg(long)]
        full_context: bool,
    },

    /// Interactive question/answer session
    Chat {
        /// Send the full graph instead of the relevant subgraph
        #[arg(long)]
        full_context: bool,
    },

    /// Print the stored graph as JSON
    Graph,

    /// Apply manual edits from a JSON file ({editedNodes, deletedEdges, addedEdges})
    Edit {
        /// Path to edit request JSON
        path: PathBuf,
    },

    /// Run the consistency fix pass
    Fix,

    /// Show store statistics
    Stats,

    /// Check that the oracle endpoint is reachable
    Health,

    /// Serve the HTTP API
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },

    /// Delete the local database (fresh start)
    ResetDb,
}

fn default_db_path() -> Result<PathBuf> {
    let mut path = dirs::home_dir().context("Could not find home directory")?;
    path.push(".flowgraph");
    path.push("data");
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if let Commands::ResetDb = &cli.command {
        let path = match cli.db_path {
            Some(path) => path,
            None => default_db_path()?,
        };

        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove db at {}", path.display()))?;
            println!("✓ Removed database at {}", path.display());
        } else {
            println!("Database not found at {}, nothing to remove", path.display());
        }
        return Ok(());
    }

    if let Commands::Health = &cli.command {
        return cmd_health().await;
    }

    // Initialize database
    let db = if cli.memory {
        info!("Using in-memory database");
        init_memory().await?
    } else {
        let db_path = match cli.db_path {
            Some(path) => path,
            None => default_db_path()?,
        };

        // Ensure directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Using database at: {}", db_path.display());
        init_persistent(&db_path).await?
    };

    let repo = Repository::new(db);
    let config = PipelineConfig::from_env();

    // Execute command
    match cli.command {
        Commands::Ingest {
            images,
            rows,
            cols,
            overlap,
        } => {
            let params = TilingParams { rows, cols, overlap };
            cmd_ingest(repo, &config, images, params).await?;
        }
        Commands::Query { text, full_context } => {
            cmd_query(repo, &config, text, full_context).await?;
        }
        Commands::Chat { full_context } => {
            cmd_chat(repo, &config, full_context).await?;
        }
        Commands::Graph => {
            let graph = repo.full_graph().await?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        Commands::Edit { path } => {
            cmd_edit(repo, path).await?;
        }
        Commands::Fix => {
            cmd_fix(repo, &config).await?;
        }
        Commands::Stats => {
            cmd_stats(repo).await?;
        }
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("Invalid bind address {host}:{port}"))?;
            let state = server::AppState::new(repo, oracle()?, prompts()?, &config);
            server::serve(Arc::new(state), addr).await?;
        }
        Commands::Health | Commands::ResetDb => {
            // Handled before database init.
        }
    }

    Ok(())
}

fn oracle() -> Result<Arc<dyn ExtractionOracle>> {
    let client = ChatClient::from_env().context("Failed to configure the oracle client")?;
    info!(
        provider = ?client.config().provider,
        url = client.base_url(),
        model = %client.config().model,
        "Oracle client ready"
    );
    Ok(Arc::new(client))
}

fn prompts() -> Result<Arc<Prompts>> {
    Ok(Arc::new(Prompts::load().context("Failed to load prompts")?))
}

async fn cmd_health() -> Result<()> {
    let client = ChatClient::from_env().context("Failed to configure the oracle client")?;
    let ok = client.health().await.unwrap_or(false);
    if !ok {
        eprintln!("Error: oracle is not reachable.");
        eprintln!("  Oracle: {}", client.base_url());
        anyhow::bail!("Oracle unavailable");
    }

    println!("✓ Oracle reachable at {}", client.base_url());
    Ok(())
}

async fn cmd_ingest(
    repo: Repository,
    config: &PipelineConfig,
    images: Vec<PathBuf>,
    params: TilingParams,
) -> Result<()> {
    let mut payloads = Vec::with_capacity(images.len());
    let mut names = Vec::with_capacity(images.len());
    for path in &images {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read image: {}", path.display()))?;
        payloads.push(base64::engine::general_purpose::STANDARD.encode(bytes));
        names.push(
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        );
    }

    let librarian = LibrarianAgent::new(repo, oracle()?, prompts()?, config);
    let outcome = librarian.ingest_images(&payloads, &names, params).await?;
    let report = &outcome.report;

    println!("✓ Ingestion complete (batch {}):", report.batch_id);
    println!("  • Sections: {}", report.sections_total);
    println!("  • Merged: {}", report.sections_merged);
    if report.sections_dropped() > 0 {
        println!("  • Dropped: {}", report.sections_dropped());
        for failure in &report.failures {
            println!(
                "    - {} {}: {}",
                failure.image_name, failure.bounds, failure.reason
            );
        }
    }
    println!("  • Nodes: {}", outcome.graph.nodes.len());
    println!("  • Relationships: {}", outcome.graph.relationships.len());

    Ok(())
}

async fn cmd_query(
    repo: Repository,
    config: &PipelineConfig,
    text: String,
    full_context: bool,
) -> Result<()> {
    let search = SearchAgent::new(repo, oracle()?, prompts()?)
        .with_history_turns(config.history_turns);
    let answer = search.answer(&text, &[], !full_context).await?;

    println!("{}", answer.text);
    if !answer.image_names.is_empty() {
        println!();
        println!("Sources:");
        for name in &answer.image_names {
            println!("  • {}", name);
        }
    }

    Ok(())
}

async fn cmd_chat(repo: Repository, config: &PipelineConfig, full_context: bool) -> Result<()> {
    let search = SearchAgent::new(repo, oracle()?, prompts()?)
        .with_history_turns(config.history_turns);
    let mut history: Vec<ConversationTurn> = Vec::new();

    println!("Flowgraph - Chat Mode");
    println!("Ask about the stored flowchart. Type 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("flowgraph> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let input = line.trim();
        match input {
            "" => continue,
            "quit" | "q" | "exit" => {
                println!("Goodbye!");
                break;
            }
            _ => {}
        }

        match search.answer(input, &history, !full_context).await {
            Ok(answer) => {
                println!("{}", answer.text);
                if !answer.image_names.is_empty() {
                    println!("  (sources: {})", answer.image_names.join(", "));
                }
                history.push(ConversationTurn::user(input));
                history.push(ConversationTurn::assistant(answer.text));
            }
            Err(e) => println!("Error: {}", e),
        }

        println!();
    }

    Ok(())
}

async fn cmd_edit(repo: Repository, path: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let request: EditRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse edit request from: {}", path.display()))?;
    let edits = GraphEdits::try_from(request)?;

    let editor = EditorAgent::new(repo);
    let graph = editor.apply(&edits).await?;

    println!(
        "✓ Applied edits: {} nodes, {} relationships",
        graph.nodes.len(),
        graph.relationships.len()
    );
    Ok(())
}

async fn cmd_fix(repo: Repository, config: &PipelineConfig) -> Result<()> {
    let gardener =
        GardenerAgent::new(repo, oracle()?, prompts()?).with_retry(config.fix_retry);
    let graph = gardener.fix_graph().await?;

    println!("✓ Graph repaired:");
    println!("  • Nodes: {}", graph.nodes.len());
    println!("  • Relationships: {}", graph.relationships.len());
    Ok(())
}

async fn cmd_stats(repo: Repository) -> Result<()> {
    let stats = repo.get_stats().await?;

    println!("Database Statistics:");
    println!("  • Nodes: {}", stats.node_count);
    println!("  • Relationships: {}", stats.relationship_count);

    Ok(())
}
