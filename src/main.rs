use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use coderag_core::{Config, Engine};
use coderag_index::{ContextBudget, FileChange, IndexReport, SourceFile, assemble, is_indexable};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "coderag", version, about = "Index a codebase and retrieve context for it")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        long,
        global = true,
        env = "CODERAG_CONFIG",
        default_value = "config/default.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every supported file under a directory.
    Index {
        path: PathBuf,
        /// Repository id; defaults to the directory name.
        #[arg(long)]
        repo_id: Option<String>,
        /// Re-embed files even when their content is unchanged.
        #[arg(long)]
        force: bool,
    },
    /// Re-index the given files; files that no longer exist are removed.
    Update {
        path: PathBuf,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        repo_id: Option<String>,
    },
    /// Retrieve a bounded context block for a query.
    Query {
        repo_id: String,
        text: String,
        #[arg(short, long)]
        k: Option<usize>,
        /// Context budget in characters.
        #[arg(long)]
        budget: Option<usize>,
    },
    /// Show indexing status for a repository.
    Status { repo_id: String },
    /// Drop a repository's vectors and bookkeeping.
    Drop { repo_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if matches!(cli.command, Command::Index { .. }) {
        config.indexing.prune_missing = true;
    }
    let engine = Engine::from_config(config).await?;

    match cli.command {
        Command::Index {
            path,
            repo_id,
            force,
        } => {
            let repo_id = resolve_repo_id(&path, repo_id)?;
            let files = collect_files(&path)?;
            let manager = engine.index_manager();
            cancel_on_ctrl_c(manager.cancel_token());
            let report = manager.index_repository(&repo_id, files, force).await?;
            print_report(&repo_id, &report);
        }
        Command::Update {
            path,
            files,
            repo_id,
        } => {
            let repo_id = resolve_repo_id(&path, repo_id)?;
            let changes = collect_changes(&path, &files);
            let manager = engine.index_manager();
            cancel_on_ctrl_c(manager.cancel_token());
            let report = manager.incremental_index(&repo_id, changes).await?;
            print_report(&repo_id, &report);
        }
        Command::Query {
            repo_id,
            text,
            k,
            budget,
        } => {
            let k = k.unwrap_or(engine.config().retrieval.k);
            let budget = budget.unwrap_or(engine.config().retrieval.context_budget_chars);
            let results = engine.retriever().query(&repo_id, &text, k, None).await?;
            let context = assemble(&results, ContextBudget::Chars(budget));
            if context.is_empty() {
                println!("no matching code found");
                return Ok(());
            }
            println!("{}", context.render());
            println!();
            println!("{}", context.file_summary());
            for (i, citation) in context.citations.iter().enumerate() {
                println!("[{}] {citation}", i + 1);
            }
            if context.omitted > 0 {
                println!("({} result(s) omitted by the budget)", context.omitted);
            }
        }
        Command::Status { repo_id } => {
            let stats = engine.index_manager().stats(&repo_id).await?;
            let status = &stats.status;
            println!("repository:   {repo_id}");
            println!("collection:   {}", stats.collection);
            println!("status:       {}", status.status.as_str());
            println!("files:        {}", status.total_files);
            println!("chunks:       {}", status.total_chunks);
            println!("vectors:      {}", stats.vector_count);
            if let Some(ts) = status.last_indexed_at {
                println!("last indexed: {ts} (unix ms)");
            }
            for path in &status.failed_files {
                println!("failed:       {path}");
            }
        }
        Command::Drop { repo_id } => {
            engine.index_manager().delete_repository(&repo_id).await?;
            println!("dropped {repo_id}");
        }
    }

    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal, finishing in-flight files");
        token.cancel();
    });
}

fn resolve_repo_id(root: &Path, explicit: Option<String>) -> anyhow::Result<String> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    let canonical = root
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", root.display()))?;
    match canonical.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_owned()),
        None => bail!(
            "cannot derive a repository id from {}; pass --repo-id",
            root.display()
        ),
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Files that exist but cannot be read as UTF-8 are still handed to the
/// indexer so they are reported as failed instead of pruned as missing.
fn read_source(root: &Path, path: &Path) -> SourceFile {
    let rel = relative_path(root, path);
    let content = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_owned()));
    match content {
        Ok(content) => SourceFile::new(rel, content),
        Err(reason) => {
            tracing::warn!(path = %path.display(), "unreadable file: {reason}");
            SourceFile::unreadable(rel, reason)
        }
    }
}

fn collect_files(root: &Path) -> anyhow::Result<Vec<SourceFile>> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let files: Vec<SourceFile> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|e| is_indexable(Path::new(&relative_path(root, e.path()))))
        .map(|e| read_source(root, e.path()))
        .collect();
    tracing::info!(root = %root.display(), files = files.len(), "collected files");
    Ok(files)
}

fn collect_changes(root: &Path, files: &[PathBuf]) -> Vec<FileChange> {
    let mut changes = Vec::with_capacity(files.len());
    for file in files {
        let full = if file.is_absolute() {
            file.clone()
        } else {
            root.join(file)
        };
        if full.is_file() {
            changes.push(FileChange::Modified(read_source(root, &full)));
        } else {
            changes.push(FileChange::Deleted(relative_path(root, &full)));
        }
    }
    changes
}

fn print_report(repo_id: &str, report: &IndexReport) {
    println!(
        "{repo_id}: {} file(s) indexed, {} unchanged, {} skipped, {} deleted, {} cancelled",
        report.files_indexed,
        report.files_unchanged,
        report.files_skipped,
        report.files_deleted,
        report.files_cancelled,
    );
    println!(
        "chunks: {} created, {} removed in {} ms ({:.1} chunks/s)",
        report.chunks_created, report.chunks_removed, report.duration_ms, report.chunks_per_second,
    );
    for failed in &report.failed_files {
        println!("failed: {}: {}", failed.file_path, failed.error);
    }
}
