use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use certflow_engine::{cleanup_runs, recover_interrupted_runs};
use certflow_expr::{Bindings, Expr};
use certflow_store::{Repositories, SqliteStore, WorkflowRunRepository};
use certflow_workflow::{NodeDef, NodeGraph};

/// Certflow - certificate issuance and deployment workflows
#[derive(Parser)]
#[command(name = "certflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// SQLite database URL (default: sqlite://<data dir>/certflow/certflow.db)
  #[arg(long, global = true)]
  database: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a workflow graph file (nested JSON starting at its start node)
  Validate { workflow_file: PathBuf },

  /// Evaluate a condition expression against node outputs
  Eval {
    expr_file: PathBuf,
    /// JSON object of node id -> output name -> value
    bindings_file: PathBuf,
  },

  /// List the runs of a workflow, newest first
  Runs { workflow_id: String },

  /// Fail interrupted runs and apply run retention
  Cleanup,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  match cli.command {
    Some(Commands::Validate { workflow_file }) => validate(&workflow_file)?,
    Some(Commands::Eval {
      expr_file,
      bindings_file,
    }) => eval(&expr_file, &bindings_file)?,
    Some(Commands::Runs { workflow_id }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(list_runs(cli.database, &workflow_id))?;
    }
    Some(Commands::Cleanup) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(cleanup(cli.database))?;
    }
    None => {
      println!("certflow - use --help to see available commands");
    }
  }

  Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn validate(workflow_file: &Path) -> Result<()> {
  let def: NodeDef = read_json(workflow_file)?;
  let graph = NodeGraph::from_def(&def)
    .with_context(|| format!("invalid workflow: {}", workflow_file.display()))?;
  println!("valid: {} nodes", graph.len());
  Ok(())
}

fn eval(expr_file: &Path, bindings_file: &Path) -> Result<()> {
  let expr: Expr = read_json(expr_file)?;
  let bindings: Bindings = read_json(bindings_file)?;
  let value = expr.eval(&bindings).context("evaluation failed")?;
  println!("{}", serde_json::to_string_pretty(&value)?);
  Ok(())
}

async fn open_store(database: Option<String>) -> Result<SqliteStore> {
  let url = match database {
    Some(url) => url,
    None => {
      let dir = dirs::data_dir()
        .context("could not determine data directory")?
        .join("certflow");
      std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
      format!("sqlite://{}", dir.join("certflow.db").display())
    }
  };
  SqliteStore::connect(&url)
    .await
    .with_context(|| format!("failed to open database {url}"))
}

async fn list_runs(database: Option<String>, workflow_id: &str) -> Result<()> {
  let store = open_store(database).await?;
  let runs = store.list_runs(workflow_id).await?;
  for run in &runs {
    println!(
      "{}\t{}\t{}\t{}",
      run.id,
      run.status.as_str(),
      run.created_at.to_rfc3339(),
      run.error.as_deref().unwrap_or("")
    );
  }
  eprintln!("{} runs", runs.len());
  store.close().await;
  Ok(())
}

async fn cleanup(database: Option<String>) -> Result<()> {
  let store = std::sync::Arc::new(open_store(database).await?);
  let repositories = Repositories::from_store(store.clone());

  let recovered = recover_interrupted_runs(&repositories).await?;
  let deleted = cleanup_runs(&repositories).await?;
  println!("recovered {recovered} interrupted runs, deleted {deleted} expired runs");
  store.close().await;
  Ok(())
}
