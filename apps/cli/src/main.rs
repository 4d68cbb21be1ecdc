//! Weft CLI
//!
//! Starts the service and offers offline helpers for workflow authors.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use weft_common::{init_tracing, WeftConfig};
use weft_domain::Workflow;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Weft workflow engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the management API server
    Serve {
        /// Configuration file (TOML/YAML/JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Parse and validate a workflow definition file
    Validate {
        /// Workflow file (.json, .yaml, .yml)
        file: PathBuf,
    },
    /// Print a summary of a workflow definition file
    Describe {
        /// Workflow file (.json, .yaml, .yml)
        file: PathBuf,
    },
}

fn read_workflow(path: &Path) -> Result<Workflow> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let workflow = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => serde_yml::from_str(&raw)?,
        Some("json") => serde_json::from_str(&raw)?,
        other => bail!("unsupported workflow file extension: {other:?}"),
    };
    Ok(workflow)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            init_tracing();
            let config = WeftConfig::load(config.as_deref())?;
            weft_api::serve(&config).await
        }
        Commands::Validate { file } => {
            let workflow = read_workflow(&file)?;
            workflow.validate().map_err(|err| {
                anyhow::anyhow!("{}: {err}", file.display())
            })?;
            println!("{}: workflow '{}' version {} is valid", file.display(), workflow.id, workflow.version);
            Ok(())
        }
        Commands::Describe { file } => {
            let workflow = read_workflow(&file)?;
            println!("workflow:    {}", workflow.id);
            println!("name:        {}", workflow.name);
            println!("version:     {}", workflow.version);
            if !workflow.description.is_empty() {
                println!("description: {}", workflow.description);
            }
            println!("steps:");
            for step in workflow.flattened() {
                println!("  {:<24} {}", step.id, step.kind_name());
            }
            Ok(())
        }
    }
}
