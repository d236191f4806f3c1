use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use campus_rag::processing::{ProgramChunker, ProgramRecord};
use campus_rag::storage::LocalKnowledgeStore;
use campus_rag::{AdmissionsAgent, AdvisorConfig, AdvisorContext, Question};

#[derive(Parser)]
#[command(name = "campus-rag", about = "Ask admissions questions about university degree programs", version)]
struct Cli {
    /// The question to answer
    question: String,

    /// Config file path (defaults to the platform config dir)
    #[arg(long, env = "CAMPUS_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Answer on behalf of this user (enables profile and document actions)
    #[arg(long)]
    user: Option<String>,

    /// Program catalog JSON to search in-process instead of the remote knowledge store
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Print the answer as JSON
    #[arg(long)]
    json: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<AdvisorConfig> {
    let path = match path {
        Some(path) => path.clone(),
        None => {
            let default = AdvisorConfig::default_path();
            if !default.exists() {
                tracing::info!("No config file at {:?}, using defaults", default);
                return Ok(AdvisorConfig::default());
            }
            default
        }
    };
    tracing::info!("Loading config from {:?}", path);
    Ok(AdvisorConfig::from_file(&path)?)
}

async fn load_catalog(path: &PathBuf, context: &AdvisorContext) -> Result<LocalKnowledgeStore> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read catalog {:?}", path))?;
    let records: Vec<ProgramRecord> =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse catalog {:?}", path))?;
    LocalKnowledgeStore::from_records(&records, &ProgramChunker::default(), context.embeddings.as_ref()).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.question.trim().is_empty() {
        bail!("Question must not be empty");
    }

    let config = load_config(cli.config.as_ref())?;
    let mut context = AdvisorContext::from_config(config)?;
    if let Some(catalog) = &cli.catalog {
        let store = load_catalog(catalog, &context).await?;
        context = context.with_knowledge_store(Arc::new(store));
    }

    let agent = AdmissionsAgent::new(context);
    let mut question = Question::new(cli.question);
    if let Some(user) = cli.user {
        question = question.for_user(user);
    }

    let answer = agent.ask(&question).await;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", answer.text);
        if !answer.sources.is_empty() {
            println!("\nSources:");
            for source in &answer.sources {
                println!("- {}", source);
            }
        }
    }
    Ok(())
}
