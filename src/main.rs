use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod agents;
mod config;
mod documents;
mod error;
mod feedback;
mod models;
mod openai;
mod pipeline;
mod report;
mod store;
#[cfg(test)]
mod testing;

use config::PipelineConfig;
use openai::OpenAiClient;
use pipeline::Pipeline;
use store::{KnowledgeStore, Retriever};

#[derive(Parser)]
#[command(name = "study-planner")]
#[command(about = "Personalized study plans from student rubric feedback", long_about = None)]
struct Cli {
    /// Log filter, e.g. "info" or "study_planner=debug"; defaults to RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a study plan for every student in the feedback file
    Plan {
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Run the agents once over all students and write a single file
        #[arg(long)]
        aggregate: bool,
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Open the course index, building it from the documents if needed
    Index {
        /// Delete any persisted index and build it again
        #[arg(long)]
        rebuild: bool,
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Show the passages retrieved for a query
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 3)]
        k: usize,
        #[command(flatten)]
        index: IndexArgs,
    },
}

#[derive(Args, Default)]
struct IndexArgs {
    #[arg(long)]
    persist_dir: Option<PathBuf>,
    /// Source document for a fresh index; repeat to list several
    #[arg(long = "document")]
    documents: Vec<PathBuf>,
}

impl IndexArgs {
    fn apply(self, config: &mut PipelineConfig) {
        if let Some(dir) = self.persist_dir {
            config.index.persist_dir = dir;
        }
        if !self.documents.is_empty() {
            config.index.documents = self.documents;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = PipelineConfig::from_env();
    config.require_api_key()?;

    let command = cli.command.unwrap_or(Commands::Plan {
        data: None,
        out_dir: None,
        aggregate: false,
        index: IndexArgs::default(),
    });

    match command {
        Commands::Plan {
            data,
            out_dir,
            aggregate,
            index,
        } => {
            if let Some(data) = data {
                config.data_path = data;
            }
            if let Some(out_dir) = out_dir {
                config.output_dir = out_dir;
            }
            index.apply(&mut config);

            let rows = feedback::load_feedback(&config.data_path, &config.columns)
                .with_context(|| format!("failed to load {}", config.data_path.display()))?;
            let students = feedback::group_by_student(rows);
            println!(
                "Loaded feedback for {} students from {}.",
                students.len(),
                config.data_path.display()
            );

            let client = Arc::new(OpenAiClient::new(config.model.clone()));
            let store = KnowledgeStore::open_or_build(&config.index, client.clone())
                .await
                .context("failed to set up the course index")?;
            let pipeline = Pipeline::new(&config, &store, client.as_ref());
            tracing::info!(run_id = %pipeline.run_id(), "starting study plan run");

            if aggregate {
                let path = pipeline.run_aggregate(&students).await?;
                println!("Saved combined plan to {}.", path.display());
            } else {
                let written = pipeline.run_per_student(&students).await?;
                for path in &written {
                    println!("Saved plan to {}.", path.display());
                }
                println!("All {} plans generated.", written.len());
            }
            store.close().await;
        }
        Commands::Index { rebuild, index } => {
            index.apply(&mut config);
            let client = Arc::new(OpenAiClient::new(config.model.clone()));
            let store = if rebuild {
                KnowledgeStore::rebuild(&config.index, client).await?
            } else {
                KnowledgeStore::open_or_build(&config.index, client).await?
            };
            println!(
                "Course index at {} ({:?}) holds {} passages.",
                config.index.persist_dir.display(),
                store.mode(),
                store.passage_count().await?
            );
            store.close().await;
        }
        Commands::Search { query, k, index } => {
            index.apply(&mut config);
            let client = Arc::new(OpenAiClient::new(config.model.clone()));
            let store = KnowledgeStore::open_or_build(&config.index, client).await?;
            let passages = store.retrieve(&query, k).await?;

            if passages.is_empty() {
                println!("No passages found.");
            }
            for passage in &passages {
                println!("- [{}] score {:.3}", passage.label(), passage.score);
                println!("  {}", passage.text.replace('\n', " "));
            }
            store.close().await;
        }
    }

    Ok(())
}
