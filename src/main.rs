use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;

use kbqa_core::{ChatModel, EmbeddingModel, NodeWithScore};
use kbqa_dashscope::{DashScopeConfig, DashScopeEmbedding, OpenAiLike};
use kbqa_rag::{
    DEFAULT_ASSISTANT_PROMPT, DEFAULT_DOCUMENT_PATH, DEFAULT_PERSIST_PATH, DirectoryReader,
    LocalHashEmbedding, QueryEngineOptions, RetrieverQueryEngine, VectorStoreIndex, ask,
    create_query_engine_with, indexing_with, load_index, update_prompt_template,
};
use kbqa_cli::{display_banner, handle_input_with_history, print_help, print_sources};

#[derive(Parser)]
#[command(name = "kbqa")]
#[command(about = "Question-answering chatbot over a local document knowledge base", long_about = None)]
struct Cli {
    /// Log progress (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Embed with the offline hashing model instead of DashScope
    #[arg(long, global = true)]
    offline_embeddings: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a document directory and persist it
    Index {
        #[arg(long, default_value = DEFAULT_DOCUMENT_PATH)]
        docs: PathBuf,
        #[arg(long, default_value = DEFAULT_PERSIST_PATH)]
        persist: PathBuf,
        /// Descend into subdirectories
        #[arg(long)]
        recursive: bool,
    },
    /// Ask one question and stream the answer
    Ask {
        question: String,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Interactive question loop
    Chat {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(Args)]
struct QueryArgs {
    #[arg(long, default_value = DEFAULT_PERSIST_PATH)]
    persist: PathBuf,
    /// Number of document chunks retrieved per question
    #[arg(long, default_value_t = 2)]
    top_k: usize,
    /// Answer as the company help-desk assistant
    #[arg(long, conflicts_with = "prompt_file")]
    assistant_prompt: bool,
    /// Question-answering prompt with {context_str} and {query_str} placeholders
    #[arg(long)]
    prompt_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    kbqa_cli::logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "❌ Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index { docs, persist, recursive } => {
            let embed_model = embedding_model(cli.offline_embeddings)?;
            println!("{} Indexing {}...", "📚".blue(), docs.display());

            let reader = DirectoryReader::new(&docs).recursive(recursive);
            let index = indexing_with(&reader, &persist, embed_model).await?;

            println!(
                "{} Indexed {} chunks into {}",
                "✅".green(),
                index.node_count(),
                persist.display()
            );
        }
        Commands::Ask { question, query } => {
            let config = DashScopeConfig::from_env()?;
            let index = open_index(&query, cli.offline_embeddings, &config)?;
            let engine = build_engine(&index, &query, &config)?;

            ask(&question, &engine).await?;
            println!();
        }
        Commands::Chat { query } => {
            let config = DashScopeConfig::from_env()?;
            let index = open_index(&query, cli.offline_embeddings, &config)?;
            let engine = build_engine(&index, &query, &config)?;

            display_banner(&config.chat_model, &query.persist.display().to_string());
            chat_loop(&engine).await?;
        }
    }
    Ok(())
}

fn embedding_model(offline: bool) -> Result<Arc<dyn EmbeddingModel>> {
    if offline {
        return Ok(Arc::new(LocalHashEmbedding::default()));
    }
    let config = DashScopeConfig::from_env()?;
    Ok(Arc::new(DashScopeEmbedding::from_config(&config)?))
}

fn open_index(query: &QueryArgs, offline: bool, config: &DashScopeConfig) -> Result<VectorStoreIndex> {
    let embed_model: Arc<dyn EmbeddingModel> = if offline {
        Arc::new(LocalHashEmbedding::default())
    } else {
        Arc::new(DashScopeEmbedding::from_config(config)?)
    };
    load_index(&query.persist, embed_model).with_context(|| {
        format!(
            "Could not load index from {} (run `kbqa index` first)",
            query.persist.display()
        )
    })
}

fn build_engine<'a>(
    index: &'a VectorStoreIndex,
    query: &QueryArgs,
    config: &DashScopeConfig,
) -> Result<RetrieverQueryEngine<'a>> {
    let llm: Arc<dyn ChatModel> = Arc::new(OpenAiLike::from_config(config)?);
    let options = QueryEngineOptions {
        similarity_top_k: query.top_k,
        ..Default::default()
    };
    let engine = create_query_engine_with(index, llm, options);

    if query.assistant_prompt {
        return Ok(update_prompt_template(engine, DEFAULT_ASSISTANT_PROMPT)?);
    }
    if let Some(path) = &query.prompt_file {
        let template = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
        return Ok(update_prompt_template(engine, &template)?);
    }
    Ok(engine)
}

async fn chat_loop(engine: &RetrieverQueryEngine<'_>) -> Result<()> {
    let mut history = Vec::new();
    let mut last_sources: Vec<NodeWithScore> = Vec::new();

    loop {
        let input = handle_input_with_history(&mut history)?;
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "exit" | "quit" => {
                println!("{}", "👋 Goodbye!".green());
                break;
            }
            "help" => {
                print_help();
                continue;
            }
            "sources" => {
                print_sources(&last_sources);
                continue;
            }
            _ => {}
        }

        match engine.query(&input).await {
            Ok(response) => {
                last_sources = response.source_nodes.clone();
                if let Err(e) = response.print_response_stream().await {
                    println!();
                    println!("{} Answer interrupted: {}", "❌".red(), e);
                    continue;
                }
                println!();
                println!();
            }
            Err(e) => println!("{} Query failed: {}", "❌".red(), e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["kbqa", "ask", "张三是哪个部门的？"]).unwrap();
        match cli.command {
            Commands::Ask { question, query } => {
                assert_eq!(question, "张三是哪个部门的？");
                assert_eq!(query.persist, PathBuf::from("knowledge_base/tree_test"));
                assert_eq!(query.top_k, 2);
                assert!(!query.assistant_prompt);
            }
            _ => panic!("expected ask"),
        }

        let cli = Cli::try_parse_from(["kbqa", "index", "--recursive", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Index { docs, recursive, .. } => {
                assert_eq!(docs, PathBuf::from("./tree_docs"));
                assert!(recursive);
            }
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn test_prompt_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "kbqa",
            "chat",
            "--assistant-prompt",
            "--prompt-file",
            "prompt.txt",
        ]);
        assert!(parsed.is_err());
    }
}
