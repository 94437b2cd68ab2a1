use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docrag::{
    config::Config,
    logging::{self, ConsoleTarget},
    processing::{DocRagService, QueryRequest},
};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "doc-rag-admin",
    about = "Rebuild and query the document index without starting the server"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the index from every stored upload.
    Reindex,
    /// Answer a question from the current index.
    Query {
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        rerank: bool,
        #[arg(long)]
        llm: bool,
        #[arg(long)]
        doc_id: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Show the answer plan chosen for a question.
    Classify { question: String },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init_tracing(ConsoleTarget::Stderr);
    let config = Config::from_env().context("failed to load configuration")?;
    let service = DocRagService::from_config(&config).context("failed to initialize service")?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    match cli.command {
        Command::Reindex => {
            let outcome = runtime
                .block_on(service.reindex())
                .context("reindex failed")?;
            print_json(&outcome)
        }
        Command::Query {
            question,
            top_k,
            rerank,
            llm,
            doc_id,
            source,
        } => {
            if question.trim().is_empty() {
                bail!("question must not be empty");
            }
            let request = QueryRequest {
                question,
                top_k,
                use_llm: llm.then_some(true),
                use_rerank: rerank.then_some(true),
                doc_id,
                source_filename: source,
            };
            let outcome = runtime
                .block_on(service.query(request))
                .context("query failed")?;
            print_json(&outcome)
        }
        Command::Classify { question } => print_json(&service.classify(&question)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
