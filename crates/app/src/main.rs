use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_rag_core::{
    ingest_folder, ingest_pdfs, ingest_upload, initialize, Answer, ConfigError, DistanceMetric,
    Embedder, HashingEmbedder, IngestionOptions, IngestionSummary, LanguageModel,
    LocalVectorStore, OllamaEmbedder, OllamaModel, PromptFormat, QdrantStore, RagContext,
    RagSettings, StoreStatus, VectorIndex,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Rag = RagContext<Box<dyn Embedder>, Box<dyn LanguageModel>, Box<dyn VectorIndex>>;

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ollama base URL (embeddings and generation)
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Language model used to answer questions
    #[arg(long, env = "RAG_MODEL", default_value = "llama3.2:3b")]
    model: String,

    /// Embedding model used for chunks and queries
    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Embedder implementation
    #[arg(long, value_enum, default_value_t = EmbedderKind::Ollama)]
    embedder: EmbedderKind,

    /// Directory that holds the local vector store
    #[arg(long, env = "RAG_PERSIST_DIR", default_value = "./chroma_store")]
    persist_dir: PathBuf,

    /// Collection name inside the store
    #[arg(long, env = "RAG_COLLECTION", default_value = "rag_docs")]
    collection: String,

    /// Prompt layout for the configured model (`llama3` or `plain`)
    #[arg(long, env = "RAG_PROMPT_FORMAT", default_value = "llama3")]
    prompt_format: PromptFormat,

    /// Similarity metric for a new index (`cosine` or `l2`); existing ones keep theirs
    #[arg(long, env = "RAG_METRIC", default_value = "cosine")]
    metric: DistanceMetric,

    /// Chunks retrieved per question
    #[arg(long, env = "RAG_TOP_K", default_value = "3")]
    top_k: usize,

    /// Hits listed by `search`
    #[arg(long, env = "RAG_SEARCH_K", default_value = "10")]
    search_k: usize,

    /// Vector store backend
    #[arg(long, env = "RAG_BACKEND", value_enum, default_value_t = Backend::Local)]
    backend: Backend,

    /// Qdrant base URL, used with `--backend qdrant`
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Ollama,
    Hashing,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index PDF files.
    Ingest {
        /// PDF files to ingest.
        paths: Vec<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        #[arg(long, default_value = "200")]
        chunk_overlap: usize,
    },
    /// Index one PDF under a display name.
    Upload {
        file: PathBuf,
        /// Name stored with every chunk (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
    },
    /// Answer a question from the indexed documents.
    Ask {
        question: String,
        /// Do not retry unsure answers with the simple prompt.
        #[arg(long, default_value_t = false)]
        no_fallback: bool,
        /// Print the retrieved chunks after the answer.
        #[arg(long, default_value_t = false)]
        show_sources: bool,
    },
    /// List the chunks most similar to a query.
    Search { query: String },
    /// Show index size and configured models.
    Stats,
    /// List documents present in the index.
    Files,
    /// Interactive question loop.
    Chat,
}

impl Cli {
    fn settings(&self) -> RagSettings {
        RagSettings {
            ollama_url: self.ollama_url.clone(),
            model_name: self.model.clone(),
            embedding_model: self.embedding_model.clone(),
            persist_dir: self.persist_dir.clone(),
            collection: self.collection.clone(),
            prompt_format: self.prompt_format,
            metric: self.metric,
            top_k: self.top_k,
            search_k: self.search_k,
        }
    }
}

async fn open_index(
    backend: Backend,
    settings: &RagSettings,
    qdrant_url: &str,
    dimensions: usize,
) -> Result<Box<dyn VectorIndex>, ConfigError> {
    match backend {
        Backend::Local => {
            let location = settings.persist_dir.join(&settings.collection);
            let store = LocalVectorStore::open(location, dimensions, settings.metric).await?;
            Ok(Box::new(store))
        }
        Backend::Qdrant => {
            let mut store =
                QdrantStore::new(qdrant_url, &settings.collection, dimensions, settings.metric);
            store.ensure_collection().await?;
            Ok(Box::new(store))
        }
    }
}

async fn build_context(cli: &Cli) -> Result<Rag, ConfigError> {
    let settings = cli.settings();
    let embedder: Box<dyn Embedder> = match cli.embedder {
        EmbedderKind::Ollama => Box::new(OllamaEmbedder::new(
            &settings.ollama_url,
            settings.embedding_model.clone(),
        )?),
        EmbedderKind::Hashing => Box::new(HashingEmbedder::default()),
    };
    let model: Box<dyn LanguageModel> =
        Box::new(OllamaModel::new(&settings.ollama_url, settings.model_name.clone())?);

    initialize(
        embedder,
        model,
        |dimensions| open_index(cli.backend, &settings, &cli.qdrant_url, dimensions),
        &settings,
    )
    .await
}

fn report_summary(summary: &IngestionSummary) {
    for skipped in &summary.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }

    println!(
        "{} chunks from {} documents ingested ({} skipped) at {}",
        summary.chunks_added,
        summary.documents_processed,
        summary.documents_skipped(),
        summary.completed_at.to_rfc3339()
    );
}

fn print_answer(answer: &Answer, show_sources: bool) {
    println!("answer: {}", answer.answer);
    if show_sources {
        for (index, source) in answer.sources.iter().enumerate() {
            println!("[source {}]\n{source}", index + 1);
        }
    }
}

async fn chat(rag: &Rag) -> anyhow::Result<()> {
    println!("Ask me anything about your PDFs. Type `add` to ingest more files, `quit` to leave.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("\nquestion> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let query = line?.trim().to_string();

        match query.to_lowercase().as_str() {
            "quit" | "exit" | "q" => break,
            "" => continue,
            "add" => {
                print!("PDF paths separated by commas: ");
                io::stdout().flush()?;
                let Some(raw) = lines.next() else {
                    break;
                };
                let paths: Vec<PathBuf> = raw?
                    .split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from)
                    .collect();
                match ingest_pdfs(rag, &paths, IngestionOptions::default()).await {
                    Ok(summary) => report_summary(&summary),
                    Err(error) => warn!(error = %error, "ingestion failed"),
                }
            }
            _ => {
                let answer = rag.ask(&query).await;
                print_answer(&answer, false);
            }
        }
    }

    Ok(())
}

fn display_name(file: &Path, name: Option<String>) -> anyhow::Result<String> {
    if let Some(name) = name {
        return Ok(name);
    }
    file.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("path has no file name: {}", file.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = %cli.model,
        prompt_format = %cli.prompt_format,
        "pdf-rag boot"
    );

    let rag = build_context(&cli)
        .await
        .context("failed to initialize the RAG system")?;

    match cli.command {
        Command::Ingest {
            paths,
            folder,
            chunk_size,
            chunk_overlap,
        } => {
            let options = IngestionOptions {
                chunk_size,
                chunk_overlap,
            };
            let summary = match folder {
                Some(folder) if paths.is_empty() => ingest_folder(&rag, &folder, options).await?,
                Some(_) => anyhow::bail!("pass either PDF paths or --folder, not both"),
                None => ingest_pdfs(&rag, &paths, options).await?,
            };
            report_summary(&summary);
        }
        Command::Upload { file, name } => {
            let display_name = display_name(&file, name)?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let summary =
                ingest_upload(&rag, &bytes, &display_name, IngestionOptions::default()).await?;
            report_summary(&summary);
        }
        Command::Ask {
            question,
            no_fallback,
            show_sources,
        } => {
            println!("question: {question}");
            let answer = if no_fallback {
                rag.query(&question).await
            } else {
                rag.ask(&question).await
            };
            print_answer(&answer, show_sources);
        }
        Command::Search { query } => {
            let hits = rag.search_default(&query).await?;
            println!("query: {query}");
            for hit in hits {
                let title = hit
                    .original_filename
                    .clone()
                    .unwrap_or_else(|| hit.source.clone());
                println!("[{}] relevance={:.2} source={}", hit.rank, hit.relevance, title);
                println!("  {}", hit.snippet);
            }
        }
        Command::Stats => {
            let stats = rag.stats().await;
            match (&stats.status, stats.entry_count) {
                (StoreStatus::Ready, Some(count)) => println!("entries: {count}"),
                (StoreStatus::Error(error), _) => println!("entries: unknown ({error})"),
                (StoreStatus::Ready, None) => println!("entries: unknown"),
            }
            println!("model: {}", stats.model_name);
            println!("embedding_model: {}", stats.embedding_model);
        }
        Command::Files => {
            for file in rag.list_files().await? {
                println!("{}\t{}", file.name, file.path);
            }
        }
        Command::Chat => chat(&rag).await?,
    }

    Ok(())
}
