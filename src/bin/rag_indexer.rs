use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use rag_qa::indexer::chunker::{chunk_text, CHUNK_OVERLAP, CHUNK_SIZE};
use rag_qa::indexer::extractor::extract_text;
use rag_qa::indexer::walker::{walk_directory, SupportedFormat};
use rag_qa::rag::embeddings::EmbeddingClient;
use rag_qa::rag::vector_store::VectorStore;

#[derive(Parser, Debug)]
#[command(name = "rag-indexer")]
#[command(about = "Index documents into the vector store")]
struct Args {
    /// Directory to recursively index
    #[arg(short, long)]
    dir: PathBuf,

    /// Directory holding the persisted index pair
    #[arg(long, env = "INDEX_DIR", default_value = "data/index")]
    index_dir: PathBuf,

    /// OpenAI-compatible embedding endpoint
    #[arg(long, env = "EMBEDDING_URL", default_value = "http://localhost:4000")]
    embedding_url: String,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Bearer token for the embedding endpoint
    #[arg(long, env = "EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Maximum chunk size in characters
    #[arg(long, default_value_t = CHUNK_SIZE)]
    chunk_size: usize,

    /// Overlap between chunks in characters
    #[arg(long, default_value_t = CHUNK_OVERLAP)]
    chunk_overlap: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if !args.dir.exists() {
        anyhow::bail!("Directory does not exist: {}", args.dir.display());
    }

    let embeddings = EmbeddingClient::new(
        args.embedding_url.clone(),
        args.embedding_model.clone(),
        args.embedding_api_key.clone(),
    )?;

    println!("Opening index at {}...", args.index_dir.display());
    let store = VectorStore::open(args.index_dir.clone())?;

    println!("Scanning directory: {}", args.dir.display());
    let files = walk_directory(&args.dir);
    println!("Found {} supported files", files.len());

    if files.is_empty() {
        println!("No supported files found. Exiting.");
        return Ok(());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut success_count = 0usize;
    let mut fail_count = 0usize;
    let mut total_chunks = 0usize;
    let mut failed_files: Vec<(PathBuf, String)> = Vec::new();

    for (path, format) in &files {
        pb.set_message(format!("{}", path.file_name().unwrap_or_default().to_string_lossy()));

        match process_file(path, *format, &embeddings, &store, &args).await {
            Ok(chunk_count) => {
                success_count += 1;
                total_chunks += chunk_count;
            }
            Err(e) => {
                tracing::warn!("Failed to process {}: {}", path.display(), e);
                failed_files.push((path.clone(), format!("{}", e)));
                fail_count += 1;
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("done");

    println!("\nIndexing complete!");
    println!("  Files processed: {}/{}", success_count, files.len());
    println!("  Files failed:    {}", fail_count);
    println!("  Total chunks:    {}", total_chunks);
    println!("  Index size:      {}", store.len().await);
    println!("  Index dir:       {}", args.index_dir.display());

    if !failed_files.is_empty() {
        println!("\nFailed files:");
        for (path, err) in &failed_files {
            println!("  {}: {}", path.display(), err);
        }
    }

    Ok(())
}

async fn process_file(
    path: &PathBuf,
    format: SupportedFormat,
    embeddings: &EmbeddingClient,
    store: &VectorStore,
    args: &Args,
) -> Result<usize> {
    let text = extract_text(path, format)?;

    if text.trim().is_empty() {
        return Ok(0);
    }

    let chunks = chunk_text(&text, args.chunk_size, args.chunk_overlap);
    let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let batch_size = 32;
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        vectors.extend(embeddings.embed(batch).await?);
    }

    let ids = store.append(&source, texts, vectors).await?;
    Ok(ids.len())
}
