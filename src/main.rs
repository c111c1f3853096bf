use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use rag_qa::completion::{CompletionClient, DEFAULT_MODEL};
use rag_qa::metrics::Metrics;
use rag_qa::rag::embeddings::EmbeddingClient;
use rag_qa::rag::vector_store::VectorStore;
use rag_qa::rag::RagEngine;
use rag_qa::rate_limiter::{RateLimiter, RATE_LIMIT, TIME_WINDOW};
use rag_qa::server::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // ロギング初期化
    tracing_subscriber::fmt::init();

    // 環境変数読み込み
    dotenv::dotenv().ok();
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let index_dir = std::env::var("INDEX_DIR").unwrap_or_else(|_| "data/index".to_string());
    let upload_dir = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "data/uploads".to_string());
    let embedding_url =
        std::env::var("EMBEDDING_URL").unwrap_or_else(|_| "http://localhost:4000".to_string());
    let embedding_model = std::env::var("EMBEDDING_MODEL")
        .unwrap_or_else(|_| "text-embedding-3-small".to_string());
    let embedding_api_key = std::env::var("EMBEDDING_API_KEY").ok();
    let completion_url = std::env::var("COMPLETION_URL")
        .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());
    let completion_model =
        std::env::var("COMPLETION_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let completion_api_key = std::env::var("COMPLETION_API_KEY")
        .or_else(|_| std::env::var("GROQ_API_KEY"))
        .ok();

    tracing::info!("Embedding endpoint: {}", embedding_url);
    tracing::info!("Completion endpoint: {}", completion_url);

    // コンポーネント初期化
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .with_context(|| format!("failed to create upload dir {}", upload_dir))?;

    let embeddings = EmbeddingClient::new(embedding_url, embedding_model, embedding_api_key)?;
    let store = VectorStore::open(PathBuf::from(&index_dir))?;
    let completion = CompletionClient::new(completion_url, completion_model, completion_api_key)?;

    let state = Arc::new(AppState {
        rag_engine: RagEngine::new(embeddings, store),
        completion,
        rate_limiter: RateLimiter::new(RATE_LIMIT, TIME_WINDOW),
        metrics: Metrics::new(),
        upload_dir: PathBuf::from(&upload_dir),
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("RAG QA server listening on {}", listener.local_addr()?);

    // クライアントIPをレート制限のキーにするため ConnectInfo 付きで起動する
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
