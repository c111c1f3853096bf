use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Multipart, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::indexer::extractor::format_for_upload;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{
    AnswerResponse, Citation, HealthResponse, QuestionRequest, StatusResponse, UploadResponse,
};
use crate::rag::RagEngine;
use crate::rate_limiter::{RateDecision, RateLimiter};

pub struct AppState {
    pub rag_engine: RagEngine,
    pub completion: CompletionClient,
    pub rate_limiter: RateLimiter,
    pub metrics: Metrics,
    pub upload_dir: PathBuf,
}

pub fn router(state: Arc<AppState>) -> Router {
    // CORS設定
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(health_handler))
        .route("/upload", post(upload_handler))
        .route("/ask", post(ask_handler))
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_string(),
    })
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let mut saved: Option<(PathBuf, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|n| n.to_string())
            .ok_or((StatusCode::BAD_REQUEST, "Missing file name".to_string()))?;
        // クライアント由来のパス要素は落としてファイル名だけ使う
        let file_name = Path::new(&file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty() && n != "..")
            .ok_or((StatusCode::BAD_REQUEST, "Invalid file name".to_string()))?;

        let data = field.bytes().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read upload: {}", e),
            )
        })?;

        let path = state.upload_dir.join(&file_name);
        tokio::fs::write(&path, &data).await.map_err(|e| {
            tracing::error!("Failed to save upload {}: {}", path.display(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to save upload: {}", e),
            )
        })?;

        tracing::info!("Saved upload {} ({} bytes)", path.display(), data.len());
        saved = Some((path, file_name));
        break;
    }

    let (path, file_name) =
        saved.ok_or((StatusCode::BAD_REQUEST, "No file field in request".to_string()))?;

    // 取り込みはバックグラウンドで行い、アップロードは即時に応答する
    let task_state = state.clone();
    tokio::spawn(async move {
        let format = format_for_upload(&path);
        if let Err(e) = task_state
            .rag_engine
            .run_ingest(&file_name, &path, format)
            .await
        {
            tracing::error!("Background ingestion failed for {}: {}", file_name, e);
        }
    });

    Ok(Json(UploadResponse {
        message: "Document uploaded. Processing started.".to_string(),
    }))
}

async fn ask_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<QuestionRequest>,
) -> Result<Json<AnswerResponse>, Response> {
    // レート制限はメトリクスにも索引にも触れる前に判定する
    let identity = addr.ip().to_string();
    if let RateDecision::Limited { retry_after_secs } = state.rate_limiter.check(&identity).await {
        tracing::info!("Rate limited {}", identity);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            "Rate limit exceeded. Try again later.".to_string(),
        )
            .into_response());
    }

    let request_id = Uuid::new_v4();
    let start = Instant::now();

    let retrieval = state.rag_engine.retrieve(&payload.question).await;
    // Latency covers the retrieval phase, not answer generation.
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    let (retrieved, max_similarity) = match retrieval {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Retrieval error for request {}: {}", request_id, e);
            state.metrics.record(None, latency_ms, true).await;
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Retrieval error: {}", e),
            )
                .into_response());
        }
    };

    if retrieved.is_empty() {
        tracing::info!(
            "Rejected request {} (max similarity {:.4})",
            request_id,
            max_similarity
        );
        state.metrics.record(None, latency_ms, true).await;
        return Ok(Json(AnswerResponse {
            answer: "I don't know.".to_string(),
            citations: Vec::new(),
        }));
    }

    let context = retrieved
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "\nAnswer the question using ONLY the context below.\nIf the answer is not present, say \"I don't know\".\n\nContext:\n{}\n\nQuestion:\n{}\n",
        context, payload.question
    );

    let answer = match state.completion.complete(&prompt).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::error!("Completion error for request {}: {}", request_id, e);
            state.metrics.record(None, latency_ms, true).await;
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Completion error: {}", e),
            )
                .into_response());
        }
    };

    state.metrics.record(Some(max_similarity), latency_ms, false).await;

    let citations: Vec<Citation> = retrieved
        .iter()
        .map(|c| Citation {
            source: c.source.clone(),
            chunk_id: c.chunk_id,
        })
        .collect();

    tracing::info!(
        "Answered request {} with {} citations (max similarity {:.4})",
        request_id,
        citations.len(),
        max_similarity
    );

    Ok(Json(AnswerResponse { answer, citations }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.rag_engine.status().await;
    let index_chunks = state.rag_engine.index_len().await;
    Json(StatusResponse {
        is_ingesting: status.is_ingesting,
        last_ingested_at: status.last_ingested_at,
        documents_ingested: status.documents_ingested,
        chunks_indexed: status.chunks_indexed,
        index_chunks,
        last_error: status.last_error,
    })
}
