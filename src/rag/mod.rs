pub mod embeddings;
pub mod retrieval;
pub mod vector_store;

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::indexer::chunker::{chunk_text, CHUNK_OVERLAP, CHUNK_SIZE};
use crate::indexer::extractor::extract_text;
use crate::indexer::walker::SupportedFormat;
use self::embeddings::EmbeddingClient;
use self::retrieval::{apply_confidence_gate, score_hits, ScoredChunk, TOP_K};
use self::vector_store::VectorStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStatus {
    pub is_ingesting: bool,
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub documents_ingested: usize,
    pub chunks_indexed: usize,
    pub last_error: Option<String>,
}

pub struct RagEngine {
    embeddings: EmbeddingClient,
    store: VectorStore,
    status: Mutex<IngestStatus>,
    // Serializes whole documents so each one gets a contiguous id range.
    ingest_lock: Mutex<()>,
}

impl RagEngine {
    pub fn new(embeddings: EmbeddingClient, store: VectorStore) -> Self {
        Self {
            embeddings,
            store,
            status: Mutex::new(IngestStatus {
                is_ingesting: false,
                last_ingested_at: None,
                documents_ingested: 0,
                chunks_indexed: 0,
                last_error: None,
            }),
            ingest_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> IngestStatus {
        self.status.lock().await.clone()
    }

    pub async fn index_len(&self) -> usize {
        self.store.len().await
    }

    /// ドキュメント1件を抽出・チャンク分割して索引に追加する。割り当てたIDを返す。
    async fn ingest_document(
        &self,
        source: &str,
        path: &Path,
        format: SupportedFormat,
    ) -> Result<Vec<usize>> {
        let text = extract_text(path, format)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks = chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();

        let batch_size = 32;
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let batch_embeddings = self.embeddings.embed(batch).await?;
            embeddings.extend(batch_embeddings);
        }

        // 1回のappendでID採番と永続化をまとめる
        let ids = self.store.append(source, texts, embeddings).await?;
        Ok(ids)
    }

    /// Extraction runs inside the contained region; a failing or panicking
    /// file surfaces in `last_error`.
    pub async fn run_ingest(
        &self,
        source: &str,
        path: &Path,
        format: SupportedFormat,
    ) -> Result<()> {
        let _guard = self.ingest_lock.lock().await;

        {
            let mut status = self.status.lock().await;
            status.is_ingesting = true;
            status.last_error = None;
        }

        // Use AssertUnwindSafe + catch_unwind to catch panics (e.g., from PDF
        // extraction) so that is_ingesting always resets to false
        let result = std::panic::AssertUnwindSafe(self.ingest_document(source, path, format))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(ids)) => {
                let mut status = self.status.lock().await;
                status.is_ingesting = false;
                status.last_ingested_at = Some(Utc::now());
                status.documents_ingested += 1;
                status.chunks_indexed += ids.len();
                status.last_error = None;
                tracing::info!("Ingested {}: {} chunks", source, ids.len());
            }
            Ok(Err(e)) => {
                let error_msg = format!("Ingestion error: {}", e);
                tracing::error!("{}", error_msg);
                let mut status = self.status.lock().await;
                status.is_ingesting = false;
                status.last_error = Some(error_msg);
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("Ingestion panicked: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("Ingestion panicked: {}", s)
                } else {
                    "Ingestion panicked with unknown error".to_string()
                };
                tracing::error!("{}", panic_msg);
                let mut status = self.status.lock().await;
                status.is_ingesting = false;
                status.last_error = Some(panic_msg);
            }
        }

        let status = self.status.lock().await;
        if let Some(ref err) = status.last_error {
            anyhow::bail!("{}", err);
        }
        Ok(())
    }

    /// 質問に対する近傍チャンクと最高類似度を返す。
    /// 索引が空のときは埋め込みAPIを呼ばずに即returnする。
    pub async fn retrieve(&self, question: &str) -> Result<(Vec<ScoredChunk>, f32)> {
        if self.store.is_empty().await {
            return Ok((Vec::new(), 0.0));
        }

        let query = self.embeddings.embed_one(question).await?;
        let hits = self.store.search(&query, TOP_K).await?;
        let scored = score_hits(hits);
        Ok(apply_confidence_gate(scored))
    }
}
