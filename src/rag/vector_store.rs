use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub const INDEX_FILE: &str = "index.json";
pub const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding dimension mismatch: index holds {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("persisted index is corrupt: {0}")]
    Corrupt(String),
}

/// One ingested passage. Immutable once appended; `chunk_id` doubles as the
/// position of its vector in the flat index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub text: String,
    pub source: String,
    pub chunk_id: usize,
}

/// Exhaustive squared-L2 index over fixed-dimension vectors. The dimension
/// is pinned by the first vector ever appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Scans every stored vector and returns up to `k` `(position, squared
    /// distance)` pairs, nearest first. Ties break on position.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, v)| (pos, squared_distance(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[derive(Debug)]
struct IndexState {
    index: Option<FlatIndex>,
    metadata: Vec<ChunkMeta>,
}

/// Flat vector index plus aligned chunk metadata, persisted together as
/// `index.json` + `meta.json` under one directory. Appends hold the write
/// lock across mutate-then-persist; searches read the last committed state.
#[derive(Debug)]
pub struct VectorStore {
    dir: PathBuf,
    state: RwLock<IndexState>,
}

impl VectorStore {
    /// Opens the store, loading the persisted pair if present. Absence of
    /// either file is the normal first-run state, not an error.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let (index, metadata) = load_persisted(&dir)?;

        match &index {
            Some(idx) => tracing::info!(
                "Vector index loaded: {} chunks, dim {} ({})",
                idx.len(),
                idx.dim(),
                dir.display()
            ),
            None => tracing::info!("No persisted index at {}, starting empty", dir.display()),
        }

        Ok(Self {
            dir,
            state: RwLock::new(IndexState { index, metadata }),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.metadata.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.metadata.is_empty()
    }

    /// Appends one document's chunks with their embeddings and persists the
    /// pair. Chunk ids continue from the current metadata length, so they
    /// stay monotonic and gap-free. The whole document is rejected on a
    /// dimension mismatch; a failed persist rolls the in-memory state back
    /// to the committed snapshot.
    pub async fn append(
        &self,
        source: &str,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Vec<usize>> {
        if texts.len() != embeddings.len() {
            anyhow::bail!(
                "{} chunks with {} embeddings for {}",
                texts.len(),
                embeddings.len(),
                source
            );
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.write().await;

        let expected = match &state.index {
            Some(idx) => idx.dim(),
            None => embeddings[0].len(),
        };
        for embedding in &embeddings {
            if embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                }
                .into());
            }
        }

        let base_id = state.metadata.len();
        let prior_vectors = state.index.as_ref().map(|idx| idx.len()).unwrap_or(0);

        if state.index.is_none() {
            state.index = Some(FlatIndex::new(expected));
        }
        if let Some(index) = state.index.as_mut() {
            index.vectors.extend(embeddings);
        }
        for (i, text) in texts.into_iter().enumerate() {
            state.metadata.push(ChunkMeta {
                text,
                source: source.to_string(),
                chunk_id: base_id + i,
            });
        }
        let assigned: Vec<usize> = (base_id..state.metadata.len()).collect();

        if let Err(e) = persist(&self.dir, &state) {
            // Roll back so readers keep seeing the committed snapshot.
            state.metadata.truncate(base_id);
            if prior_vectors == 0 {
                state.index = None;
            } else if let Some(index) = state.index.as_mut() {
                index.vectors.truncate(prior_vectors);
            }
            return Err(e);
        }

        tracing::info!(
            "Appended {} chunks from {} (index now {})",
            assigned.len(),
            source,
            state.metadata.len()
        );
        Ok(assigned)
    }

    /// Nearest neighbors for `query` with their metadata, nearest first.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(ChunkMeta, f32)>> {
        let state = self.state.read().await;
        let index = match &state.index {
            Some(idx) => idx,
            None => return Ok(Vec::new()),
        };
        if query.len() != index.dim() {
            return Err(StoreError::DimensionMismatch {
                expected: index.dim(),
                got: query.len(),
            }
            .into());
        }

        let hits = index.search(query, k);
        Ok(hits
            .into_iter()
            .map(|(pos, dist)| (state.metadata[pos].clone(), dist))
            .collect())
    }
}

fn load_persisted(dir: &Path) -> Result<(Option<FlatIndex>, Vec<ChunkMeta>)> {
    let index_path = dir.join(INDEX_FILE);
    let meta_path = dir.join(META_FILE);

    // Either file missing means "nothing committed yet": the expected
    // first-run state, or an append that never reached its second rename.
    if !index_path.exists() || !meta_path.exists() {
        return Ok((None, Vec::new()));
    }

    let index_data = std::fs::read(&index_path)?;
    let index: FlatIndex = serde_json::from_slice(&index_data)
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", INDEX_FILE, e)))?;
    let meta_data = std::fs::read(&meta_path)?;
    let metadata: Vec<ChunkMeta> = serde_json::from_slice(&meta_data)
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", META_FILE, e)))?;

    if index.vectors.len() != metadata.len() {
        return Err(StoreError::Corrupt(format!(
            "{} vectors but {} metadata records",
            index.vectors.len(),
            metadata.len()
        ))
        .into());
    }
    for (pos, meta) in metadata.iter().enumerate() {
        if meta.chunk_id != pos {
            return Err(StoreError::Corrupt(format!(
                "chunk_id {} at position {}",
                meta.chunk_id, pos
            ))
            .into());
        }
    }
    for vector in &index.vectors {
        if vector.len() != index.dim {
            return Err(StoreError::Corrupt(format!(
                "vector of dim {} in index of dim {}",
                vector.len(),
                index.dim
            ))
            .into());
        }
    }

    Ok((Some(index), metadata))
}

/// Writes both files to a temp path and renames, index first. A crash
/// between the renames is caught at the next load as a length mismatch.
fn persist(dir: &Path, state: &IndexState) -> Result<()> {
    let index = state
        .index
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("persist called with no index"))?;
    std::fs::create_dir_all(dir)?;

    let index_tmp = dir.join(format!("{}.tmp", INDEX_FILE));
    let meta_tmp = dir.join(format!("{}.tmp", META_FILE));
    std::fs::write(&index_tmp, serde_json::to_vec(index)?)?;
    std::fs::write(&meta_tmp, serde_json::to_vec(&state.metadata)?)?;
    std::fs::rename(&index_tmp, dir.join(INDEX_FILE))?;
    std::fs::rename(&meta_tmp, dir.join(META_FILE))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_without_files_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path().join("index")).unwrap();
        assert!(store.is_empty().await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_append_assigns_gap_free_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();

        let ids = store
            .append(
                "a.txt",
                texts(&["one", "two"]),
                vec![vec![0.0, 0.0], vec![1.0, 0.0]],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![0, 1]);

        let ids = store
            .append("b.txt", texts(&["three"]), vec![vec![0.0, 1.0]])
            .await
            .unwrap();
        assert_eq!(ids, vec![2]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_persisted_pair_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open(dir.path()).unwrap();
            store
                .append(
                    "doc.txt",
                    texts(&["alpha", "beta"]),
                    vec![vec![0.0, 0.0], vec![2.0, 0.0]],
                )
                .await
                .unwrap();
        }

        let store = VectorStore::open(dir.path()).unwrap();
        assert_eq!(store.len().await, 2);
        let hits = store.search(&[0.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.text, "alpha");
        assert_eq!(hits[0].0.chunk_id, 0);
        assert_eq!(hits[0].1, 0.0);
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .append(
                "doc.txt",
                texts(&["near", "mid", "far"]),
                vec![vec![1.0, 0.0], vec![3.0, 0.0], vec![9.0, 0.0]],
            )
            .await
            .unwrap();

        let hits = store.search(&[0.0, 0.0], 3).await.unwrap();
        let order: Vec<&str> = hits.iter().map(|(m, _)| m.text.as_str()).collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
        assert!(hits[0].1 < hits[1].1 && hits[1].1 < hits[2].1);
    }

    #[tokio::test]
    async fn test_search_returns_at_most_len_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .append("doc.txt", texts(&["only"]), vec![vec![0.5, 0.5]])
            .await
            .unwrap();

        let hits = store.search(&[0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .append("a.txt", texts(&["seed"]), vec![vec![0.0, 0.0, 0.0]])
            .await
            .unwrap();

        let err = store
            .append(
                "b.txt",
                texts(&["ok", "bad"]),
                vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0]],
            )
            .await
            .unwrap_err();
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::DimensionMismatch { expected, got }) => {
                assert_eq!(*expected, 3);
                assert_eq!(*got, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Nothing from the rejected document made it in.
        assert_eq!(store.len().await, 1);
        let reopened = VectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_query_dimension_checked() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .append("a.txt", texts(&["seed"]), vec![vec![0.0, 0.0]])
            .await
            .unwrap();

        let err = store.search(&[0.0, 0.0, 0.0], 1).await.unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some());
    }

    #[tokio::test]
    async fn test_empty_append_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        let ids = store.append("empty.txt", vec![], vec![]).await.unwrap();
        assert!(ids.is_empty());
        assert!(store.is_empty().await);
        assert!(!dir.path().join(INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_mismatched_counts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        let result = store
            .append("a.txt", texts(&["one", "two"]), vec![vec![0.0]])
            .await;
        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back_to_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        store
            .append("a.txt", texts(&["kept"]), vec![vec![1.0, 0.0]])
            .await
            .unwrap();

        // Squat on the temp path so the next persist cannot write it.
        std::fs::create_dir(dir.path().join(format!("{}.tmp", INDEX_FILE))).unwrap();

        let result = store
            .append("b.txt", texts(&["lost"]), vec![vec![0.0, 1.0]])
            .await;
        assert!(result.is_err());

        // Readers still see the committed snapshot only.
        assert_eq!(store.len().await, 1);
        let hits = store.search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.text, "kept");

        // The pair on disk was never touched.
        let reopened = VectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_length_mismatch_between_files_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open(dir.path()).unwrap();
            store
                .append(
                    "a.txt",
                    texts(&["one", "two"]),
                    vec![vec![0.0, 0.0], vec![1.0, 1.0]],
                )
                .await
                .unwrap();
        }

        // Simulate a crash between the two renames: metadata lags the index.
        let meta: Vec<ChunkMeta> = vec![ChunkMeta {
            text: "one".to_string(),
            source: "a.txt".to_string(),
            chunk_id: 0,
        }];
        std::fs::write(
            dir.path().join(META_FILE),
            serde_json::to_vec(&meta).unwrap(),
        )
        .unwrap();

        let err = VectorStore::open(dir.path()).unwrap_err();
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::Corrupt(_)) => {}
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_meta_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open(dir.path()).unwrap();
            store
                .append("a.txt", texts(&["one"]), vec![vec![0.0, 0.0]])
                .await
                .unwrap();
        }
        std::fs::remove_file(dir.path().join(META_FILE)).unwrap();

        let store = VectorStore::open(dir.path()).unwrap();
        assert!(store.is_empty().await);
    }
}
