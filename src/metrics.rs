use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// 質問APIの集計カウンタ。回答できなかった質問も total には数える。
#[derive(Debug, Default)]
struct Counters {
    total_queries: u64,
    rejected_queries: u64,
    answered_queries: u64,
    total_similarity: f64,
    total_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub rejected_queries: u64,
    pub avg_similarity: f64,
    pub avg_latency_ms: f64,
}

#[derive(Default)]
pub struct Metrics {
    inner: Mutex<Counters>,
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1クエリにつき必ず1回だけ呼ぶこと。
    /// Latency counts toward the average on every outcome; similarity only
    /// when the query was actually answered.
    pub async fn record(&self, similarity: Option<f32>, latency_ms: f64, rejected: bool) {
        let mut counters = self.inner.lock().await;
        counters.total_queries += 1;
        counters.total_latency_ms += latency_ms;

        if rejected {
            counters.rejected_queries += 1;
            return;
        }

        counters.answered_queries += 1;
        if let Some(similarity) = similarity {
            counters.total_similarity += f64::from(similarity);
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.inner.lock().await;

        let avg_similarity = if counters.answered_queries > 0 {
            counters.total_similarity / counters.answered_queries as f64
        } else {
            0.0
        };
        let avg_latency_ms = if counters.total_queries > 0 {
            counters.total_latency_ms / counters.total_queries as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_queries: counters.total_queries,
            rejected_queries: counters.rejected_queries,
            avg_similarity: round_to(avg_similarity, 4),
            avg_latency_ms: round_to(avg_latency_ms, 2),
        }
    }
}
