use crate::embedder::Embedder;
use crate::vector_db::{KnowledgeStore, QueryError, Record};
use ndarray::ArrayView1;
use std::{fmt, sync::Arc};
use tracing::{debug, warn};

/// Why retrieval skipped similarity ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    NoEmbedder,
    EmbeddingFailed(String),
    DimensionMismatch { expected: usize, found: usize },
    NonFiniteQuery,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoEmbedder => write!(f, "no embedder configured"),
            FallbackReason::EmbeddingFailed(e) => write!(f, "embedding failed: {}", e),
            FallbackReason::DimensionMismatch { expected, found } => write!(
                f,
                "query vector has {} dimensions, store has {}",
                found, expected
            ),
            FallbackReason::NonFiniteQuery => write!(f, "query vector has a non-finite component"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalMode {
    Semantic,
    Fallback(FallbackReason),
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Semantic => "semantic",
            RetrievalMode::Fallback(_) => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Passage<'a> {
    /// Position of the record in the store.
    pub position: usize,
    pub record: &'a Record,
    /// Cosine similarity; `None` on the fallback path.
    pub score: Option<f32>,
}

/// Passages in rank order (store order on the fallback path).
#[derive(Debug, Clone)]
pub struct Retrieval<'a> {
    pub passages: Vec<Passage<'a>>,
    pub mode: RetrievalMode,
}

impl Retrieval<'_> {
    pub fn contents(&self) -> Vec<&str> {
        self.passages
            .iter()
            .map(|p| p.record.content.as_str())
            .collect()
    }
}

/// Scores questions against a shared, read-only knowledge store.
pub struct Retriever {
    store: Arc<KnowledgeStore>,
    embedder: Option<Embedder>,
}

impl Retriever {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Option<Embedder>) -> Self {
        Retriever { store, embedder }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Returns up to `top_k` passages for `query`. Never fails.
    ///
    /// Embedding problems degrade to the first `top_k` records in store order.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Retrieval<'_> {
        let query_vector = match &self.embedder {
            None => Err(FallbackReason::NoEmbedder),
            Some(embedder) => embedder
                .embed(query)
                .await
                .map_err(|e| FallbackReason::EmbeddingFailed(e.to_string())),
        };

        let retrieval = match query_vector {
            Ok(vector) => self.rank(ArrayView1::from(vector.as_slice()), top_k),
            Err(reason) => self.fallback(reason, top_k),
        };

        if let RetrievalMode::Fallback(reason) = &retrieval.mode {
            warn!(
                reason = %reason,
                passages = retrieval.passages.len(),
                "retrieval degraded to default passages"
            );
        }
        retrieval
    }

    /// Ranks the store against an already computed query vector.
    pub fn rank(&self, query: ArrayView1<f32>, top_k: usize) -> Retrieval<'_> {
        let hits = match self.store.search_similar(query, top_k) {
            Ok(hits) => hits,
            Err(QueryError::DimensionMismatch { expected, found }) => {
                return self.fallback(FallbackReason::DimensionMismatch { expected, found }, top_k);
            }
            Err(QueryError::NonFinite) => {
                return self.fallback(FallbackReason::NonFiniteQuery, top_k);
            }
        };

        let passages: Vec<Passage<'_>> = hits
            .into_iter()
            .filter_map(|hit| {
                self.store.get(hit.position).map(|record| Passage {
                    position: hit.position,
                    record,
                    score: Some(hit.score),
                })
            })
            .collect();

        debug!(
            ranked = ?passages.iter().map(|p| (p.position, p.score)).collect::<Vec<_>>(),
            "ranked passages"
        );

        Retrieval {
            passages,
            mode: RetrievalMode::Semantic,
        }
    }

    fn fallback(&self, reason: FallbackReason, top_k: usize) -> Retrieval<'_> {
        let passages = self
            .store
            .head(top_k)
            .iter()
            .enumerate()
            .map(|(position, record)| Passage {
                position,
                record,
                score: None,
            })
            .collect();

        Retrieval {
            passages,
            mode: RetrievalMode::Fallback(reason),
        }
    }
}

/// Joins passage contents with newlines, keeping rank order.
pub fn assemble_context(retrieval: &Retrieval<'_>) -> String {
    retrieval.contents().join("\n")
}
