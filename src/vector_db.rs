use ndarray::{Array1, ArrayView1};
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read knowledge base {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("knowledge base is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("record {index} has an empty vector")]
    EmptyVector { index: usize },

    #[error("record {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("record {index} has a non-finite vector component")]
    NonFinite { index: usize },
}

/// A query vector the store cannot be ranked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query has {found} dimensions, store has {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("query vector has a non-finite component")]
    NonFinite,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub content: String,
    pub vector: Array1<f32>,
}

/// On-disk shape of a record. Both fields are required.
#[derive(Deserialize)]
struct RawRecord {
    content: String,
    vector: Vec<f32>,
}

/// A scored position in the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub score: f32,
}

/// Immutable, ordered set of passages with their precomputed embeddings.
///
/// Every vector has the same dimensionality, fixed when the store is built.
/// There is no mutation API: rebuilding the index happens offline.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    records: Vec<Record>,
    dimensions: Option<usize>,
}

impl KnowledgeStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let store = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            records = store.len(),
            dimensions = store.dimensions().unwrap_or(0),
            "knowledge base loaded"
        );
        Ok(store)
    }

    pub fn from_json(raw: &str) -> Result<Self, LoadError> {
        let records: Vec<RawRecord> = serde_json::from_str(raw)?;
        Self::from_records(
            records
                .into_iter()
                .map(|r| (r.content, r.vector))
                .collect(),
        )
    }

    pub fn from_records(records: Vec<(String, Vec<f32>)>) -> Result<Self, LoadError> {
        let mut dimensions = None;
        let mut loaded = Vec::with_capacity(records.len());

        for (index, (content, vector)) in records.into_iter().enumerate() {
            if vector.is_empty() {
                return Err(LoadError::EmptyVector { index });
            }
            // serde reads 1e40 as inf
            if !vector.iter().all(|x| x.is_finite()) {
                return Err(LoadError::NonFinite { index });
            }

            let expected = *dimensions.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(LoadError::DimensionMismatch {
                    index,
                    expected,
                    found: vector.len(),
                });
            }

            loaded.push(Record {
                content,
                vector: Array1::from(vector),
            });
        }

        Ok(Self {
            records: loaded,
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `None` for an empty store.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn get(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }

    /// Ranks every record by cosine similarity to `query` and keeps the best `top_k`.
    ///
    /// Ties keep store order. An empty store yields no hits for any query.
    pub fn search_similar(
        &self,
        query: ArrayView1<f32>,
        top_k: usize,
    ) -> Result<Vec<Hit>, QueryError> {
        if let Some(expected) = self.dimensions {
            if query.len() != expected {
                return Err(QueryError::DimensionMismatch {
                    expected,
                    found: query.len(),
                });
            }
        }
        if !query.iter().all(|x| x.is_finite()) {
            return Err(QueryError::NonFinite);
        }

        let mut hits: Vec<Hit> = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| Hit {
                position,
                score: cosine_similarity(query, record.vector.view()),
            })
            .collect();

        // sort_by is stable
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// The first `top_k` records in store order.
    pub fn head(&self, top_k: usize) -> &[Record] {
        &self.records[..top_k.min(self.records.len())]
    }
}

/// Zero when either vector has zero norm.
///
/// Accumulates in `f64` so that large finite components cannot overflow
/// into `inf / inf`.
pub fn cosine_similarity(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let a = a.mapv(f64::from);
    let b = b.mapv(f64::from);
    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot_product / (norm_a * norm_b)) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn store(records: &[(&str, &[f32])]) -> KnowledgeStore {
        KnowledgeStore::from_records(
            records
                .iter()
                .map(|(c, v)| (c.to_string(), v.to_vec()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"[{{"content": "Paris is the capital of France", "vector": [1, 0]}},
               {{"content": "Tokyo is the capital of Japan", "vector": [0.0, 1.0], "source": "atlas"}}]"#
        )?;

        let store = KnowledgeStore::load(file.path())?;
        assert_eq!(store.len(), 2);
        assert_eq!(store.dimensions(), Some(2));
        assert_eq!(store.get(1).unwrap().content, "Tokyo is the capital of Japan");
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let result = KnowledgeStore::load("/nonexistent/embeddings.json");
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let no_vector = KnowledgeStore::from_json(r#"[{"content": "a"}]"#);
        assert!(matches!(no_vector, Err(LoadError::Malformed(_))));

        let no_content = KnowledgeStore::from_json(r#"[{"vector": [1.0]}]"#);
        assert!(matches!(no_content, Err(LoadError::Malformed(_))));

        let not_a_list = KnowledgeStore::from_json(r#"{"content": "a", "vector": [1]}"#);
        assert!(matches!(not_a_list, Err(LoadError::Malformed(_))));
    }

    #[test]
    fn test_inconsistent_dimensions_rejected() {
        let result = KnowledgeStore::from_json(
            r#"[{"content": "a", "vector": [1, 0]}, {"content": "b", "vector": [1, 0, 0]}]"#,
        );
        match result {
            Err(LoadError::DimensionMismatch {
                index,
                expected,
                found,
            }) => {
                assert_eq!((index, expected, found), (1, 2, 3));
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_vector_rejected() {
        let result = KnowledgeStore::from_json(r#"[{"content": "a", "vector": []}]"#);
        assert!(matches!(result, Err(LoadError::EmptyVector { index: 0 })));
    }

    #[test]
    fn test_empty_store() {
        let store = KnowledgeStore::from_json("[]").unwrap();
        assert!(store.is_empty());
        assert_eq!(store.dimensions(), None);
        assert!(store.search_similar(array![1.0, 0.0].view(), 3).unwrap().is_empty());
        assert!(store.head(3).is_empty());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = array![1.0_f32, 0.0];
        let b = array![0.0_f32, 1.0];
        let zero = array![0.0_f32, 0.0];

        assert!((cosine_similarity(a.view(), a.view()) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(a.view(), b.view()).abs() < 1e-6);
        assert_eq!(cosine_similarity(a.view(), zero.view()), 0.0);
        assert!((cosine_similarity(a.view(), (-&a).view()) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let store = store(&[
            ("far", &[0.0, 1.0]),
            ("close", &[1.0, 0.1]),
            ("exact", &[1.0, 0.0]),
        ]);

        let hits = store.search_similar(array![1.0, 0.0].view(), 3).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_search_ties_keep_store_order() {
        let store = store(&[("a", &[1.0, 0.0]), ("b", &[2.0, 0.0]), ("c", &[3.0, 0.0])]);

        let hits = store.search_similar(array![1.0, 0.0].view(), 2).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let store = store(&[("a", &[1.0, 0.0])]);
        let result = store.search_similar(array![1.0, 0.0, 0.0].view(), 1);
        assert_eq!(
            result,
            Err(QueryError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_non_finite_component_rejected() {
        let overflow = KnowledgeStore::from_json(
            r#"[{"content": "a", "vector": [1, 0]}, {"content": "b", "vector": [1e40, 0]}]"#,
        );
        assert!(matches!(overflow, Err(LoadError::NonFinite { index: 1 })));

        let nan = KnowledgeStore::from_records(vec![("a".to_string(), vec![f32::NAN, 1.0])]);
        assert!(matches!(nan, Err(LoadError::NonFinite { index: 0 })));
    }

    #[test]
    fn test_non_finite_query_rejected() {
        let store = store(&[("a", &[1.0, 0.0])]);
        for query in [array![f32::INFINITY, 0.0], array![f32::NAN, 1.0]] {
            assert_eq!(
                store.search_similar(query.view(), 1),
                Err(QueryError::NonFinite)
            );
        }
    }

    #[test]
    fn test_large_exact_match_ranks_first() {
        let store = store(&[("other", &[1.0, 0.0]), ("big", &[3e19, 3e19])]);

        let hits = store.search_similar(array![3e19, 3e19].view(), 2).unwrap();
        assert_eq!(hits[0].position, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.iter().all(|h| h.score.is_finite()));

        let max = array![f32::MAX, 0.0];
        assert!((cosine_similarity(max.view(), max.view()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_head_is_bounded() {
        let store = store(&[("a", &[1.0]), ("b", &[1.0])]);
        assert_eq!(store.head(3).len(), 2);
        assert_eq!(store.head(1)[0].content, "a");
        assert!(store.head(0).is_empty());
    }
}
