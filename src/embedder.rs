//! Query embedding.
//!
//! Two interchangeable strategies, picked once at start-up:
//! - `Local`: an in-process sentence-transformer (fastembed / ONNX Runtime)
//! - `Remote`: a hosted feature-extraction endpoint called over HTTP
//!
//! Having no embedder at all is also a valid configuration; retrieval then
//! always takes the fallback path.

use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
#[cfg(feature = "local-embeddings")]
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("embedding model initialization failed: {0}")]
    Init(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),
}

/// Which embedder to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmbedderKind {
    Local,
    Remote,
    None,
}

#[derive(Clone)]
pub enum Embedder {
    #[cfg(feature = "local-embeddings")]
    Local(Arc<LocalEmbedder>),
    Remote(RemoteEmbedder),
}

impl Embedder {
    pub fn name(&self) -> &str {
        match self {
            #[cfg(feature = "local-embeddings")]
            Embedder::Local(local) => local.name(),
            Embedder::Remote(remote) => remote.endpoint(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            #[cfg(feature = "local-embeddings")]
            Embedder::Local(local) => {
                let local = Arc::clone(local);
                let text = text.to_string();
                tokio::task::spawn_blocking(move || local.embed(&text))
                    .await
                    .map_err(|e| EmbeddingError::Inference(e.to_string()))?
            }
            Embedder::Remote(remote) => remote.embed(text).await,
        }
    }
}

/// Settings needed to construct either embedder.
#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    pub kind: EmbedderKind,
    pub model: String,
    pub endpoint: String,
    pub token: Option<String>,
    pub cache_dir: PathBuf,
}

/// Builds the configured embedder.
///
/// `Ok(None)` means embedding is switched off. Errors leave the choice of
/// degrading or aborting to the caller.
pub fn build(
    settings: &EmbedderSettings,
    client: reqwest::Client,
) -> Result<Option<Embedder>, EmbeddingError> {
    match settings.kind {
        EmbedderKind::None => Ok(None),
        EmbedderKind::Remote => Ok(Some(Embedder::Remote(RemoteEmbedder::new(
            client,
            settings.endpoint.clone(),
            settings.token.clone(),
        )))),
        EmbedderKind::Local => build_local(settings),
    }
}

#[cfg(feature = "local-embeddings")]
fn build_local(settings: &EmbedderSettings) -> Result<Option<Embedder>, EmbeddingError> {
    let local = LocalEmbedder::new(&settings.model, settings.cache_dir.clone())?;
    Ok(Some(Embedder::Local(Arc::new(local))))
}

#[cfg(not(feature = "local-embeddings"))]
fn build_local(_settings: &EmbedderSettings) -> Result<Option<Embedder>, EmbeddingError> {
    Err(EmbeddingError::Init(
        "built without the `local-embeddings` feature".to_string(),
    ))
}

/// Calls a Hugging Face style feature-extraction endpoint.
#[derive(Clone)]
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

/// A single input may come back flat or wrapped in one extra array.
#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureExtraction {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl RemoteEmbedder {
    pub fn new(client: reqwest::Client, endpoint: String, token: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "inputs": text }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        parse_feature_extraction(&body)
    }
}

fn parse_feature_extraction(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: FeatureExtraction = serde_json::from_str(body)
        .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;

    let vector = match parsed {
        FeatureExtraction::Flat(vector) => vector,
        FeatureExtraction::Nested(mut rows) if rows.len() == 1 => rows.remove(0),
        FeatureExtraction::Nested(rows) => {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected one embedding, got {} rows",
                rows.len()
            )));
        }
    };

    if vector.is_empty() {
        return Err(EmbeddingError::MalformedResponse(
            "empty embedding".to_string(),
        ));
    }
    Ok(vector)
}

/// In-process sentence embedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    model_name: String,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    /// Loads (downloading on first use) the named model into `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        use fastembed::{InitOptions, TextEmbedding};

        let model_enum = Self::parse_model_name(model_name)?;
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            EmbeddingError::Init(format!("failed to create model cache directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let model =
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::Init(e.to_string()))?;

        Ok(Self {
            model: std::sync::Mutex::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| EmbeddingError::Inference(format!("model lock poisoned: {}", e)))?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Inference("no embedding returned".to_string()))
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "all-minilm-l6-v2-q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            _ => Err(EmbeddingError::Init(format!(
                "unknown model: {}. Supported models: all-MiniLM-L6-v2, all-MiniLM-L6-v2-q, bge-small-en-v1.5, bge-base-en-v1.5",
                name
            ))),
        }
    }
}
