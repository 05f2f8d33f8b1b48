use crate::embedder::{EmbedderKind, EmbedderSettings};
use crate::llm::{self, LLMConfig};
use crate::speech;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2";

/// Answers questions from a static knowledge base with a grounded LLM.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// JSON array of {content, vector} records
    #[arg(long, env = "KNOWLEDGE_BASE", default_value = "embeddings.json")]
    pub knowledge_base: PathBuf,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// How query embeddings are produced
    #[arg(long, env = "EMBEDDER", value_enum, default_value_t = EmbedderKind::Local)]
    pub embedder: EmbedderKind,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    #[arg(long, env = "EMBEDDING_ENDPOINT", default_value = DEFAULT_EMBEDDING_ENDPOINT)]
    pub embedding_endpoint: String,

    #[arg(long, env = "HUGGINGFACE_TOKEN", hide_env_values = true)]
    pub huggingface_token: Option<String>,

    /// Where local embedding models are downloaded
    #[arg(long, env = "MODEL_CACHE_DIR")]
    pub model_cache_dir: Option<PathBuf>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = llm::DEFAULT_MODEL)]
    pub gemini_model: String,

    #[arg(long, env = "GEMINI_ENDPOINT", default_value = llm::DEFAULT_ENDPOINT)]
    pub gemini_endpoint: String,

    #[arg(long, env = "AZURE_API_KEY", hide_env_values = true)]
    pub azure_api_key: Option<String>,

    #[arg(long, env = "AZURE_REGION", default_value = speech::DEFAULT_REGION)]
    pub azure_region: String,

    /// Full speech synthesis URL; derived from the region when unset
    #[arg(long, env = "SPEECH_ENDPOINT")]
    pub speech_endpoint: Option<String>,

    /// Passages handed to the model per question
    #[arg(long, env = "TOP_K", default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    pub top_k: u16,

    /// Timeout for every outbound HTTP call
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout_secs: u64,

    /// Page served at `/`
    #[arg(long, env = "INDEX_PAGE", default_value = "templates/index.html")]
    pub index_page: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Answer a question on the terminal; without one, read questions from stdin
    Ask { question: Option<String> },
}

impl Config {
    /// Loads `.env` (if present) before parsing arguments and environment.
    ///
    /// A `.env` that exists but cannot be read or parsed is handed back so it
    /// can be logged once tracing is up.
    pub fn load() -> (Self, Option<dotenvy::Error>) {
        let dotenv_error = unless_missing(dotenvy::dotenv());
        (Self::parse(), dotenv_error)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn embedder_settings(&self) -> EmbedderSettings {
        EmbedderSettings {
            kind: self.embedder,
            model: self.embedding_model.clone(),
            endpoint: self.embedding_endpoint.clone(),
            token: self.huggingface_token.clone(),
            cache_dir: self.model_cache_dir.clone().unwrap_or_else(default_cache_dir),
        }
    }

    pub fn llm_config(&self) -> LLMConfig {
        LLMConfig {
            api_key: self.gemini_api_key.clone().filter(|k| !k.is_empty()),
            model: self.gemini_model.clone(),
            endpoint: self.gemini_endpoint.clone(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(env!("CARGO_PKG_NAME")).join("models"))
        .unwrap_or_else(|| PathBuf::from("model_cache"))
}

fn unless_missing<T>(result: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match result {
        Ok(_) => None,
        Err(e) if e.not_found() => None,
        Err(e) => Some(e),
    }
}
