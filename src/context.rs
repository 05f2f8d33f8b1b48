use crate::config::Config;
use crate::embedder;
use crate::llm::{self, GenerationError, LLM};
use crate::retriever::{RetrievalMode, Retriever, assemble_context};
use crate::speech::SpeechProxy;
use crate::vector_db::KnowledgeStore;
use anyhow::{Context as _, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a request needs, built once at start-up and shared read-only.
pub struct AppContext {
    pub retriever: Retriever,
    pub llm: LLM,
    pub speech: SpeechProxy,
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub mode: RetrievalMode,
}

impl AppContext {
    /// Loads the knowledge base and wires up the external clients.
    ///
    /// A broken knowledge base aborts start-up. A broken embedder only
    /// degrades retrieval.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = KnowledgeStore::load(&config.knowledge_base).with_context(|| {
            format!(
                "cannot start without knowledge base {}",
                config.knowledge_base.display()
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        let settings = config.embedder_settings();
        let embedder = match embedder::build(&settings, client.clone()) {
            Ok(Some(embedder)) => {
                info!(embedder = embedder.name(), "query embedding enabled");
                Some(embedder)
            }
            Ok(None) => {
                warn!("query embedding disabled, retrieval will use default passages");
                None
            }
            Err(e) => {
                warn!(error = %e, kind = ?settings.kind, "embedder unavailable, retrieval will use default passages");
                None
            }
        };

        if store.is_empty() {
            warn!("knowledge base is empty, answers will have no context");
        }

        let llm = LLM::new(client.clone(), config.llm_config());
        if !llm.is_configured() {
            warn!("GEMINI_API_KEY is not set, /ask will fail");
        }

        let speech = SpeechProxy::new(
            client,
            config.azure_api_key.clone(),
            Some(config.azure_region.clone()),
            config.speech_endpoint.clone(),
        );
        if !speech.is_configured() {
            warn!("AZURE_API_KEY or AZURE_REGION is not set, /speak will fail");
        }

        let retriever = Retriever::new(Arc::new(store), embedder);
        info!(
            records = retriever.store().len(),
            semantic = retriever.has_embedder(),
            top_k = config.top_k,
            "retriever ready"
        );

        Ok(Self {
            retriever,
            llm,
            speech,
            top_k: usize::from(config.top_k),
        })
    }

    /// Retrieves context for an already normalized question and asks the model.
    pub async fn answer(&self, question: &str) -> Result<Answer, GenerationError> {
        let retrieval = self.retriever.retrieve(question, self.top_k).await;
        let context = assemble_context(&retrieval);
        let prompt = llm::build_prompt(&context, question);

        let text = self.llm.generate(&prompt).await?;
        Ok(Answer {
            text,
            mode: retrieval.mode,
        })
    }
}
