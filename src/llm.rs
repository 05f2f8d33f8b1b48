use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Answer the model gives when the context does not cover the question.
pub const REFUSAL: &str = "I don't have enough information to answer that question.";

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("answer generation is not configured: GEMINI_API_KEY is unset")]
    NotConfigured,

    #[error("answer generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("answer generation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("answer generation service returned no text")]
    EmptyResponse,
}

/// Grounded prompt: answer only from `context`, refuse otherwise.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Based only on the following information, answer the user's question.\n\
         If the answer cannot be derived from the provided information, respond with \"{REFUSAL}\"\n\
         \n\
         Information:\n\
         {context}\n\
         \n\
         User question: {question}\n"
    )
}

pub struct LLMConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Client for the Gemini `generateContent` API.
pub struct LLM {
    client: reqwest::Client,
    config: LLMConfig,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl LLM {
    pub fn new(client: reqwest::Client, config: LLMConfig) -> Self {
        LLM { client, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::NotConfigured)?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );
        debug!(model = %self.config.model, prompt_chars = prompt.len(), "generating answer");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&json!({ "contents": [{ "parts": [{ "text": prompt }] }] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = response.json().await?;
        Self::extract_text(body)
    }

    fn extract_text(response: GenerateResponse) -> Result<String, GenerationError> {
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            Err(GenerationError::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embedder::tests::spawn_stub;
    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::StatusCode,
        routing::post,
    };
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    /// Gemini stand-in that echoes the received prompt back as the answer.
    pub(crate) async fn echo_llm() -> LLM {
        let router = Router::new().route(
            "/models/:call",
            post(
                |Path(call): Path<String>,
                 Query(params): Query<HashMap<String, String>>,
                 Json(body): Json<Value>| async move {
                    if call != "test-model:generateContent" || params.get("key").map(String::as_str) != Some("k") {
                        return (StatusCode::NOT_FOUND, Json(Value::Null));
                    }
                    let prompt = body["contents"][0]["parts"][0]["text"].clone();
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "candidates": [{ "content": { "parts": [{ "text": prompt }] } }]
                        })),
                    )
                },
            ),
        );
        let base = spawn_stub(router).await;
        LLM::new(
            reqwest::Client::new(),
            LLMConfig {
                api_key: Some("k".to_string()),
                model: "test-model".to_string(),
                endpoint: base,
            },
        )
    }

    /// Gemini stand-in that answers only after `delay`, called through a
    /// client that gives up after `timeout`.
    pub(crate) async fn slow_llm(delay: Duration, timeout: Duration) -> LLM {
        let router = Router::new().route(
            "/models/:call",
            post(move || async move {
                tokio::time::sleep(delay).await;
                Json(serde_json::json!({
                    "candidates": [{ "content": { "parts": [{ "text": "late" }] } }]
                }))
            }),
        );
        let base = spawn_stub(router).await;
        LLM::new(
            reqwest::Client::builder().timeout(timeout).build().unwrap(),
            LLMConfig {
                api_key: Some("k".to_string()),
                endpoint: base,
                ..LLMConfig::default()
            },
        )
    }

    #[test]
    fn test_prompt_template() {
        let prompt = build_prompt("Paris is the capital of France", "What is the capital of France?");
        assert!(prompt.starts_with(
            "Based only on the following information, answer the user's question.\n"
        ));
        assert!(prompt.contains(
            "If the answer cannot be derived from the provided information, respond with \"I don't have enough information to answer that question.\""
        ));
        assert!(prompt.contains("Information:\nParis is the capital of France\n"));
        assert!(prompt.ends_with("User question: What is the capital of France?\n"));
    }

    #[test]
    fn test_prompt_with_empty_context() {
        let prompt = build_prompt("", "Anything?");
        assert!(prompt.contains("Information:\n\n"));
        assert!(prompt.contains(REFUSAL));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Par" }, { "text": "is." }] } }]
        }))
        .unwrap();
        assert_eq!(LLM::extract_text(response).unwrap(), "Paris.");

        let blocked: GenerateResponse =
            serde_json::from_value(serde_json::json!({ "promptFeedback": {} })).unwrap();
        assert!(matches!(
            LLM::extract_text(blocked),
            Err(GenerationError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_generate_round_trip() {
        let llm = echo_llm().await;
        assert_eq!(llm.generate("hello").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_generate_without_key() {
        let llm = LLM::new(reqwest::Client::new(), LLMConfig::default());
        assert!(!llm.is_configured());
        assert!(matches!(
            llm.generate("hello").await,
            Err(GenerationError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_generate_upstream_error() {
        let router = Router::new().route(
            "/models/:call",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota exceeded") }),
        );
        let base = spawn_stub(router).await;
        let llm = LLM::new(
            reqwest::Client::new(),
            LLMConfig {
                api_key: Some("k".to_string()),
                endpoint: base,
                ..LLMConfig::default()
            },
        );

        match llm.generate("hello").await {
            Err(GenerationError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_times_out() {
        let llm = slow_llm(Duration::from_secs(5), Duration::from_millis(200)).await;

        let started = Instant::now();
        match llm.generate("hello").await {
            Err(GenerationError::Http(e)) => assert!(e.is_timeout(), "{e}"),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
