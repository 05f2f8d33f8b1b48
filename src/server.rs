use crate::context::AppContext;
use crate::llm::GenerationError;
use crate::speech::{DEFAULT_VOICE, SpeechError};
use crate::utils::normalize_query;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::{cors::CorsLayer, services::ServeFile, trace};
use tracing::{error, info};

pub const RETRIEVAL_MODE_HEADER: &str = "x-retrieval-mode";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Speech(#[from] SpeechError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Generation(GenerationError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Generation(_) => StatusCode::BAD_GATEWAY,
            ApiError::Speech(SpeechError::MissingInput | SpeechError::Upstream { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Speech(SpeechError::Http(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("{self:?}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub ssml: Option<String>,
    pub voice: Option<String>,
}

pub fn router(ctx: Arc<AppContext>, index_page: &std::path::Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(index_page))
        .route("/ask", post(ask))
        .route("/speak", post(speak))
        .layer(CorsLayer::permissive())
        .layer(
            trace::TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(ctx)
}

async fn ask(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let question = payload
        .query
        .as_deref()
        .and_then(normalize_query)
        .ok_or_else(|| ApiError::InvalidRequest("Missing query.".to_string()))?;

    let answer = ctx.answer(&question).await?;

    let mut response = Json(AskResponse {
        answer: answer.text,
    })
    .into_response();
    response.headers_mut().insert(
        RETRIEVAL_MODE_HEADER,
        HeaderValue::from_static(answer.mode.as_str()),
    );
    Ok(response)
}

async fn speak(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<SpeakRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let ssml = payload.ssml.unwrap_or_default();
    let voice = payload.voice.as_deref().unwrap_or(DEFAULT_VOICE);

    let audio = ctx.speech.synthesize(&ssml, voice).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

pub async fn serve(ctx: Arc<AppContext>, addr: &str, index_page: &std::path::Path) -> anyhow::Result<()> {
    let app = router(ctx, index_page);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
