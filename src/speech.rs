//! Text-to-speech pass-through to Azure Cognitive Services.
//!
//! The subscription key stays on the server; callers only ever see audio bytes
//! or a JSON error.

use tracing::debug;

pub const DEFAULT_VOICE: &str = "en-US-AndrewMultilingualNeural";
pub const DEFAULT_REGION: &str = "eastus";
const OUTPUT_FORMAT: &str = "audio-24khz-160kbitrate-mono-mp3";

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Missing SSML, API key, or region.")]
    MissingInput,

    #[error("Azure TTS error: {status} {body}")]
    Upstream { status: u16, body: String },

    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

pub struct SpeechProxy {
    client: reqwest::Client,
    api_key: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
}

impl SpeechProxy {
    /// `endpoint` overrides the URL derived from `region`.
    pub fn new(
        client: reqwest::Client,
        api_key: Option<String>,
        region: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            client,
            api_key: non_empty(api_key),
            region: non_empty(region),
            endpoint: non_empty(endpoint),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.region.is_some()
    }

    fn endpoint(&self, region: &str) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!("https://{}.tts.speech.microsoft.com/cognitiveservices/v1", region)
        })
    }

    /// Returns MP3 audio for `ssml`.
    ///
    /// The voice is chosen by the SSML document itself; `voice` is only recorded.
    pub async fn synthesize(&self, ssml: &str, voice: &str) -> Result<Vec<u8>, SpeechError> {
        let (Some(api_key), Some(region)) = (&self.api_key, &self.region) else {
            return Err(SpeechError::MissingInput);
        };
        if ssml.trim().is_empty() {
            return Err(SpeechError::MissingInput);
        }

        debug!(voice, ssml_chars = ssml.len(), "synthesizing speech");
        let response = self
            .client
            .post(self.endpoint(region))
            .header("Ocp-Apim-Subscription-Key", api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(ssml.as_bytes().to_vec())
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
