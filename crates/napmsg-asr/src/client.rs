//! Sentence recognition client

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::signer::SignedRequest;
use crate::{AsrConfig, AsrError};

/// Request body for `SentenceRecognition`. Field order is the wire order.
#[derive(Serialize)]
struct SentenceRecognitionRequest<'a> {
    #[serde(rename = "SubServiceType")]
    sub_service_type: u8,
    #[serde(rename = "EngSerViceType")]
    eng_service_type: &'a str,
    #[serde(rename = "SourceType")]
    source_type: u8,
    #[serde(rename = "VoiceFormat")]
    voice_format: &'a str,
    #[serde(rename = "Data")]
    data: String,
    #[serde(rename = "ProjectId", skip_serializing_if = "Option::is_none")]
    project_id: Option<i64>,
}

/// Client for the Tencent Cloud one-sentence recognition API
#[derive(Clone)]
pub struct AsrClient {
    http: Client,
    config: AsrConfig,
}

impl std::fmt::Debug for AsrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsrClient")
            .field("config", &self.config)
            .finish()
    }
}

impl AsrClient {
    pub fn new(config: AsrConfig) -> Result<Self, AsrError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AsrError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AsrConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_enabled()
    }

    /// Recognize one short audio clip and return the text verbatim.
    ///
    /// `engine` falls back to the configured engine.
    pub async fn recognize(
        &self,
        audio: &[u8],
        voice_format: &str,
        engine: Option<&str>,
        project_id: Option<i64>,
    ) -> Result<String, AsrError> {
        if audio.is_empty() {
            return Err(AsrError::Configuration("Audio data is empty".to_string()));
        }
        if !self.config.credentials.is_complete() {
            return Err(AsrError::Configuration(
                "Missing Tencent Cloud credentials: set TENCENT_SECRET_ID and TENCENT_SECRET_KEY"
                    .to_string(),
            ));
        }

        let payload = SentenceRecognitionRequest {
            sub_service_type: 2,
            eng_service_type: engine.unwrap_or(&self.config.engine),
            source_type: 1,
            voice_format,
            data: BASE64.encode(audio),
            project_id,
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| AsrError::Protocol(format!("failed to encode request: {e}")))?;

        let timestamp = chrono::Utc::now().timestamp();
        let signed = SignedRequest::new(
            body,
            timestamp,
            &self.config.credentials,
            self.config.region.as_deref(),
        );
        let (headers, body) = signed.into_parts();

        info!(
            "Calling Tencent Cloud sentence recognition ({} bytes, format {})",
            audio.len(),
            voice_format
        );

        let mut request = self.http.post(&self.config.endpoint);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| AsrError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(AsrError::Transport(format!("HTTP {} - {}", status, snippet)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| AsrError::Protocol(format!("invalid response body: {e}")))?;

        let text = interpret_response(&value)?;
        debug!("Recognized {} chars", text.chars().count());
        Ok(text)
    }
}

/// Unwrap the `{Response: {Result?, Error?}}` envelope.
fn interpret_response(value: &Value) -> Result<String, AsrError> {
    let response = value
        .get("Response")
        .and_then(|r| r.as_object())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AsrError::Protocol("Tencent Cloud returned invalid structure".to_string()))?;

    if let Some(error) = response.get("Error") {
        let field = |name: &str| {
            error
                .get(name)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        return Err(AsrError::RemoteService {
            code: field("Code"),
            message: field("Message"),
        });
    }

    match response.get("Result").and_then(|r| r.as_str()) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(AsrError::EmptyResult),
    }
}
