//! Watched-event pipeline: filters incoming gateway events and maps them to
//! `message.receive` notification params, transcribing voice on the way.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use napmsg_asr::AsrClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::GatewayError;
use crate::client::Relay;
use crate::config::RelayTarget;
use crate::protocol::{ChatId, Command, reply_failure};
use crate::segments::Segment;

/// Messages starting with one of these are bot commands, not chat
pub const DEFAULT_IGNORE_PREFIXES: &[&str] = &["/"];

/// Segment kinds surfaced as attachments
const ATTACHMENT_KINDS: &[&str] = &["image", "record", "video", "file"];

/// Format voice messages are converted to before recognition
const VOICE_FORMAT: &str = "mp3";

/// Which events a subscription forwards
#[derive(Debug, Clone, PartialEq)]
pub struct WatchFilter {
    pub from_group: Option<ChatId>,
    pub from_user: Option<ChatId>,
    pub ignore_prefixes: Vec<String>,
}

impl Default for WatchFilter {
    fn default() -> Self {
        Self {
            from_group: None,
            from_user: None,
            ignore_prefixes: DEFAULT_IGNORE_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl WatchFilter {
    pub fn matches(&self, event: &MessageEvent) -> bool {
        if let Some(group) = &self.from_group
            && (!event.is_group() || event.group_id.as_ref() != Some(group))
        {
            return false;
        }
        if let Some(user) = &self.from_user
            && event.user_id.as_ref() != Some(user)
        {
            return false;
        }

        let text = event.text();
        let text = text.trim_start();
        !self
            .ignore_prefixes
            .iter()
            .any(|p| !p.is_empty() && text.starts_with(p.as_str()))
    }
}

/// Message body: a segment array, or a CQ-code string when the gateway is
/// configured for string messages
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Segments(Vec<Segment>),
    Raw(String),
}

impl Default for MessageBody {
    fn default() -> Self {
        Self::Segments(Vec::new())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub user_id: Option<ChatId>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub card: Option<String>,
}

/// A OneBot `message` event
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub post_type: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub group_id: Option<ChatId>,
    #[serde(default)]
    pub user_id: Option<ChatId>,
    #[serde(default)]
    pub message_id: Option<Value>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub message: MessageBody,
    #[serde(default)]
    pub raw_message: Option<String>,
    #[serde(default)]
    pub sender: Sender,
}

impl MessageEvent {
    pub fn is_group(&self) -> bool {
        self.message_type.as_deref() == Some("group")
    }

    /// Concatenated text segments
    pub fn text(&self) -> String {
        match &self.message {
            MessageBody::Raw(raw) => raw.clone(),
            MessageBody::Segments(segments) if segments.is_empty() => {
                self.raw_message.clone().unwrap_or_default()
            }
            MessageBody::Segments(segments) => segments
                .iter()
                .filter(|s| s.kind == "text")
                .filter_map(|s| s.data_str("text"))
                .collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        match &self.message {
            MessageBody::Segments(segments) => segments,
            MessageBody::Raw(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// Params of a `message.receive` notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveParams {
    pub chat_id: String,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    pub sender: SenderInfo,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ReceiveParams {
    pub fn from_event(event: &MessageEvent) -> Self {
        let is_group = event.is_group();
        let chat = if is_group { &event.group_id } else { &event.user_id };
        let sender_id = event
            .sender
            .user_id
            .as_ref()
            .or(event.user_id.as_ref())
            .map(ChatId::to_string)
            .unwrap_or_default();
        let name = [&event.sender.card, &event.sender.nickname]
            .into_iter()
            .flatten()
            .find(|n| !n.is_empty())
            .cloned()
            .unwrap_or_else(|| sender_id.clone());

        let attachments = event
            .segments()
            .iter()
            .filter(|s| ATTACHMENT_KINDS.contains(&s.kind.as_str()))
            .map(|s| Attachment {
                kind: s.kind.clone(),
                file: s.data_str("file").map(str::to_string),
                url: s.data_str("url").map(str::to_string),
                name: s.data_str("name").map(str::to_string),
                transcript: None,
            })
            .collect();

        Self {
            chat_id: chat.as_ref().map(ChatId::to_string).unwrap_or_default(),
            is_group,
            message_id: event.message_id.clone(),
            sender: SenderInfo { id: sender_id, name },
            text: event.text(),
            timestamp: event.time,
            attachments,
            transcript: None,
        }
    }
}

/// Per-subscription event processing
pub struct EventPipeline {
    filter: WatchFilter,
    relay: Arc<dyn Relay>,
    target: RelayTarget,
    asr: Option<Arc<AsrClient>>,
}

impl EventPipeline {
    /// `target` is where voice files are fetched from; `asr` enables
    /// transcription when present.
    pub fn new(
        filter: WatchFilter,
        relay: Arc<dyn Relay>,
        target: RelayTarget,
        asr: Option<Arc<AsrClient>>,
    ) -> Self {
        Self {
            filter,
            relay,
            target,
            asr,
        }
    }

    pub fn filter(&self) -> &WatchFilter {
        &self.filter
    }

    pub fn asr_enabled(&self) -> bool {
        self.asr.is_some()
    }

    /// Map one raw event to notification params, or `None` if it does not
    /// qualify.
    pub async fn process(&self, raw: Value) -> Result<Option<ReceiveParams>, GatewayError> {
        if raw.get("post_type").and_then(|p| p.as_str()) != Some("message") {
            return Ok(None);
        }

        let event: MessageEvent =
            serde_json::from_value(raw).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !self.filter.matches(&event) {
            debug!("Event filtered out (message_id {:?})", event.message_id);
            return Ok(None);
        }

        let mut params = ReceiveParams::from_event(&event);
        if let Some(asr) = &self.asr {
            self.transcribe(&mut params, asr).await;
        }
        Ok(Some(params))
    }

    async fn transcribe(&self, params: &mut ReceiveParams, asr: &AsrClient) {
        for attachment in params.attachments.iter_mut().filter(|a| a.kind == "record") {
            let Some(file) = attachment.file.clone() else {
                continue;
            };
            match self.recognize_record(&file, asr).await {
                Ok(text) => attachment.transcript = Some(text),
                Err(e) => warn!("Voice transcription failed for {}: {}", file, e),
            }
        }

        params.transcript = params
            .attachments
            .iter()
            .find_map(|a| a.transcript.clone());
        if params.text.trim().is_empty()
            && let Some(transcript) = &params.transcript
        {
            params.text = transcript.clone();
        }
    }

    async fn recognize_record(&self, file: &str, asr: &AsrClient) -> Result<String, GatewayError> {
        let reply = self
            .relay
            .send_command(&self.target, Command::get_record(file, VOICE_FORMAT))
            .await?;
        let audio = record_audio(&reply).await?;
        Ok(asr.recognize(&audio, VOICE_FORMAT, None, None).await?)
    }
}

/// Audio bytes from a `get_record` reply: inline base64, else a local file
async fn record_audio(reply: &Value) -> Result<Vec<u8>, GatewayError> {
    if let Some(message) = reply_failure(reply) {
        return Err(GatewayError::Rejected {
            action: "get_record".to_string(),
            message,
        });
    }
    let data = reply.get("data").unwrap_or(&Value::Null);

    if let Some(encoded) = data.get("base64").and_then(|b| b.as_str()).filter(|b| !b.is_empty()) {
        return BASE64
            .decode(encoded)
            .map_err(|e| GatewayError::Malformed(format!("get_record base64: {e}")));
    }

    if let Some(path) = data.get("file").and_then(|f| f.as_str()).filter(|f| !f.is_empty()) {
        let path = path.strip_prefix("file://").unwrap_or(path);
        return tokio::fs::read(path).await.map_err(|e| GatewayError::Io {
            path: path.to_string(),
            reason: e.to_string(),
        });
    }

    Err(GatewayError::Malformed(
        "get_record reply carries no audio".to_string(),
    ))
}
