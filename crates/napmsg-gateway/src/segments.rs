//! Message segment builders
//!
//! Segments are opaque `{type, data}` objects as far as the gateway is
//! concerned. Media sources that are already URIs pass through; local paths
//! are resolved to absolute `file://` URIs so the gateway can read them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// URI schemes the gateway reads directly
const PASSTHROUGH_SCHEMES: &[&str] = &["http://", "https://", "file://", "base64://"];

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("{kind} source is empty")]
    EmptySource { kind: &'static str },

    #[error("{kind} file not found: {path} ({reason})")]
    NotFound {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("{kind} source is not a regular file: {path}")]
    NotAFile { kind: &'static str, path: PathBuf },
}

/// One OneBot message segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_field("text", "text", text.into())
    }

    /// Reply to an earlier message id
    pub fn reply(message_id: impl Into<String>) -> Self {
        Self::with_field("reply", "id", message_id.into())
    }

    pub fn image(source: &str) -> Result<Self, SegmentError> {
        Ok(Self::with_field("image", "file", resolve_media("image", source)?))
    }

    pub fn video(source: &str) -> Result<Self, SegmentError> {
        Ok(Self::with_field("video", "file", resolve_media("video", source)?))
    }

    pub fn record(source: &str) -> Result<Self, SegmentError> {
        Ok(Self::with_field("record", "file", resolve_media("record", source)?))
    }

    /// Upload a file; `name` is the display name shown in the chat
    pub fn file(source: &str) -> Result<Self, SegmentError> {
        let file = resolve_media("file", source)?;
        let mut segment = Self::with_field("file", "file", file);
        if let Some(name) = display_name(source) {
            segment.data.insert("name".to_string(), Value::String(name));
        }
        Ok(segment)
    }

    /// The `data.<key>` string, if present
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn to_value(&self) -> Value {
        json!({ "type": self.kind, "data": self.data })
    }

    fn with_field(kind: &str, key: &str, value: String) -> Self {
        let mut data = Map::new();
        data.insert(key.to_string(), Value::String(value));
        Self::new(kind, data)
    }
}

/// Wrap `content` in a forward node authored by `user_id` / `nickname`
pub fn forward_node(user_id: &str, nickname: &str, content: &[Segment]) -> Value {
    json!({
        "type": "node",
        "data": {
            "user_id": user_id,
            "nickname": nickname,
            "content": content.iter().map(Segment::to_value).collect::<Vec<_>>(),
        }
    })
}

fn resolve_media(kind: &'static str, source: &str) -> Result<String, SegmentError> {
    let source = source.trim();
    if source.is_empty() {
        return Err(SegmentError::EmptySource { kind });
    }
    if PASSTHROUGH_SCHEMES.iter().any(|s| source.starts_with(s)) {
        return Ok(source.to_string());
    }

    let path = Path::new(source);
    let absolute = std::fs::canonicalize(path).map_err(|e| SegmentError::NotFound {
        kind,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !absolute.is_file() {
        return Err(SegmentError::NotAFile {
            kind,
            path: absolute,
        });
    }
    Ok(format!("file://{}", absolute.display()))
}

fn display_name(source: &str) -> Option<String> {
    if source.trim_start().starts_with("base64://") {
        return None;
    }
    let trimmed = source.trim().trim_end_matches('/');
    let tail = trimmed.rsplit(['/', '\\']).next()?;
    let tail = tail.split(['?', '#']).next()?;
    (!tail.is_empty() && !tail.contains("://")).then(|| tail.to_string())
}
