//! Method table and typed request params

use std::collections::HashMap;

use napmsg_gateway::{ChatId, Command, DEFAULT_IGNORE_PREFIXES, WatchFilter};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::RpcError;

/// Every method the server answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    WatchSubscribe,
    WatchUnsubscribe,
    MessageSend,
    Send,
    ChatsList,
}

impl Method {
    pub const ALL: &'static [Method] = &[
        Method::Initialize,
        Method::WatchSubscribe,
        Method::WatchUnsubscribe,
        Method::MessageSend,
        Method::Send,
        Method::ChatsList,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::WatchSubscribe => "watch.subscribe",
            Self::WatchUnsubscribe => "watch.unsubscribe",
            Self::MessageSend => "message.send",
            Self::Send => "send",
            Self::ChatsList => "chats.list",
        }
    }
}

/// Name → method lookup, built once at startup
#[derive(Debug, Clone)]
pub struct MethodTable {
    by_name: HashMap<&'static str, Method>,
}

impl MethodTable {
    pub fn new() -> Result<Self, RpcError> {
        Self::build(Method::ALL)
    }

    /// Fails if two methods share a name
    pub fn build(methods: &[Method]) -> Result<Self, RpcError> {
        let mut by_name = HashMap::with_capacity(methods.len());
        for method in methods {
            if by_name.insert(method.name(), *method).is_some() {
                return Err(RpcError::DuplicateMethod(method.name()));
            }
        }
        Ok(Self { by_name })
    }

    pub fn lookup(&self, name: &str) -> Option<Method> {
        self.by_name.get(name).copied()
    }
}

/// `watch.subscribe` params
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeParams {
    #[serde(default)]
    pub napcat_url: Option<String>,
    #[serde(default)]
    pub from_group: Option<Value>,
    #[serde(default)]
    pub from_user: Option<Value>,
    #[serde(default)]
    pub ignore_prefixes: Option<Vec<String>>,
}

impl SubscribeParams {
    pub fn filter(&self) -> Result<WatchFilter, RpcError> {
        let ignore_prefixes = match &self.ignore_prefixes {
            Some(prefixes) if !prefixes.is_empty() => prefixes.clone(),
            _ => DEFAULT_IGNORE_PREFIXES.iter().map(|p| p.to_string()).collect(),
        };
        Ok(WatchFilter {
            from_group: optional_id("from_group", self.from_group.as_ref())?,
            from_user: optional_id("from_user", self.from_user.as_ref())?,
            ignore_prefixes,
        })
    }
}

/// `message.send` params: a plain-text shorthand for `send`
#[derive(Debug, Default, Deserialize)]
pub struct MessageSendParams {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(default, rename = "chatId")]
    pub chat_id_camel: Option<Value>,
    #[serde(default)]
    pub chat_id: Option<Value>,
    #[serde(default, rename = "isGroup")]
    pub is_group: Option<Value>,
    #[serde(default)]
    pub napcat_url: Option<String>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl MessageSendParams {
    /// Normalize to the equivalent `send` params
    pub fn into_send(self) -> Result<SendParams, RpcError> {
        let to = [self.to, self.chat_id_camel, self.chat_id]
            .into_iter()
            .flatten()
            .find(is_truthy);
        let (Some(to), Some(text)) = (to, self.text) else {
            return Err(RpcError::invalid("to/chatId and text are required"));
        };

        let is_group = self.is_group.as_ref().is_some_and(is_truthy);
        let (channel, group_id, user_id) = if is_group {
            ("group", Some(to), None)
        } else {
            ("private", None, Some(to))
        };

        Ok(SendParams {
            channel: Some(channel.to_string()),
            group_id,
            user_id,
            message: Some(json!([{ "type": "text", "data": { "text": text } }])),
            napcat_url: self.napcat_url,
            timeout: self.timeout,
            ..SendParams::default()
        })
    }
}

/// `send` params
#[derive(Debug, Default, Deserialize)]
pub struct SendParams {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub group_id: Option<Value>,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(default)]
    pub nodes: Option<Value>,
    #[serde(default)]
    pub napcat_url: Option<String>,
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl SendParams {
    /// Channel as given, else inferred from which id is present
    pub fn channel(&self) -> Option<String> {
        let explicit = [&self.channel, &self.kind]
            .into_iter()
            .flatten()
            .find(|c| !c.is_empty());
        if let Some(channel) = explicit {
            return Some(channel.clone());
        }
        if self.group_id.as_ref().is_some_and(is_truthy) {
            Some("group".to_string())
        } else if self.user_id.as_ref().is_some_and(is_truthy) {
            Some("private".to_string())
        } else {
            None
        }
    }

    /// The single gateway command this send maps to
    pub fn command(&self) -> Result<Command, RpcError> {
        match self.channel().as_deref() {
            Some("group_forward") => {
                let messages = [&self.messages, &self.nodes]
                    .into_iter()
                    .flatten()
                    .find(|m| non_empty_list(m))
                    .ok_or_else(|| RpcError::invalid("messages is required for group_forward"))?;
                let group_id = required_id("group_id", self.group_id.as_ref(), "group_forward")?;
                Ok(Command::send_group_forward_msg(&group_id, messages.clone()))
            }
            Some("group") => {
                let message = self.message_list("group")?;
                let group_id = required_id("group_id", self.group_id.as_ref(), "group")?;
                Ok(Command::send_group_msg(&group_id, message))
            }
            Some("private") => {
                let message = self.message_list("private")?;
                let user_id = required_id("user_id", self.user_id.as_ref(), "private")?;
                Ok(Command::send_private_msg(&user_id, message))
            }
            _ => Err(RpcError::invalid(
                "Unsupported channel; use group, group_forward, or private",
            )),
        }
    }

    fn message_list(&self, channel: &str) -> Result<Value, RpcError> {
        self.message
            .as_ref()
            .filter(|m| non_empty_list(m))
            .cloned()
            .ok_or_else(|| RpcError::invalid(format!("message is required for {channel} send")))
    }
}

/// Deserialize typed params from the request's param object
pub fn parse_params<T: for<'de> Deserialize<'de>>(params: Map<String, Value>) -> Result<T, RpcError> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| RpcError::invalid(format!("invalid params: {e}")))
}

/// Loose truthiness: `false`, `0`, `""`, `[]`, `{}` and `null` are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn non_empty_list(value: &Value) -> bool {
    value.as_array().is_some_and(|a| !a.is_empty())
}

/// Blank ids count as unset; anything else must be a string or integer id
fn optional_id(field: &str, value: Option<&Value>) -> Result<Option<ChatId>, RpcError> {
    match value {
        None => Ok(None),
        Some(v) if !is_truthy(v) => Ok(None),
        Some(v) => ChatId::from_value(v)
            .map(Some)
            .ok_or_else(|| RpcError::invalid(format!("{field} must be a string or integer id"))),
    }
}

fn required_id(field: &str, value: Option<&Value>, channel: &str) -> Result<ChatId, RpcError> {
    optional_id(field, value)?
        .ok_or_else(|| RpcError::invalid(format!("{field} is required for {channel}")))
}
