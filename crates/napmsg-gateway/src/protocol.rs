//! OneBot v11 command protocol: action frames sent to the gateway

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

/// Actions the relay knows how to issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SendGroupMsg,
    SendPrivateMsg,
    SendGroupForwardMsg,
    GetRecord,
}

impl CommandType {
    /// OneBot action name
    pub fn action(&self) -> &'static str {
        match self {
            Self::SendGroupMsg => "send_group_msg",
            Self::SendPrivateMsg => "send_private_msg",
            Self::SendGroupForwardMsg => "send_group_forward_msg",
            Self::GetRecord => "get_record",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.action())
    }
}

/// A typed instruction for the gateway.
///
/// Each command carries a fresh `echo` token; the gateway copies it into its
/// reply, which is how replies are matched to commands on a shared socket.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandType,
    payload: Value,
    echo: String,
}

impl Command {
    pub fn new(kind: CommandType, payload: Value) -> Self {
        Self {
            kind,
            payload,
            echo: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn send_group_msg(group_id: &ChatId, message: Value) -> Self {
        Self::new(
            CommandType::SendGroupMsg,
            json!({ "group_id": group_id, "message": message }),
        )
    }

    pub fn send_private_msg(user_id: &ChatId, message: Value) -> Self {
        Self::new(
            CommandType::SendPrivateMsg,
            json!({ "user_id": user_id, "message": message }),
        )
    }

    pub fn send_group_forward_msg(group_id: &ChatId, messages: Value) -> Self {
        Self::new(
            CommandType::SendGroupForwardMsg,
            json!({ "group_id": group_id, "messages": messages }),
        )
    }

    /// Fetch a voice message converted to `out_format`
    pub fn get_record(file: &str, out_format: &str) -> Self {
        Self::new(
            CommandType::GetRecord,
            json!({ "file": file, "out_format": out_format }),
        )
    }

    pub fn kind(&self) -> CommandType {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn echo(&self) -> &str {
        &self.echo
    }

    /// Wire frame: `{"action", "params", "echo"}`
    pub fn to_frame(&self) -> Value {
        json!({
            "action": self.kind.action(),
            "params": self.payload,
            "echo": self.echo,
        })
    }
}

/// Group or user id.
///
/// Accepted as a JSON string or integer and carried as its decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Non-empty after trimming
    pub fn new(id: impl AsRef<str>) -> Option<Self> {
        let id = id.as_ref().trim();
        (!id.is_empty()).then(|| Self(id.to_string()))
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::new(s),
            Value::Number(n) => n
                .as_i64()
                .map(|i| i.to_string())
                .or_else(|| n.as_u64().map(|u| u.to_string()))
                .map(Self),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "expected a non-empty string or integer id, got {value}"
            ))
        })
    }
}

/// Whether a gateway reply reports failure, and why
pub fn reply_failure(reply: &Value) -> Option<String> {
    let failed = reply.get("status").and_then(|s| s.as_str()) == Some("failed")
        || reply
            .get("retcode")
            .and_then(|c| c.as_i64())
            .is_some_and(|c| c != 0);
    if !failed {
        return None;
    }
    let message = ["message", "wording", "msg"]
        .iter()
        .filter_map(|k| reply.get(*k).and_then(|m| m.as_str()))
        .find(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("retcode {}", reply.get("retcode").unwrap_or(&Value::Null)));
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(CommandType::SendGroupMsg.action(), "send_group_msg");
        assert_eq!(CommandType::SendPrivateMsg.action(), "send_private_msg");
        assert_eq!(CommandType::SendGroupForwardMsg.action(), "send_group_forward_msg");
        assert_eq!(CommandType::GetRecord.to_string(), "get_record");
    }

    #[test]
    fn test_command_type_serde_matches_action() {
        let json = serde_json::to_value(CommandType::SendGroupForwardMsg).unwrap();
        assert_eq!(json, "send_group_forward_msg");
    }

    #[test]
    fn test_group_msg_frame() {
        let group = ChatId::new("123").unwrap();
        let cmd = Command::send_group_msg(&group, json!([{"type": "text", "data": {"text": "hi"}}]));
        let frame = cmd.to_frame();
        assert_eq!(frame["action"], "send_group_msg");
        assert_eq!(frame["params"]["group_id"], "123");
        assert_eq!(frame["params"]["message"][0]["data"]["text"], "hi");
        assert_eq!(frame["echo"], cmd.echo());
    }

    #[test]
    fn test_private_and_forward_payloads() {
        let id = ChatId::new("42").unwrap();
        let private = Command::send_private_msg(&id, json!([]));
        assert_eq!(private.kind(), CommandType::SendPrivateMsg);
        assert_eq!(private.payload()["user_id"], "42");

        let forward = Command::send_group_forward_msg(&id, json!([{"type": "node"}]));
        assert_eq!(forward.payload()["messages"][0]["type"], "node");
    }

    #[test]
    fn test_echo_is_unique() {
        let id = ChatId::new("1").unwrap();
        let a = Command::send_private_msg(&id, json!([]));
        let b = Command::send_private_msg(&id, json!([]));
        assert_ne!(a.echo(), b.echo());
    }

    #[test]
    fn test_get_record_payload() {
        let cmd = Command::get_record("abc.amr", "mp3");
        assert_eq!(cmd.to_frame()["params"], json!({"file": "abc.amr", "out_format": "mp3"}));
    }

    #[test]
    fn test_chat_id_from_value() {
        assert_eq!(ChatId::from_value(&json!("123")).unwrap().as_str(), "123");
        assert_eq!(ChatId::from_value(&json!(123456789012_i64)).unwrap().as_str(), "123456789012");
        assert_eq!(ChatId::from_value(&json!(" 7 ")).unwrap().as_str(), "7");
        assert!(ChatId::from_value(&json!("")).is_none());
        assert!(ChatId::from_value(&json!(1.5)).is_none());
        assert!(ChatId::from_value(&json!(null)).is_none());
        assert!(ChatId::from_value(&json!(["1"])).is_none());
    }

    #[test]
    fn test_chat_id_deserialize() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default)]
            id: Option<ChatId>,
        }
        let h: Holder = serde_json::from_str(r#"{"id": 5}"#).unwrap();
        assert_eq!(h.id.unwrap().to_string(), "5");
        let h: Holder = serde_json::from_str(r#"{"id": null}"#).unwrap();
        assert!(h.id.is_none());
        let h: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert!(h.id.is_none());
        assert!(serde_json::from_str::<Holder>(r#"{"id": true}"#).is_err());
    }

    #[test]
    fn test_reply_failure() {
        assert!(reply_failure(&json!({"status": "ok", "retcode": 0, "data": {}})).is_none());
        assert_eq!(
            reply_failure(&json!({"status": "failed", "retcode": 1404, "message": "no such file"})),
            Some("no such file".to_string())
        );
        assert_eq!(
            reply_failure(&json!({"retcode": 100, "wording": ""})),
            Some("retcode 100".to_string())
        );
    }
}
