//! Gateway client: sends commands and opens the event stream
//!
//! Each command runs over its own short-lived WebSocket: connect, send the
//! action frame, read until the reply carrying our echo arrives, close.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::RelayTarget;
use crate::protocol::{ChatId, Command};
use crate::GatewayError;

/// Stream of raw gateway events, in the order the gateway emitted them.
///
/// An `Err` item means the connection is gone; nothing follows it.
pub type EventStream = BoxStream<'static, Result<Value, GatewayError>>;

/// Something that can deliver a command to the gateway and return its reply
#[async_trait]
pub trait Relay: Send + Sync {
    async fn send_command(
        &self,
        target: &RelayTarget,
        command: Command,
    ) -> Result<Value, GatewayError>;
}

/// Something that can open the gateway's event stream
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<EventStream, GatewayError>;
}

/// Relay over the NapCat forward WebSocket
#[derive(Debug, Clone, Default)]
pub struct NapcatRelay;

#[async_trait]
impl Relay for NapcatRelay {
    async fn send_command(
        &self,
        target: &RelayTarget,
        command: Command,
    ) -> Result<Value, GatewayError> {
        validate_url(&target.url)?;
        debug!(
            "Sending {} to {} (echo {})",
            command.kind(),
            target.url,
            command.echo()
        );

        tokio::time::timeout(target.timeout, exchange(&target.url, &command))
            .await
            .map_err(|_| GatewayError::Timeout(target.timeout))?
    }
}

/// Send one frame and wait for the reply with a matching echo
async fn exchange(url: &str, command: &Command) -> Result<Value, GatewayError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| GatewayError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    let (mut write, mut read) = ws.split();

    let frame = serde_json::to_string(&command.to_frame())
        .map_err(|e| GatewayError::Malformed(e.to_string()))?;
    write
        .send(Message::Text(frame.into()))
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;

    while let Some(message) = read.next().await {
        match message.map_err(|e| GatewayError::Transport(e.to_string()))? {
            Message::Text(text) => {
                let value: Value = match serde_json::from_str(text.as_str()) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("Ignoring undecodable frame: {}", e);
                        continue;
                    }
                };
                if value.get("echo").and_then(|e| e.as_str()) == Some(command.echo()) {
                    // Best-effort close; the reply is already in hand
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(value);
                }
                debug!("Skipping unrelated frame while waiting for {}", command.echo());
            }
            Message::Close(_) => return Err(GatewayError::Closed),
            _ => {}
        }
    }

    Err(GatewayError::Closed)
}

/// Event stream over the NapCat forward WebSocket
#[derive(Debug, Clone, Default)]
pub struct NapcatEvents;

#[async_trait]
impl EventSource for NapcatEvents {
    async fn open(&self, url: &str) -> Result<EventStream, GatewayError> {
        validate_url(url)?;
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GatewayError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        info!("Connected to gateway event stream at {}", url);

        let events = ws.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(value) => Some(Ok(value)),
                    Err(e) => {
                        warn!("Skipping undecodable gateway frame: {}", e);
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    info!("Gateway closed the event stream: {:?}", frame);
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(GatewayError::Transport(e.to_string()))),
            }
        });

        Ok(events.boxed())
    }
}

/// Accept only plain `ws://` endpoints; the connector is built without TLS
pub fn validate_url(raw: &str) -> Result<(), GatewayError> {
    let parsed = url::Url::parse(raw).map_err(|e| GatewayError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" => Ok(()),
        "wss" => Err(GatewayError::InvalidUrl {
            url: raw.to_string(),
            reason: "wss is not supported, use a plain ws:// endpoint".to_string(),
        }),
        other => Err(GatewayError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}', expected ws", other),
        }),
    }
}

pub async fn send_group_message(
    relay: &dyn Relay,
    target: &RelayTarget,
    group_id: &ChatId,
    message: Value,
) -> Result<Value, GatewayError> {
    relay
        .send_command(target, Command::send_group_msg(group_id, message))
        .await
}

pub async fn send_private_message(
    relay: &dyn Relay,
    target: &RelayTarget,
    user_id: &ChatId,
    message: Value,
) -> Result<Value, GatewayError> {
    relay
        .send_command(target, Command::send_private_msg(user_id, message))
        .await
}

pub async fn send_group_forward_message(
    relay: &dyn Relay,
    target: &RelayTarget,
    group_id: &ChatId,
    nodes: Value,
) -> Result<Value, GatewayError> {
    relay
        .send_command(target, Command::send_group_forward_msg(group_id, nodes))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn target(url: String, timeout: Duration) -> RelayTarget {
        RelayTarget { url, timeout }
    }

    /// One-connection fake gateway: emits `preamble` frames, then answers the
    /// first action frame by echoing it back inside an OneBot reply.
    async fn fake_gateway(preamble: Vec<String>, reply: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                return;
            };
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            for line in preamble {
                ws.send(Message::Text(line.into())).await.unwrap();
            }
            if reply {
                let answer = serde_json::json!({
                    "status": "ok",
                    "retcode": 0,
                    "data": {"message_id": 1, "action": frame["action"], "params": frame["params"]},
                    "echo": frame["echo"],
                });
                ws.send(Message::Text(answer.to_string().into())).await.unwrap();
            } else {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
        format!("ws://{}", addr)
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("ws://127.0.0.1:3001").is_ok());
        let err = validate_url("wss://gw.example.com/onebot").unwrap_err();
        assert!(err.to_string().contains("wss is not supported"), "{err}");
        assert!(matches!(
            validate_url("http://127.0.0.1"),
            Err(GatewayError::InvalidUrl { .. })
        ));
        assert!(matches!(validate_url("not a url"), Err(GatewayError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_send_command_matches_echo() {
        let url = fake_gateway(
            vec![
                r#"{"post_type":"meta_event","meta_event_type":"heartbeat"}"#.to_string(),
                r#"{"status":"ok","retcode":0,"echo":"someone-else"}"#.to_string(),
                "not json".to_string(),
            ],
            true,
        )
        .await;

        let group = ChatId::new("123").unwrap();
        let reply = send_group_message(
            &NapcatRelay,
            &target(url, Duration::from_secs(5)),
            &group,
            serde_json::json!([{"type": "text", "data": {"text": "hi"}}]),
        )
        .await
        .unwrap();

        assert_eq!(reply["status"], "ok");
        assert_eq!(reply["data"]["action"], "send_group_msg");
        assert_eq!(reply["data"]["params"]["group_id"], "123");
    }

    #[tokio::test]
    async fn test_send_command_times_out() {
        let url = fake_gateway(vec![], false).await;
        let err = NapcatRelay
            .send_command(
                &target(url, Duration::from_millis(200)),
                Command::get_record("a.amr", "mp3"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_send_command_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = NapcatRelay
            .send_command(
                &target(url, Duration::from_secs(5)),
                Command::get_record("a.amr", "mp3"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_event_stream_yields_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in [r#"{"n":1}"#, "garbage", r#"{"n":2}"#] {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            ws.close(None).await.unwrap();
        });

        let mut events = NapcatEvents.open(&format!("ws://{}", addr)).await.unwrap();
        let first = events.next().await.unwrap().unwrap();
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);
        assert!(events.next().await.is_none());
    }
}
