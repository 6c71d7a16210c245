//! JSON-RPC server over line-delimited streams
//!
//! Requests are handled one at a time in arrival order. Notifications from
//! the watcher share the output and may land between responses.

use std::sync::Arc;

use napmsg_asr::AsrClient;
use napmsg_gateway::{EventPipeline, EventSource, Relay, RelayConfig};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::RpcError;
use crate::methods::{
    Method, MethodTable, MessageSendParams, SendParams, SubscribeParams, parse_params,
};
use crate::output::Outbox;
use crate::protocol::{Capabilities, InitializeResult, JsonRpcRequest, JsonRpcResponse};
use crate::subscription::SubscriptionRunner;

pub struct RpcServer {
    config: RelayConfig,
    asr: Option<Arc<AsrClient>>,
    relay: Arc<dyn Relay>,
    events: Arc<dyn EventSource>,
    outbox: Outbox,
    methods: MethodTable,
    subscription: SubscriptionRunner,
}

impl RpcServer {
    /// `asr` enables voice transcription for watched messages
    pub fn new(
        config: RelayConfig,
        asr: Option<Arc<AsrClient>>,
        relay: Arc<dyn Relay>,
        events: Arc<dyn EventSource>,
        outbox: Outbox,
    ) -> Result<Self, RpcError> {
        Ok(Self {
            config,
            asr,
            relay,
            events,
            outbox,
            methods: MethodTable::new()?,
            subscription: SubscriptionRunner::new(),
        })
    }

    pub fn subscription(&self) -> &SubscriptionRunner {
        &self.subscription
    }

    /// Serve until `reader` hits end of input. Only read and write failures
    /// abort; malformed lines are logged and skipped.
    pub async fn serve<R: AsyncBufRead + Unpin>(&mut self, mut reader: R) -> Result<(), RpcError> {
        info!("RPC server starting");
        let mut buf = Vec::new();

        let result = loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(RpcError::Input(e)),
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!("Dropping non UTF-8 input line: {}", e);
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            debug!("Received: {}", line.chars().take(200).collect::<String>());

            let request = match JsonRpcRequest::parse(line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Invalid JSON request: {}", e);
                    continue;
                }
            };

            if let Some(response) = self.handle_request(request).await
                && let Err(e) = self.outbox.write_json(&response).await
            {
                break Err(e);
            }
        };

        self.subscription.stop().await;
        info!("RPC server input closed");
        result
    }

    /// Handle one request. `None` when the request carries no id.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let outcome = self.dispatch(&request).await;
        let Some(id) = request.id else {
            if let Err(e) = outcome {
                debug!("{} failed without id: {}", request.method, e);
            }
            return None;
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                if !matches!(e, RpcError::MethodNotFound(_)) {
                    debug!("{} failed: {}", request.method, e);
                }
                JsonRpcResponse::error(id, e.code(), e.to_string())
            }
        })
    }

    async fn dispatch(&mut self, request: &JsonRpcRequest) -> Result<Value, RpcError> {
        let method = self.methods.lookup(&request.method).ok_or_else(|| {
            warn!("Unknown method: {}", request.method);
            RpcError::MethodNotFound(request.method.clone())
        })?;
        let params = request.params_object()?;

        match method {
            Method::Initialize => Ok(serde_json::to_value(InitializeResult {
                capabilities: Capabilities {
                    streaming: true,
                    attachments: true,
                },
            })?),
            Method::WatchSubscribe => self.subscribe(params).await,
            Method::WatchUnsubscribe => {
                self.subscription.stop().await;
                Ok(json!({ "status": "unsubscribed" }))
            }
            Method::MessageSend => {
                let params: MessageSendParams = parse_params(params)?;
                self.send(params.into_send()?).await
            }
            Method::Send => self.send(parse_params(params)?).await,
            Method::ChatsList => Ok(json!([])),
        }
    }

    async fn subscribe(&mut self, params: Map<String, Value>) -> Result<Value, RpcError> {
        self.subscription.stop().await;

        let params: SubscribeParams = parse_params(params)?;
        let target = self.config.target(params.napcat_url.as_deref(), None)?;
        let pipeline = EventPipeline::new(
            params.filter()?,
            self.relay.clone(),
            target.clone(),
            self.asr.clone(),
        );
        self.subscription
            .start(
                target.url,
                self.events.clone(),
                pipeline,
                self.outbox.clone(),
            )
            .await;
        Ok(json!({ "status": "subscribed" }))
    }

    async fn send(&self, params: SendParams) -> Result<Value, RpcError> {
        let command = params.command()?;
        let target = self
            .config
            .target(params.napcat_url.as_deref(), params.timeout)?;
        info!("Sending {} via {}", command.kind(), target.url);
        Ok(self.relay.send_command(&target, command).await?)
    }
}
