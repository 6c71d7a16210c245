//! Shared output sink
//!
//! Responses from the dispatcher and notifications from the watcher task
//! share one writer; each JSON value plus its newline is written and flushed
//! under a single lock so lines never interleave.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::RpcError;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone)]
pub struct Outbox {
    sink: Arc<Mutex<Sink>>,
}

impl Outbox {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Write one newline-terminated JSON line
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), RpcError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        debug!(
            "Sending: {}",
            String::from_utf8_lossy(&line[..line.len().min(200)])
        );

        let mut sink = self.sink.lock().await;
        sink.write_all(&line).await?;
        sink.flush().await?;
        Ok(())
    }
}
