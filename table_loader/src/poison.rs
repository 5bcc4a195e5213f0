use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::error::SendError;

/// What is recorded on the dead-letter channel for a failed work unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureContext {
    pub source: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl FailureContext {
    pub fn new(source: impl Into<String>, error: impl Into<String>) -> Self {
        FailureContext {
            source: source.into(),
            error: error.into(),
            stage: None,
            message_id: None,
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// The send capability of a dead-letter channel.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Human readable name of the destination, for logs.
    fn destination(&self) -> &str;

    async fn send(&self, payload: String) -> Result<(), SendError>;
}

#[derive(Clone)]
pub struct PoisonRouter {
    sink: Option<Arc<dyn DeadLetterSink>>,
}

impl PoisonRouter {
    pub fn new(sink: Option<Arc<dyn DeadLetterSink>>) -> Self {
        PoisonRouter { sink }
    }

    pub fn disabled() -> Self {
        PoisonRouter { sink: None }
    }

    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// Emits `ctx` to the dead-letter channel and reports whether it landed.
    ///
    /// Never fails: a missing destination, an encoding problem, a transport
    /// error or a panicking sink all come back as `false`.
    pub async fn route(&self, ctx: &FailureContext) -> bool {
        let sink = match &self.sink {
            Some(sink) => sink,
            None => {
                debug!("No dead-letter destination configured for {}", ctx.source);
                return false;
            }
        };

        let payload = match serde_json::to_string(ctx) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Could not encode failure context for {}: {}", ctx.source, e);
                return false;
            }
        };

        match AssertUnwindSafe(sink.send(payload)).catch_unwind().await {
            Ok(Ok(())) => {
                info!(
                    "Recorded failure of {} on dead-letter {}",
                    ctx.source,
                    sink.destination()
                );
                true
            }
            Ok(Err(e)) => {
                error!(
                    "Failed to record failure of {} on dead-letter {}: {}",
                    ctx.source,
                    sink.destination(),
                    e
                );
                false
            }
            Err(_) => {
                error!(
                    "Dead-letter {} panicked while recording failure of {}",
                    sink.destination(),
                    ctx.source
                );
                false
            }
        }
    }
}

/// Dead-letter channel backed by an SQS queue.
pub struct SqsDeadLetterSink {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsDeadLetterSink {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: String) -> Self {
        SqsDeadLetterSink { client, queue_url }
    }
}

#[async_trait]
impl DeadLetterSink for SqsDeadLetterSink {
    fn destination(&self) -> &str {
        &self.queue_url
    }

    async fn send(&self, payload: String) -> Result<(), SendError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(payload)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| SendError(anyhow!(e).context(format!("Error sending to {}", self.queue_url))))
    }
}
