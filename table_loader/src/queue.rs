use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, warn};

use crate::error::QueueError;
use crate::work_unit::{Decision, Settlement, WorkUnit};

/// Queue subscription primitives for the long-running worker.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Leases up to `max` messages. May return fewer, or none.
    async fn receive(&self, max: usize) -> Result<Vec<WorkUnit>, QueueError>;

    /// Issues the ack or nack carried by `settlement`.
    async fn settle(&self, settlement: Settlement) -> Result<(), QueueError>;
}

const WAIT_TIME_SECONDS: i32 = 20;

pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    visibility_timeout: i32,
}

impl SqsQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: String, ack_deadline_seconds: u32) -> Self {
        SqsQueue {
            client,
            queue_url,
            visibility_timeout: ack_deadline_seconds.min(i32::MAX as u32) as i32,
        }
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self, max: usize) -> Result<Vec<WorkUnit>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.clamp(1, 10) as i32)
            .visibility_timeout(self.visibility_timeout)
            .wait_time_seconds(WAIT_TIME_SECONDS)
            .send()
            .await
            .map_err(|e| QueueError(anyhow!(e).context(format!("Error receiving from {}", self.queue_url))))?;

        let units = output
            .messages()
            .unwrap_or_default()
            .iter()
            .filter_map(|msg| match (msg.message_id(), msg.receipt_handle()) {
                (Some(id), Some(handle)) => Some(WorkUnit::new(id, handle, msg.body().unwrap_or_default())),
                _ => {
                    warn!("Skipping SQS message without id or receipt handle");
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!("Received {} messages", units.len());
        Ok(units)
    }

    async fn settle(&self, settlement: Settlement) -> Result<(), QueueError> {
        let decision = settlement.decision();
        let receipt = settlement.into_receipt();
        match decision {
            Decision::Ack => self
                .client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(&receipt.handle)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| QueueError(anyhow!(e).context(format!("Error acking {}", receipt.message_id)))),
            // Zero visibility makes the message immediately available for redelivery.
            Decision::Nack => self
                .client
                .change_message_visibility()
                .queue_url(&self.queue_url)
                .receipt_handle(&receipt.handle)
                .visibility_timeout(0)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| QueueError(anyhow!(e).context(format!("Error nacking {}", receipt.message_id)))),
        }
    }
}
