//! Drives one work unit from notification to settlement.
//!
//! Every failure, whatever the stage, ends up in the same place: the failure
//! is offered to the dead-letter channel and the message is acked only if the
//! channel took it. Otherwise it is nacked so the queue redelivers it.
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, StreamExt};
use log::{error, info, warn};
use serde_json::{json, Value};
use shared::{decode_notification, BlobLocator};

use crate::blob::BlobStore;
use crate::bulk_load::BulkLoader;
use crate::error::{PipelineError, Stage};
use crate::poison::{FailureContext, PoisonRouter};
use crate::transform::RecordTransformer;
use crate::work_unit::{Settlement, WorkUnit};

const SERVICE_NAME: &str = "table_loader";
const MAX_SOURCE_CHARS: usize = 256;

pub struct Orchestrator {
    store: Arc<dyn BlobStore>,
    loader: Arc<dyn BulkLoader>,
    router: PoisonRouter,
    transformer: Arc<RecordTransformer>,
    source_bucket: Option<String>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn BlobStore>,
        loader: Arc<dyn BulkLoader>,
        router: PoisonRouter,
        transformer: Arc<RecordTransformer>,
        source_bucket: Option<String>,
    ) -> Self {
        Orchestrator {
            store,
            loader,
            router,
            transformer,
            source_bucket,
        }
    }

    /// Processes one work unit and decides how it is settled.
    pub async fn process(&self, unit: WorkUnit) -> Settlement {
        let start = Instant::now();

        let (source, result) = match decode_notification(unit.body(), self.source_bucket.as_deref()) {
            Ok(locator) => {
                let result = self.run(&locator).await;
                (locator.to_string(), result)
            }
            Err(e) => (describe_body(&unit), Err(PipelineError::from(e))),
        };

        let (settlement, stage, records) = match result {
            Ok(records) => (unit.succeed(), None, Some(records)),
            Err(e) => {
                let stage = e.stage();
                error!(
                    "Failed to process message {} from {} at {} stage (retryable: {}): {}",
                    unit.message_id(),
                    source,
                    stage,
                    e.is_retryable(),
                    e
                );
                (self.fail(unit, &source, stage, &e).await, Some(stage), None)
            }
        };

        let log = json!({
            "type": "service_log",
            "service": SERVICE_NAME,
            "message_id": settlement.message_id(),
            "source": source,
            "outcome": settlement.outcome().as_str(),
            "stage": stage.map(|s| s.as_str()),
            "records": records,
            "time": start.elapsed().as_millis() as u64,
        });
        info!("{}", serde_json::to_string(&log).unwrap_or_default());

        settlement
    }

    /// Processes a batch of work units, at most `concurrency` at a time.
    /// Settlements come back in completion order.
    pub async fn process_all(&self, units: Vec<WorkUnit>, concurrency: usize) -> Vec<Settlement> {
        stream::iter(units)
            .map(|unit| self.process(unit))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    async fn run(&self, locator: &BlobLocator) -> Result<usize, PipelineError> {
        let bytes = self.store.fetch(locator).await?;
        let mut payload: Value = serde_json::from_slice(&bytes)?;
        drop(bytes);

        let records = match &payload {
            Value::Object(_) => 1,
            Value::Array(batch) => batch.len(),
            other => return Err(PipelineError::Shape(json_kind(other))),
        };
        if records == 0 {
            info!("Empty batch in {}, nothing to load", locator);
            return Ok(0);
        }

        let transformer = self.transformer.clone();
        let payload = shared::async_rayon::spawn(move || {
            transformer.transform(&mut payload).map(|_| payload)
        })
        .await??;

        let job = self.loader.load(&payload).await?;
        info!("Loaded {} records from {} as {}", records, locator, job);
        Ok(records)
    }

    async fn fail(&self, unit: WorkUnit, source: &str, stage: Stage, err: &PipelineError) -> Settlement {
        if !self.router.is_configured() {
            warn!(
                "No dead-letter destination, returning message {} for redelivery",
                unit.message_id()
            );
            return unit.retry();
        }

        let ctx = FailureContext::new(source, err.to_string())
            .with_stage(stage.as_str())
            .with_message_id(unit.message_id());
        if self.router.route(&ctx).await {
            unit.dead_lettered()
        } else {
            warn!(
                "Could not record failure of message {}, returning it for redelivery",
                unit.message_id()
            );
            unit.retry()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Identifies a message whose body names no object.
fn describe_body(unit: &WorkUnit) -> String {
    let body = unit.body().trim();
    if body.is_empty() {
        format!("message:{}", unit.message_id())
    } else {
        body.chars().take(MAX_SOURCE_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_unlocatable_messages() {
        assert_eq!(describe_body(&WorkUnit::new("m1", "", "  ")), "message:m1");
        let long = "x".repeat(1000);
        assert_eq!(describe_body(&WorkUnit::new("m2", "", long)).len(), MAX_SOURCE_CHARS);
    }

    #[test]
    fn shape_errors_name_the_kind() {
        assert_eq!(
            PipelineError::Shape(json_kind(&json!("a"))).to_string(),
            "payload must be a JSON object or array, got a string"
        );
    }
}
