//! Loads JSON records from uploaded blobs into a lake table, normalizing
//! datetime fields to wall-clock time in a single target zone.
//!
//! Messages that cannot be processed are recorded on a dead-letter queue and
//! acknowledged; if that is not possible they are returned for redelivery.
pub mod blob;
pub mod bulk_load;
pub mod config;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod poison;
pub mod queue;
pub mod schema;
pub mod transform;
pub mod work_unit;

use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::blob::S3BlobStore;
use crate::bulk_load::S3LakeLoader;
use crate::config::LoaderConfig;
use crate::orchestrator::Orchestrator;
use crate::poison::{DeadLetterSink, PoisonRouter, SqsDeadLetterSink};
use crate::schema::TableSchema;
use crate::transform::RecordTransformer;

/// Wires the AWS backed collaborators into an [`Orchestrator`].
pub fn build_orchestrator(
    config: &LoaderConfig,
    s3: aws_sdk_s3::Client,
    sqs: aws_sdk_sqs::Client,
) -> Result<Orchestrator> {
    let schema = Arc::new(TableSchema::load(&config.schema_file)?);
    let transformer = RecordTransformer::new(schema.datetime_fields(), config.target_timezone);

    let router = match &config.dead_letter_queue_url {
        Some(url) => {
            info!("Routing failed messages to {}", url);
            let sink: Arc<dyn DeadLetterSink> = Arc::new(SqsDeadLetterSink::new(sqs, url.clone()));
            PoisonRouter::new(Some(sink))
        }
        None => {
            info!("No dead-letter queue configured, failed messages will be redelivered");
            PoisonRouter::disabled()
        }
    };

    let store = S3BlobStore::new(s3.clone(), config.max_object_bytes());
    let loader = S3LakeLoader::new(
        s3,
        config.lake_bucket.clone(),
        config.lake_prefix.clone(),
        config.table_name.clone(),
        schema,
    );

    Ok(Orchestrator::new(
        Arc::new(store),
        Arc::new(loader),
        router,
        Arc::new(transformer),
        config.source_bucket.clone(),
    ))
}
