use anyhow::Result;
use async_once::AsyncOnce;
use aws_lambda_events::sqs::SqsEvent;
use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use lazy_static::lazy_static;
use log::{error, info};

use shared::sqs_util::{nacked_to_response, SQSBatchResponse};
use shared::{setup_logging, LogTarget};
use table_loader::config::LoaderConfig;
use table_loader::orchestrator::Orchestrator;
use table_loader::work_unit::WorkUnit;

#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

lazy_static! {
    static ref AWS_CONFIG: AsyncOnce<aws_config::SdkConfig> =
        AsyncOnce::new(async { aws_config::load_from_env().await });
    static ref S3_CLIENT: AsyncOnce<aws_sdk_s3::Client> =
        AsyncOnce::new(async { aws_sdk_s3::Client::new(AWS_CONFIG.get().await) });
    static ref SQS_CLIENT: AsyncOnce<aws_sdk_sqs::Client> =
        AsyncOnce::new(async { aws_sdk_sqs::Client::new(AWS_CONFIG.get().await) });
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    setup_logging(LogTarget::CloudWatch);

    let config = LoaderConfig::load()?;
    let orchestrator = table_loader::build_orchestrator(
        &config,
        S3_CLIENT.get().await.clone(),
        SQS_CLIENT.get().await.clone(),
    )?;
    let orchestrator = &orchestrator;
    let concurrency = config.max_messages;

    let func = service_fn(move |event| async move { handler(orchestrator, concurrency, event).await });
    run(func).await?;

    Ok(())
}

async fn handler(
    orchestrator: &Orchestrator,
    concurrency: usize,
    event: LambdaEvent<SqsEvent>,
) -> Result<Option<SQSBatchResponse>> {
    let units = into_work_units(event.payload);
    info!("Received {} messages", units.len());

    let nacked = orchestrator
        .process_all(units, concurrency)
        .await
        .into_iter()
        .filter(|settlement| !settlement.is_ack())
        .map(|settlement| settlement.into_receipt().message_id)
        .collect::<Vec<_>>();

    Ok(nacked_to_response(nacked))
}

/// A record without a message id cannot be listed in the batch response, so
/// the event source deletes it whatever happens here.
fn into_work_units(event: SqsEvent) -> Vec<WorkUnit> {
    event
        .records
        .into_iter()
        .filter_map(|record| match record.message_id {
            Some(id) => Some(WorkUnit::new(
                id,
                record.receipt_handle.unwrap_or_default(),
                record.body.unwrap_or_default(),
            )),
            None => {
                error!(
                    "Dropping SQS record without a message id, body: {}",
                    record.body.as_deref().unwrap_or_default()
                );
                None
            }
        })
        .collect()
}
