//! Long-running alternative to the Lambda handler: long-polls the source
//! queue and settles each message itself.
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use log::{error, info};

use shared::{setup_logging, LogTarget};
use table_loader::config::LoaderConfig;
use table_loader::orchestrator::Orchestrator;
use table_loader::queue::{MessageQueue, SqsQueue};
use table_loader::work_unit::WorkUnit;

#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging(LogTarget::Terminal);

    let config = LoaderConfig::load()?;
    let queue_url = config
        .queue_url
        .clone()
        .ok_or_else(|| anyhow!("queue_url is required by the worker"))?;

    let sdk_config = aws_config::load_from_env().await;
    let s3 = aws_sdk_s3::Client::new(&sdk_config);
    let sqs = aws_sdk_sqs::Client::new(&sdk_config);

    let orchestrator = table_loader::build_orchestrator(&config, s3, sqs.clone())?;
    let queue = SqsQueue::new(sqs, queue_url.clone(), config.ack_deadline_seconds);

    info!(
        "Listening on {} with up to {} messages in flight",
        queue_url, config.max_messages
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        // Only the receive is interrupted; a leased batch is always settled.
        let received = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            received = queue.receive(config.max_messages) => received,
        };

        match received {
            Ok(units) if units.is_empty() => {}
            Ok(units) => settle_batch(&queue, &orchestrator, units, config.max_messages).await,
            Err(e) => {
                error!("{}", e);
                tokio::time::sleep(RECEIVE_BACKOFF).await;
            }
        }
    }
    Ok(())
}

async fn settle_batch(
    queue: &SqsQueue,
    orchestrator: &Orchestrator,
    units: Vec<WorkUnit>,
    concurrency: usize,
) {
    let settlements = orchestrator.process_all(units, concurrency).await;
    for result in join_all(settlements.into_iter().map(|s| queue.settle(s))).await {
        if let Err(e) = result {
            // The lease expires and the queue redelivers.
            error!("{}", e);
        }
    }
}
