use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SQSBatchResponseItemFailure {
    pub item_identifier: String,
}

impl SQSBatchResponseItemFailure {
    pub fn new(id: String) -> SQSBatchResponseItemFailure {
        SQSBatchResponseItemFailure {
            item_identifier: id,
        }
    }
}

/// Partial batch response for an SQS event source mapping with
/// `ReportBatchItemFailures` enabled. Listed messages become visible again;
/// every other message in the batch is deleted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SQSBatchResponse {
    pub batch_item_failures: Vec<SQSBatchResponseItemFailure>,
}

impl SQSBatchResponse {
    pub fn new(ids: Vec<String>) -> SQSBatchResponse {
        SQSBatchResponse {
            batch_item_failures: ids
                .into_iter()
                .map(SQSBatchResponseItemFailure::new)
                .collect(),
        }
    }
}

/// Converts the ids of nacked messages into a SQS batch response for Lambda.
pub fn nacked_to_response(ids: Vec<String>) -> Option<SQSBatchResponse> {
    if ids.is_empty() {
        None
    } else {
        warn!("Returning {} message(s) to SQS for redelivery", ids.len());
        Some(SQSBatchResponse::new(ids))
    }
}
