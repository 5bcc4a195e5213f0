use std::fmt;

use shared::async_rayon::TaskPanicked;
use shared::NotificationError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("unsupported datetime encoding: {0}")]
    UnsupportedEncoding(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("field `{field}`{}: {source}", .index.map(|i| format!(" of record {}", i)).unwrap_or_default())]
    Field {
        field: String,
        index: Option<usize>,
        source: NormalizeError,
    },
    #[error("batch element {index} is not a record")]
    NotARecord { index: usize },
    #[error("payload is neither a record nor a batch of records")]
    NotARecordOrBatch,
}

impl TransformError {
    /// Index of the offending record when the payload was a batch.
    pub fn record_index(&self) -> Option<usize> {
        match self {
            TransformError::Field { index, .. } => *index,
            TransformError::NotARecord { index } => Some(*index),
            TransformError::NotARecordOrBatch => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("object {locator} is {size} bytes, above the {limit} byte limit")]
    TooLarge {
        locator: String,
        size: u64,
        limit: u64,
    },
    #[error("transport error fetching object: {0:#}")]
    Transport(anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("transport error submitting load: {0:#}")]
    Transport(anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("dead-letter send failed: {0:#}")]
pub struct SendError(pub anyhow::Error);

#[derive(Debug, thiserror::Error)]
#[error("queue operation failed: {0:#}")]
pub struct QueueError(pub anyhow::Error);

/// Step of the pipeline a Work Unit was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Message,
    Fetch,
    Decode,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Message => "message",
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure of a single Work Unit.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Message(#[from] NotificationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("payload must be a JSON object or array, got {0}")]
    Shape(&'static str),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("transform aborted: {0}")]
    TransformPanicked(#[from] TaskPanicked),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Message(_) => Stage::Message,
            PipelineError::Fetch(_) => Stage::Fetch,
            PipelineError::Decode(_) | PipelineError::Shape(_) => Stage::Decode,
            PipelineError::Transform(_) | PipelineError::TransformPanicked(_) => Stage::Transform,
            PipelineError::Load(_) => Stage::Load,
        }
    }

    /// Transport failures may succeed on redelivery; everything else fails
    /// again when the same payload is reprocessed as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(FetchError::Transport(_)) | PipelineError::Load(LoadError::Transport(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_names_field_and_index() {
        let err = TransformError::Field {
            field: "createdAt".to_string(),
            index: Some(3),
            source: NormalizeError::UnsupportedEncoding("boolean value".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "field `createdAt` of record 3: unsupported datetime encoding: boolean value"
        );
        assert_eq!(err.record_index(), Some(3));
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        let transport = PipelineError::Load(LoadError::Transport(anyhow::anyhow!("reset")));
        let mismatch = PipelineError::Load(LoadError::SchemaMismatch("x".to_string()));
        assert!(transport.is_retryable());
        assert!(!mismatch.is_retryable());
        assert_eq!(mismatch.stage(), Stage::Load);
    }
}
