//! Blob notification models
//!
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Location of one object in the blob store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct BlobLocator {
    pub bucket: String,
    pub key: String,
}

impl BlobLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        BlobLocator {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("message body is empty")]
    Empty,
    #[error("S3 event notification has no records")]
    NoRecords,
    #[error("notification does not name an object")]
    Unrecognized,
    #[error("object key {0:?} is not valid url encoding")]
    InvalidKey(String),
    #[error("message names object {0:?} but no source bucket is configured")]
    MissingBucket(String),
}

#[derive(Debug, Deserialize)]
struct S3Notification {
    #[serde(rename = "Records")]
    records: Vec<S3NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct S3NotificationRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Extracts the object a queue message refers to.
///
/// Accepts, in order: an S3 event notification, a JSON object carrying `key`
/// (or a GCS-style `name`) with an optional `bucket`, and finally the trimmed
/// body itself as a bare key inside `default_bucket`.
pub fn decode_notification(
    body: &str,
    default_bucket: Option<&str>,
) -> Result<BlobLocator, NotificationError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(NotificationError::Empty);
    }

    let bare_key = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(obj)) if obj.contains_key("Records") => {
            let notification: S3Notification =
                serde_json::from_value(Value::Object(obj)).map_err(|_| NotificationError::Unrecognized)?;
            let record = notification
                .records
                .into_iter()
                .next()
                .ok_or(NotificationError::NoRecords)?;
            // S3 encodes keys in notifications, spaces as `+` rather than `%20`.
            let key = record.s3.object.key.replace('+', " ");
            let key = urlencoding::decode(&key)
                .map_err(|_| NotificationError::InvalidKey(record.s3.object.key.clone()))?;
            return Ok(BlobLocator::new(record.s3.bucket.name, key.into_owned()));
        }
        Ok(Value::Object(obj)) => {
            let key = obj
                .get("key")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)
                .filter(|k| !k.is_empty())
                .ok_or(NotificationError::Unrecognized)?;
            match obj.get("bucket").and_then(Value::as_str) {
                Some(bucket) => return Ok(BlobLocator::new(bucket, key)),
                None => key.to_string(),
            }
        }
        Ok(Value::String(key)) if !key.trim().is_empty() => key.trim().to_string(),
        _ => body.to_string(),
    };

    match default_bucket {
        Some(bucket) => Ok(BlobLocator::new(bucket, bare_key)),
        None => Err(NotificationError::MissingBucket(bare_key)),
    }
}
