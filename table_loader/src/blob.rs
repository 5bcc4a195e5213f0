use anyhow::anyhow;
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use log::{debug, error};
use shared::BlobLocator;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt};

use crate::error::FetchError;

/// Read access to the object store holding uploaded payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the full, decompressed contents of the object.
    async fn fetch(&self, locator: &BlobLocator) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

pub fn infer_compression(
    content_encoding: Option<&str>,
    content_type: Option<&str>,
    key: &str,
) -> Compression {
    let extension = std::path::Path::new(key)
        .extension()
        .and_then(std::ffi::OsStr::to_str);

    content_encoding
        .and_then(|encoding| match encoding {
            "gzip" | "application/gzip" => Some(Compression::Gzip),
            "zstd" | "application/zstd" => Some(Compression::Zstd),
            _ => None,
        })
        .or_else(|| {
            content_type.and_then(|content_type| match content_type {
                "application/gzip" | "application/x-gzip" => Some(Compression::Gzip),
                "application/zstd" => Some(Compression::Zstd),
                _ => None,
            })
        })
        .or_else(|| {
            extension.and_then(|extension| match extension {
                "gz" => Some(Compression::Gzip),
                "zst" => Some(Compression::Zstd),
                _ => None,
            })
        })
        .unwrap_or(Compression::None)
}

/// Reads `reader` to the end through the matching decoder, refusing to
/// produce more than `limit` bytes.
pub async fn read_decompressed<R>(
    reader: R,
    compression: Compression,
    locator: &BlobLocator,
    limit: u64,
) -> Result<Vec<u8>, FetchError>
where
    R: AsyncBufRead + Send + Unpin,
{
    let buf = match compression {
        Compression::None => read_limited(reader, limit).await,
        Compression::Gzip => {
            let mut decoder = GzipDecoder::new(reader);
            decoder.multiple_members(true);
            read_limited(decoder, limit).await
        }
        Compression::Zstd => {
            let mut decoder = ZstdDecoder::new(reader);
            decoder.multiple_members(true);
            read_limited(decoder, limit).await
        }
    }
    .map_err(|e| FetchError::Transport(anyhow!(e).context(format!("Error reading {}", locator))))?;

    if buf.len() as u64 > limit {
        return Err(FetchError::TooLarge {
            locator: locator.to_string(),
            size: buf.len() as u64,
            limit,
        });
    }
    Ok(buf)
}

/// Reads at most one byte past `limit`, enough to tell that it was exceeded.
async fn read_limited<R: AsyncRead + Unpin>(reader: R, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![];
    reader.take(limit.saturating_add(1)).read_to_end(&mut buf).await?;
    Ok(buf)
}

fn is_no_such_key(err: &SdkError<GetObjectError>) -> bool {
    matches!(err, SdkError::ServiceError(se) if se.err().is_no_such_key())
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    max_bytes: u64,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, max_bytes: u64) -> Self {
        S3BlobStore { client, max_bytes }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn fetch(&self, locator: &BlobLocator) -> Result<Vec<u8>, FetchError> {
        debug!("Starting download of {}", locator);
        let obj = self
            .client
            .get_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .send()
            .await
            .map_err(|e| {
                if is_no_such_key(&e) {
                    FetchError::NotFound(locator.to_string())
                } else {
                    error!("Error downloading {} from S3: {}", locator, e);
                    FetchError::Transport(anyhow!(e).context(format!("Error downloading {}", locator)))
                }
            })?;

        let size = obj.content_length().max(0) as u64;
        if size > self.max_bytes {
            return Err(FetchError::TooLarge {
                locator: locator.to_string(),
                size,
                limit: self.max_bytes,
            });
        }

        let compression = infer_compression(
            obj.content_encoding(),
            obj.content_type(),
            &locator.key,
        );
        let reader = tokio::io::BufReader::new(obj.body.into_async_read());
        let data = read_decompressed(reader, compression, locator, self.max_bytes).await?;
        debug!("Downloaded {} bytes from {}", data.len(), locator);
        Ok(data)
    }
}
