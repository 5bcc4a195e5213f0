use std::io::Write;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use log::info;
use serde_json::{Map, Value};

use crate::error::LoadError;
use crate::schema::TableSchema;

/// Batched submission of transformed rows to the destination table.
#[async_trait]
pub trait BulkLoader: Send + Sync {
    /// Submits a record or batch of records and returns a reference to the
    /// ingestion job. The submission is all-or-nothing.
    async fn load(&self, records: &Value) -> Result<String, LoadError>;
}

/// Checks every row against the table schema and returns the rows in order.
pub fn validate_rows<'a>(
    schema: &TableSchema,
    records: &'a Value,
) -> Result<Vec<&'a Map<String, Value>>, LoadError> {
    let rows = match records {
        Value::Object(row) => vec![row],
        Value::Array(batch) => batch
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_object()
                    .ok_or_else(|| LoadError::SchemaMismatch(format!("row {} is not an object", i)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(LoadError::SchemaMismatch(
                "rows must be an object or an array of objects".to_string(),
            ))
        }
    };

    for (i, row) in rows.iter().enumerate() {
        if let Some(unknown) = row.keys().find(|k| schema.field(k).is_none()) {
            return Err(LoadError::SchemaMismatch(format!(
                "row {}: no such field `{}`",
                i, unknown
            )));
        }
        for field in schema.fields().iter().filter(|f| f.is_required()) {
            if row.get(&field.name).map_or(true, Value::is_null) {
                return Err(LoadError::SchemaMismatch(format!(
                    "row {}: required field `{}` is missing",
                    i, field.name
                )));
            }
        }
    }
    Ok(rows)
}

/// Serializes rows as newline delimited JSON, compressed with zstd.
pub fn encode_rows(rows: &[&Map<String, Value>]) -> anyhow::Result<Vec<u8>> {
    let mut zencoder = zstd::Encoder::new(vec![], 0)?;
    for row in rows {
        serde_json::to_writer(&mut zencoder, row)?;
        zencoder.write_all(b"\n")?;
    }
    Ok(zencoder.finish()?)
}

/// Writes each load as one object under the table's data prefix, where the
/// lake engine picks it up.
pub struct S3LakeLoader {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    table: String,
    schema: Arc<TableSchema>,
}

impl S3LakeLoader {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: String,
        prefix: String,
        table: String,
        schema: Arc<TableSchema>,
    ) -> Self {
        S3LakeLoader {
            client,
            bucket,
            prefix,
            table,
            schema,
        }
    }

    fn object_key(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        let name = format!("{}.json.zst", uuid::Uuid::new_v4());
        if prefix.is_empty() {
            format!("{}/data/{}", self.table, name)
        } else {
            format!("{}/{}/data/{}", prefix, self.table, name)
        }
    }
}

#[async_trait]
impl BulkLoader for S3LakeLoader {
    async fn load(&self, records: &Value) -> Result<String, LoadError> {
        let rows = validate_rows(&self.schema, records)?;
        let data = encode_rows(&rows).map_err(LoadError::Transport)?;
        let key = self.object_key();
        info!(
            "Writing {} rows to s3://{}/{}",
            rows.len(),
            self.bucket,
            key
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .content_encoding("application/zstd")
            .send()
            .await
            .map_err(|e| LoadError::Transport(anyhow!(e).context(format!("Error putting {} to S3", key))))?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;

    fn schema() -> TableSchema {
        TableSchema::from_json_str(
            r#"[
                {"name": "id", "type": "STRING", "mode": "REQUIRED"},
                {"name": "createdAt", "type": "DATETIME"},
                {"name": "note", "type": "STRING", "mode": "NULLABLE"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn accepts_record_and_batch() {
        let schema = schema();
        let record = json!({"id": "a", "createdAt": "2023-11-15T05:13:20"});
        assert_eq!(validate_rows(&schema, &record).unwrap().len(), 1);

        let batch = json!([{"id": "a"}, {"id": "b", "note": null}]);
        assert_eq!(validate_rows(&schema, &batch).unwrap().len(), 2);
    }

    #[test]
    fn unknown_field_is_a_mismatch() {
        let batch = json!([{"id": "a"}, {"id": "b", "colour": "red"}]);
        match validate_rows(&schema(), &batch) {
            Err(LoadError::SchemaMismatch(msg)) => assert_eq!(msg, "row 1: no such field `colour`"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn required_field_must_be_present_and_non_null() {
        for row in [json!({"note": "x"}), json!({"id": null})] {
            assert!(matches!(
                validate_rows(&schema(), &row),
                Err(LoadError::SchemaMismatch(_))
            ));
        }
    }

    #[test]
    fn rows_are_ndjson_under_zstd() {
        let batch = json!([{"id": "a"}, {"id": "b"}]);
        let rows = validate_rows(&schema(), &batch).unwrap();
        let compressed = encode_rows(&rows).unwrap();

        let mut text = String::new();
        zstd::Decoder::new(&compressed[..])
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "{\"id\":\"a\"}\n{\"id\":\"b\"}\n");
    }
}
