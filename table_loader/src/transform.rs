use chrono_tz::Tz;
use serde_json::{Map, Value};

use crate::error::TransformError;
use crate::normalize::normalize_value;
use crate::schema::DatetimeFields;

/// Rewrites the datetime fields of decoded records in place.
///
/// Only top-level keys of each record are inspected. A record whose datetime
/// field cannot be normalized is left as it was and the whole payload is
/// rejected.
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    fields: DatetimeFields,
    target: Tz,
}

impl RecordTransformer {
    pub fn new(fields: DatetimeFields, target: Tz) -> Self {
        RecordTransformer { fields, target }
    }

    pub fn fields(&self) -> &DatetimeFields {
        &self.fields
    }

    pub fn target(&self) -> Tz {
        self.target
    }

    /// Transforms a single record or every record of a batch, in order.
    pub fn transform(&self, payload: &mut Value) -> Result<(), TransformError> {
        match payload {
            Value::Object(record) => self.transform_record(record, None),
            Value::Array(batch) => {
                for (index, item) in batch.iter_mut().enumerate() {
                    match item {
                        Value::Object(record) => self.transform_record(record, Some(index))?,
                        _ => return Err(TransformError::NotARecord { index }),
                    }
                }
                Ok(())
            }
            _ => Err(TransformError::NotARecordOrBatch),
        }
    }

    fn transform_record(
        &self,
        record: &mut Map<String, Value>,
        index: Option<usize>,
    ) -> Result<(), TransformError> {
        if self.fields.is_empty() {
            return Ok(());
        }

        // Convert everything first so a failure leaves the record untouched.
        let converted = record
            .iter()
            .filter(|(key, _)| self.fields.contains(key))
            .map(|(key, value)| {
                normalize_value(value, self.target).map_err(|source| TransformError::Field {
                    field: key.clone(),
                    index,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let slots = record
            .iter_mut()
            .filter(|(key, _)| self.fields.contains(key))
            .map(|(_, value)| value);
        for (slot, value) in slots.zip(converted) {
            *slot = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NormalizeError;
    use serde_json::json;

    fn transformer() -> RecordTransformer {
        RecordTransformer::new(
            ["createdAt", "updatedAt"].into_iter().collect(),
            chrono_tz::Asia::Bangkok,
        )
    }

    #[test]
    fn converts_epoch_field_and_keeps_the_rest() {
        let mut record = json!({"createdAt": 1700000000, "name": "x"});
        transformer().transform(&mut record).unwrap();
        assert_eq!(record, json!({"createdAt": "2023-11-15T05:13:20", "name": "x"}));
    }

    #[test]
    fn fields_outside_the_set_are_untouched() {
        let original = json!({
            "createdAt": "2023-11-14T22:13:20Z",
            "amount": 12.50,
            "big": 18446744073709551615u64,
            "tags": ["a", {"createdAt": 1}],
            "meta": {"createdAt": 1700000000, "nested": [null, true]},
            "when": "2023-11-14T22:13:20Z"
        });
        let mut record = original.clone();
        transformer().transform(&mut record).unwrap();

        assert_eq!(record["createdAt"], json!("2023-11-15T05:13:20"));
        for key in ["amount", "big", "tags", "meta", "when"] {
            assert_eq!(record[key], original[key], "{} changed", key);
        }
    }

    #[test]
    fn absent_and_null_fields() {
        let mut record = json!({"updatedAt": null, "name": "x"});
        transformer().transform(&mut record).unwrap();
        assert_eq!(record, json!({"updatedAt": null, "name": "x"}));
    }

    #[test]
    fn batch_is_transformed_in_order_in_place() {
        let mut batch = json!([
            {"createdAt": 0, "n": 1},
            {"createdAt": "2023-11-15 05:13:20", "n": 2},
            {"n": 3}
        ]);
        let buffer = batch.as_array().unwrap().as_ptr();
        transformer().transform(&mut batch).unwrap();

        assert_eq!(batch.as_array().unwrap().as_ptr(), buffer);
        assert_eq!(
            batch,
            json!([
                {"createdAt": "1970-01-01T07:00:00", "n": 1},
                {"createdAt": "2023-11-15T05:13:20", "n": 2},
                {"n": 3}
            ])
        );
    }

    #[test]
    fn failing_record_reports_field_and_index() {
        let mut batch = json!([
            {"createdAt": 1700000000},
            {"createdAt": 1700000000, "updatedAt": "not a date"}
        ]);
        let err = transformer().transform(&mut batch).unwrap_err();
        match err {
            TransformError::Field {
                field,
                index,
                source: NormalizeError::UnsupportedEncoding(_),
            } => {
                assert_eq!(field, "updatedAt");
                assert_eq!(index, Some(1));
            }
            other => panic!("unexpected error {:?}", other),
        }
        // The rejected record is not partially rewritten.
        assert_eq!(batch[1]["createdAt"], json!(1700000000));
    }

    #[test]
    fn single_record_error_has_no_index() {
        let mut record = json!({"createdAt": false});
        let err = transformer().transform(&mut record).unwrap_err();
        assert_eq!(err.record_index(), None);
        assert_eq!(record, json!({"createdAt": false}));
    }

    #[test]
    fn non_records_are_rejected() {
        let mut batch = json!([{"createdAt": 0}, "oops"]);
        assert_eq!(
            transformer().transform(&mut batch),
            Err(TransformError::NotARecord { index: 1 })
        );
        let mut scalar = json!(42);
        assert_eq!(
            transformer().transform(&mut scalar),
            Err(TransformError::NotARecordOrBatch)
        );
    }

    #[test]
    fn empty_field_set_is_a_no_op() {
        let t = RecordTransformer::new(DatetimeFields::default(), chrono_tz::Asia::Bangkok);
        let mut record = json!({"createdAt": "garbage"});
        t.transform(&mut record).unwrap();
        assert_eq!(record, json!({"createdAt": "garbage"}));
    }
}
