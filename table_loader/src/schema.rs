//! Destination table schema
//!
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Column types that hold datetimes and are rewritten by the transformer.
const DATETIME_TYPES: &[&str] = &["DATETIME", "TIMESTAMP"];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
}

impl SchemaField {
    pub fn is_required(&self) -> bool {
        self.mode
            .as_deref()
            .map_or(false, |m| m.eq_ignore_ascii_case("REQUIRED"))
    }

    pub fn is_datetime(&self) -> bool {
        DATETIME_TYPES
            .iter()
            .any(|t| self.field_type.eq_ignore_ascii_case(t))
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    fields: Vec<SchemaField>,
    by_name: HashMap<String, usize>,
}

impl TableSchema {
    pub fn new(fields: Vec<SchemaField>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if by_name.insert(field.name.clone(), i).is_some() {
                return Err(anyhow!("duplicate schema field `{}`", field.name));
            }
        }
        Ok(TableSchema { fields, by_name })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let fields: Vec<SchemaField> =
            serde_json::from_str(s).context("schema must be a JSON list of {name, type, mode}")?;
        Self::new(fields)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema from {}", path.display()))?;
        let schema = Self::from_json_str(&raw)
            .with_context(|| format!("Failed to parse schema from {}", path.display()))?;
        info!(
            "Loaded schema with {} fields from {}",
            schema.fields.len(),
            path.display()
        );
        Ok(schema)
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn datetime_fields(&self) -> DatetimeFields {
        let fields = self
            .fields
            .iter()
            .filter(|f| f.is_datetime())
            .map(|f| f.name.clone())
            .collect::<DatetimeFields>();
        info!(
            "Identified {} datetime fields: {:?}",
            fields.len(),
            fields.sorted()
        );
        fields
    }
}

/// Names of the fields holding datetimes. Built once at startup and shared
/// read-only by every transformation.
#[derive(Debug, Clone, Default)]
pub struct DatetimeFields(Arc<HashSet<String>>);

impl DatetimeFields {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn sorted(&self) -> Vec<&str> {
        let mut names = self.iter().collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

impl<S: Into<String>> FromIterator<S> for DatetimeFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        DatetimeFields(Arc::new(iter.into_iter().map(Into::into).collect()))
    }
}
