use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use log::info;
use serde::Deserialize;

/// Names an optional YAML or JSON file layered between defaults and the environment.
pub const CONFIG_FILE_ENV: &str = "TABLE_LOADER_CONFIG_FILE";

/// SQS returns at most ten messages per receive.
const MAX_LEASED_MESSAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct RawConfig {
    target_timezone: String,
    max_messages: usize,
    ack_deadline_seconds: u32,
    #[serde(default)]
    dead_letter_queue_url: Option<String>,
    schema_file: PathBuf,
    #[serde(default)]
    source_bucket: Option<String>,
    #[serde(default)]
    queue_url: Option<String>,
    lake_bucket: String,
    lake_prefix: String,
    table_name: String,
    max_object_size_mb: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub target_timezone: Tz,
    pub max_messages: usize,
    pub ack_deadline_seconds: u32,
    pub dead_letter_queue_url: Option<String>,
    pub schema_file: PathBuf,
    pub source_bucket: Option<String>,
    pub queue_url: Option<String>,
    pub lake_bucket: String,
    pub lake_prefix: String,
    pub table_name: String,
    pub max_object_size_mb: u64,
}

impl LoaderConfig {
    /// Defaults, then the optional config file, then environment variables.
    pub fn load() -> Result<Self> {
        let mut builder = defaults()?;
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            info!("Reading configuration from {}", path);
            builder = builder.add_source(File::with_name(&path));
        }
        Self::from_builder(builder.add_source(Environment::default()))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let raw = builder
            .build()
            .and_then(|c| c.try_deserialize::<RawConfig>())
            .context("Invalid table loader configuration")?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self> {
        let target_timezone = raw
            .target_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("target_timezone: {}", e))?;

        if !(1..=MAX_LEASED_MESSAGES).contains(&raw.max_messages) {
            return Err(anyhow!(
                "max_messages must be between 1 and {}, got {}",
                MAX_LEASED_MESSAGES,
                raw.max_messages
            ));
        }
        if raw.ack_deadline_seconds == 0 {
            return Err(anyhow!("ack_deadline_seconds must be positive"));
        }
        if raw.max_object_size_mb == 0 {
            return Err(anyhow!("max_object_size_mb must be positive"));
        }
        let lake_bucket = non_empty(Some(raw.lake_bucket)).ok_or_else(|| anyhow!("lake_bucket is required"))?;
        let table_name = non_empty(Some(raw.table_name)).ok_or_else(|| anyhow!("table_name is required"))?;

        Ok(LoaderConfig {
            target_timezone,
            max_messages: raw.max_messages,
            ack_deadline_seconds: raw.ack_deadline_seconds,
            dead_letter_queue_url: non_empty(raw.dead_letter_queue_url),
            schema_file: raw.schema_file,
            source_bucket: non_empty(raw.source_bucket),
            queue_url: non_empty(raw.queue_url),
            lake_bucket,
            lake_prefix: raw.lake_prefix,
            table_name,
            max_object_size_mb: raw.max_object_size_mb,
        })
    }

    pub fn max_object_bytes(&self) -> u64 {
        self.max_object_size_mb.saturating_mul(1024 * 1024)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(config::Config::builder()
        .set_default("target_timezone", "Asia/Bangkok")?
        .set_default("max_messages", 2i64)?
        .set_default("ack_deadline_seconds", 60i64)?
        .set_default("schema_file", "table_schema.json")?
        .set_default("lake_prefix", "lake")?
        .set_default("max_object_size_mb", 100i64)?)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_yaml(yaml: &str) -> Result<LoaderConfig> {
        LoaderConfig::from_builder(defaults()?.add_source(File::from_str(yaml, FileFormat::Yaml)))
    }

    #[test]
    fn defaults_fill_the_gaps() {
        let cfg = from_yaml("lake_bucket: lake-bkt\ntable_name: orders\n").unwrap();
        assert_eq!(cfg.target_timezone, chrono_tz::Asia::Bangkok);
        assert_eq!(cfg.max_messages, 2);
        assert_eq!(cfg.ack_deadline_seconds, 60);
        assert_eq!(cfg.schema_file, PathBuf::from("table_schema.json"));
        assert_eq!(cfg.lake_prefix, "lake");
        assert_eq!(cfg.dead_letter_queue_url, None);
        assert_eq!(cfg.max_object_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn empty_dead_letter_url_disables_routing() {
        let cfg = from_yaml(
            "lake_bucket: b\ntable_name: t\ndead_letter_queue_url: ''\nsource_bucket: drop\n",
        )
        .unwrap();
        assert_eq!(cfg.dead_letter_queue_url, None);
        assert_eq!(cfg.source_bucket.as_deref(), Some("drop"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(from_yaml("table_name: t\n").is_err());
        assert!(from_yaml("lake_bucket: b\ntable_name: t\ntarget_timezone: Mars/Olympus\n").is_err());
        assert!(from_yaml("lake_bucket: b\ntable_name: t\nmax_messages: 0\n").is_err());
        assert!(from_yaml("lake_bucket: b\ntable_name: t\nmax_messages: 11\n").is_err());
    }

    #[test]
    fn overrides_apply() {
        let cfg = from_yaml(
            "lake_bucket: b\ntable_name: t\ntarget_timezone: Europe/Berlin\nmax_messages: 10\n",
        )
        .unwrap();
        assert_eq!(cfg.target_timezone, chrono_tz::Europe::Berlin);
        assert_eq!(cfg.max_messages, 10);
    }
}
