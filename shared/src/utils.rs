//! Shared utilities
//!
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Where log lines end up, which decides how much decoration they carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogTarget {
    /// Lambda: CloudWatch adds its own ingestion time and renders no colors.
    CloudWatch,
    /// A long-running process writing to a terminal or a log collector.
    Terminal,
}

pub fn setup_logging(target: LogTarget) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());

    match target {
        // ANSI color codes show up in a confusing manner in CloudWatch logs.
        LogTarget::CloudWatch => builder.with_ansi(false).without_time().init(),
        LogTarget::Terminal => builder.with_target(false).init(),
    }
}

/// INFO unless `RUST_LOG` says otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}
