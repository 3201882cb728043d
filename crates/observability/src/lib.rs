//! Tracing setup for the questline binary.
//!
//! One registry, filtered by `RUST_LOG` or the configured level, with a
//! stderr layer in the configured format and an optional JSON file layer
//! that rotates daily.

use anyhow::Context;
use questline_core::config::{LogFormat, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// File name prefix for rotated logs (`questline.log.2026-10-15`).
pub const LOG_FILE_PREFIX: &str = "questline.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the filter: a non-empty `RUST_LOG` wins over the configured level.
pub fn env_filter(level: &str, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directives = rust_log
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(level);
    EnvFilter::try_new(directives).with_context(|| format!("invalid log filter '{directives}'"))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when a log directory is configured; keep
/// it alive for the life of the process or buffered lines are lost.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = env_filter(&config.level, rust_log.as_deref())?;

    let mut layers: Vec<BoxedLayer> = vec![stderr_layer(config.format)];
    let mut guard = None;

    if let Some(dir) = &config.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("installing global tracing subscriber")?;

    tracing::debug!(
        level = %config.level,
        format = ?config.format,
        directory = ?config.directory,
        "Tracing initialized"
    );
    Ok(guard)
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}
