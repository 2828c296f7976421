//! Tracing subscriber setup
//!
//! One fmt layer, JSON or pretty, written to stdout or appended to
//! `logging.file_path`. `RUST_LOG` replaces `logging.level` when set; both
//! accept full filter directives such as `info,keyscope_live=debug`.

use anyhow::Context;
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Install the global subscriber. Fails on a bad filter, an unwritable log
/// file, or if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = parse_filter(from_env.as_deref(), &config.level)?;

    let writer = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output_layer(&config.format, writer))
        .try_init()?;
    Ok(())
}

/// `RUST_LOG` directives win over the configured level when non-blank
fn parse_filter(from_env: Option<&str>, level: &str) -> anyhow::Result<EnvFilter> {
    match from_env.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {} {directives:?}", EnvFilter::DEFAULT_ENV)),
        None => EnvFilter::try_new(level)
            .with_context(|| format!("invalid logging.level {level:?}")),
    }
}

fn output_layer<S>(format: &str, writer: BoxMakeWriter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_line_number(true);

    if format == "json" {
        layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .boxed()
    } else {
        layer.pretty().with_file(false).boxed()
    }
}
