use crate::cli::{LogColor, Options};
use eyre::{Result, WrapErr};
use std::{io::IsTerminal, sync::Arc};
use tracing::{Level, info};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::Directive, fmt, layer::SubscriberExt,
};
use tsmigrate_engine::{
    ValidatedConfig,
    remote::{
        CheckpointReader, Destination, HttpDestination, HttpSource, MemoryStorage,
        PrometheusCheckpointReader, Source,
    },
};

/// Logs go to stderr, stdout carries the reports.
pub fn init_tracing(opts: &Options) -> Result<()> {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => std::io::stderr().is_terminal(),
    };

    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    let fmt_layer = fmt::layer()
        .with_target(include_target)
        .with_ansi(use_color)
        .with_writer(std::io::stderr);

    let subscriber = Registry::default().with(fmt_layer.with_filter(log_filter));

    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("Cannot install the tracing subscriber")
}

pub struct Endpoints {
    pub source: Arc<dyn Source>,
    pub destination: Arc<dyn Destination>,
    pub checkpoint_reader: Option<Arc<dyn CheckpointReader>>,
}

/// Builds the HTTP endpoints of a validated config. A dry run swaps the
/// destination for an in-memory sink so nothing leaves the process.
pub fn init_endpoints(config: &ValidatedConfig, dry_run: bool) -> Result<Endpoints> {
    let source: Arc<dyn Source> =
        Arc::new(HttpSource::new(&config.reader).wrap_err("Cannot build the reader client")?);

    let destination: Arc<dyn Destination> = if dry_run {
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(HttpDestination::new(&config.writer).wrap_err("Cannot build the writer client")?)
    };

    let progress = &config.plan.progress;
    let checkpoint_reader: Option<Arc<dyn CheckpointReader>> = match &progress.metric_url {
        Some(url) if progress.enabled => {
            info!(url = %url, "resuming from checkpoints stored behind the progress metric url");
            // Checkpoints live in the destination, so they share its credentials.
            Some(Arc::new(
                PrometheusCheckpointReader::new(
                    url.clone(),
                    config.writer.timeout,
                    config.writer.auth.clone(),
                )
                .wrap_err("Cannot build the progress metric client")?,
            ))
        }
        _ => None,
    };

    Ok(Endpoints {
        source,
        destination,
        checkpoint_reader,
    })
}
