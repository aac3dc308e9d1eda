use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{LoggerConfig, LoggerFormat};

pub const LOG_ENV_VAR: &str = "LIVE_STREAMING_LOG";

/// logs go to stderr so that stdout stays usable for piping templates
pub fn init_logger(opts: &LoggerConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(opts.level.clone()));
    let layer = match opts.format {
        LoggerFormat::Pretty => fmt::Layer::default().with_writer(std::io::stderr).pretty().boxed(),
        LoggerFormat::Compact => fmt::Layer::default().with_writer(std::io::stderr).compact().boxed(),
        LoggerFormat::Json => fmt::Layer::default().with_writer(std::io::stderr).json().boxed(),
    }
    .with_filter(filter);

    // a second init (e.g. from tests) keeps the first subscriber
    let _ = Registry::default().with(layer).try_init();
}
