//! Tracing subscriber setup for hosts embedding the engine.

use color_eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured filter. When a log directory is
/// configured, a daily-rolling file is written next to stderr output and the
/// returned guard must be held until shutdown so buffered lines get flushed.
/// Calling this more than once leaves the first subscriber in place.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = match EnvFilter::try_from_default_env() {
    Ok(filter) => filter,
    Err(_) => EnvFilter::try_new(&config.filter)?,
  };

  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

  match &config.directory {
    Some(dir) => {
      std::fs::create_dir_all(dir)?;
      let appender = tracing_appender::rolling::daily(dir, "beatflow-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

      let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

      Ok(Some(guard))
    }
    None => {
      let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();

      Ok(None)
    }
  }
}
