//! Log filter setup for the `sentiq` binary
//!
//! Tracing starts before the configuration is read, so messages from config
//! resolution are visible. `RUST_LOG` wins when set; otherwise logging starts
//! at `info` and switches to `logging.level` once the config is loaded.

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Level used until the configured one is known
pub const STARTUP_LEVEL: &str = "info";

/// Handle for swapping the active filter after startup
pub struct LogFilter {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogFilter {
    /// Apply `logging.level` unless `RUST_LOG` already chose the filter
    pub fn apply_configured(&self, level: &str) -> anyhow::Result<()> {
        if self.from_env {
            return Ok(());
        }
        self.handle.reload(EnvFilter::new(level))?;
        Ok(())
    }
}

/// Subscriber writing to `writer`, filtered by `rust_log` or the startup level
pub fn subscriber<W>(
    rust_log: Option<&str>,
    writer: W,
) -> (impl tracing::Subscriber + Send + Sync + 'static, LogFilter)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let from_env = rust_log.is_some_and(|directives| !directives.trim().is_empty());
    let filter = match rust_log {
        Some(directives) if from_env => EnvFilter::new(directives),
        _ => EnvFilter::new(STARTUP_LEVEL),
    };
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer));
    (subscriber, LogFilter { handle, from_env })
}

/// Install the global subscriber on stderr
pub fn init() -> LogFilter {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (subscriber, filter) = subscriber(rust_log.as_deref(), std::io::stderr);
    subscriber.init();
    filter
}
