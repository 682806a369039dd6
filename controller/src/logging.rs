use anyhow::Context as _;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use crate::AnyResult;

/// Maps the number of `-v` flags to the default log level.
#[must_use]
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the level derived from `verbosity`. Events go to the
/// systemd journal when `journald` is set and the journal is reachable, to
/// stderr otherwise.
///
/// # Errors
pub fn init(verbosity: u8, journald: bool) -> AnyResult<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy();

    let (journald_layer, journald_error) = match journald.then(tracing_journald::layer) {
        Some(Ok(layer)) => (Some(layer), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let fmt_layer = journald_layer.is_none().then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(journald_layer)
        .with(fmt_layer)
        .try_init()
        .context("installing the tracing subscriber")?;

    if let Some(e) = journald_error {
        tracing::warn!("journald unavailable, logging to stderr: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::level_for;

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(0), LevelFilter::WARN);
        assert_eq!(level_for(1), LevelFilter::INFO);
        assert_eq!(level_for(2), LevelFilter::DEBUG);
        assert_eq!(level_for(3), LevelFilter::TRACE);
        assert_eq!(level_for(u8::MAX), LevelFilter::TRACE);
    }
}
